//! Configuration loading and environment variable handling

use crate::domains::logging::LogLevel;
use crate::domains::ShepherdConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "SHEPHERD".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ShepherdConfig> {
        let content = std::fs::read_to_string(path)?;
        self.from_yaml_str(&content)
    }

    /// Load configuration from a YAML string with environment overrides
    pub fn from_yaml_str(&self, content: &str) -> ConfigResult<ShepherdConfig> {
        let mut config: ShepherdConfig = serde_yaml::from_str(content)?;
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<ShepherdConfig> {
        let mut config = ShepherdConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ShepherdConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut ShepherdConfig) -> ConfigResult<()> {
        if let Ok(level) = self.get_env_var("LOG_LEVEL") {
            config.logging.level = LogLevel::from_str(&level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", level)))?;
        }

        if let Ok(dir) = self.get_env_var("SOCKET_DIR") {
            config.supervisor.socket_dir = dir.into();
        }

        if let Ok(program) = self.get_env_var("WORKER_PROGRAM") {
            config.supervisor.worker_program = program.into();
        }

        if let Ok(attempts) = self.get_env_var("MAX_RESTARTS") {
            config.supervisor.max_restart_attempts = attempts
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid MAX_RESTARTS: {}", e)))?;
        }

        if let Ok(restart) = self.get_env_var("RESTART_ON_FAULT") {
            config.supervisor.restart_on_fault = restart
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid RESTART_ON_FAULT: {}", e)))?;
        }

        Ok(())
    }

    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
