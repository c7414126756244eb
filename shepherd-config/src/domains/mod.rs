//! Domain-specific configuration modules

pub mod logging;
pub mod servable;
pub mod supervisor;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

pub use logging::LoggingConfig;
pub use servable::ServableStartConfig;
pub use supervisor::SupervisorConfig;

/// Top-level shepherd configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ShepherdConfig {
    /// Servables to deploy, merged by (name, version) before startup
    #[serde(default)]
    pub servables: Vec<ServableStartConfig>,

    /// Supervision timings and restart policy
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ShepherdConfig {
    /// Validate all configuration domains
    pub fn validate_all(&self) -> ConfigResult<()> {
        for servable in &self.servables {
            servable.validate()?;
        }
        self.supervisor.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}
