//! Servable start configuration
//!
//! One `ServableStartConfig` describes how to deploy one servable: where its
//! artifacts live, which version to run, and which devices host a copy each.
//! Configs sharing (name, version) are merged before any worker is spawned.

use crate::error::{ConfigError, ConfigResult};
use crate::validation::{validate_non_empty, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Startup configuration for one servable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServableStartConfig {
    /// Directory containing the servable artifacts
    pub servable_directory: PathBuf,

    /// Servable name
    pub servable_name: String,

    /// Running version number
    #[serde(default = "default_version_number")]
    pub version_number: u64,

    /// Device ids hosting one copy each
    #[serde(default)]
    pub device_ids: Vec<u32>,

    /// Device type (e.g. "ascend", "gpu", "cpu")
    #[serde(default = "default_device_type")]
    pub device_type: String,

    /// Optional path to the model decryption key
    #[serde(default)]
    pub dec_key_file: Option<PathBuf>,

    /// Decryption mode, only meaningful with a key file
    #[serde(default)]
    pub dec_mode: Option<String>,

    /// Rank table file for a distributed-inference group; when set the
    /// servable is launched as a single distributed worker instead of one
    /// worker per device id
    #[serde(default)]
    pub rank_table_file: Option<PathBuf>,

    /// Whether the worker listens for master liveness
    #[serde(default = "crate::domains::utils::default_true")]
    pub listening_master: bool,
}

fn default_version_number() -> u64 {
    1
}

fn default_device_type() -> String {
    "cpu".to_string()
}

impl ServableStartConfig {
    /// Create a config with defaults for the optional fields
    pub fn new(
        servable_directory: impl Into<PathBuf>,
        servable_name: impl Into<String>,
        device_ids: Vec<u32>,
    ) -> Self {
        Self {
            servable_directory: servable_directory.into(),
            servable_name: servable_name.into(),
            version_number: default_version_number(),
            device_ids,
            device_type: default_device_type(),
            dec_key_file: None,
            dec_mode: None,
            rank_table_file: None,
            listening_master: true,
        }
    }

    fn is_distributed(&self) -> bool {
        self.rank_table_file.is_some()
    }
}

impl Validatable for ServableStartConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.servable_name, "servable_name", self.domain_name())?;
        if self.servable_directory.as_os_str().is_empty() {
            return Err(self.validation_error("servable_directory cannot be empty"));
        }
        if self.version_number == 0 {
            return Err(self.validation_error("version_number must be greater than 0"));
        }
        if !self.is_distributed() {
            validate_non_empty(&self.device_ids, "device_ids", self.domain_name())?;
        }
        let mut seen: BTreeSet<u32> = BTreeSet::new();
        for device_id in &self.device_ids {
            if !seen.insert(*device_id) {
                return Err(self.validation_error(&format!(
                    "device id {} listed more than once",
                    device_id
                )));
            }
        }
        if self.dec_mode.is_some() && self.dec_key_file.is_none() {
            return Err(self.validation_error("dec_mode requires dec_key_file"));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "servable"
    }
}

/// Merge start configs sharing (name, version) into one config each.
///
/// Device id sets are unioned; every other field must agree. A device id
/// listed twice for the same servable is rejected, as is any disagreement on
/// directory, device type or decryption material.
pub fn merge_start_configs(
    configs: Vec<ServableStartConfig>,
) -> ConfigResult<Vec<ServableStartConfig>> {
    let mut merged: Vec<ServableStartConfig> = Vec::new();

    for config in configs {
        config.validate()?;

        let existing = merged
            .iter_mut()
            .find(|c| c.servable_name == config.servable_name && c.version_number == config.version_number);

        let Some(existing) = existing else {
            merged.push(config);
            continue;
        };

        let conflict = |message: &str| ConfigError::ServableConflict {
            servable: config.servable_name.clone(),
            version: config.version_number,
            message: message.to_string(),
        };

        if existing.servable_directory != config.servable_directory {
            return Err(conflict("servable_directory differs"));
        }
        if existing.device_type != config.device_type {
            return Err(conflict("device_type differs"));
        }
        if existing.dec_key_file != config.dec_key_file || existing.dec_mode != config.dec_mode {
            return Err(conflict("decryption material differs"));
        }
        if existing.rank_table_file != config.rank_table_file {
            return Err(conflict("rank_table_file differs"));
        }
        if existing.listening_master != config.listening_master {
            return Err(conflict("listening_master differs"));
        }

        let mut seen: BTreeSet<u32> = existing.device_ids.iter().copied().collect();
        for device_id in config.device_ids {
            if !seen.insert(device_id) {
                return Err(conflict(&format!("device id {} listed more than once", device_id)));
            }
            existing.device_ids.push(device_id);
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, version: u64, devices: Vec<u32>) -> ServableStartConfig {
        let mut c = ServableStartConfig::new("/srv/models", name, devices);
        c.version_number = version;
        c
    }

    #[test]
    fn test_merge_unions_device_ids() {
        let merged = merge_start_configs(vec![
            config("resnet", 1, vec![0, 1]),
            config("resnet", 1, vec![2, 3]),
        ])
        .unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].device_ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_merge_keeps_distinct_versions_apart() {
        let merged = merge_start_configs(vec![
            config("resnet", 1, vec![0]),
            config("resnet", 2, vec![1]),
            config("add", 1, vec![2]),
        ])
        .unwrap();

        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_merge_rejects_duplicate_device_id() {
        let result = merge_start_configs(vec![
            config("resnet", 1, vec![0, 1]),
            config("resnet", 1, vec![1]),
        ]);

        assert!(matches!(result, Err(ConfigError::ServableConflict { .. })));
    }

    #[test]
    fn test_merge_rejects_duplicate_device_id_within_one_config() {
        let result = merge_start_configs(vec![config("resnet", 1, vec![0, 0])]);
        assert!(matches!(result, Err(ConfigError::DomainError { .. })));
    }

    #[test]
    fn test_merge_rejects_directory_conflict() {
        let a = config("resnet", 1, vec![0]);
        let mut b = config("resnet", 1, vec![1]);
        b.servable_directory = PathBuf::from("/other/models");

        let result = merge_start_configs(vec![a, b]);
        assert!(matches!(result, Err(ConfigError::ServableConflict { .. })));
    }

    #[test]
    fn test_validate_rejects_empty_devices_for_local_servable() {
        let c = config("resnet", 1, vec![]);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_allows_distributed_without_devices() {
        let mut c = config("pangu", 1, vec![]);
        c.rank_table_file = Some(PathBuf::from("/srv/rank_table.json"));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_dec_mode_without_key() {
        let mut c = config("resnet", 1, vec![0]);
        c.dec_mode = Some("AES-GCM".to_string());
        assert!(c.validate().is_err());
    }
}
