//! Immutable worker descriptions
//!
//! A [`WorkerSpec`] is created from merged user configuration and never
//! mutated afterwards; restarts reuse the same spec so a worker's identity
//! survives process replacement.

use shepherd_config::ServableStartConfig;
use std::path::PathBuf;

/// Where one worker runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentTarget {
    /// One servable copy on one compute device
    Device { device_type: String, device_id: u32 },
    /// One worker fronting a distributed-inference group
    Distributed { rank_table_file: PathBuf },
}

/// Immutable description of one worker to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub servable_directory: PathBuf,
    pub servable_name: String,
    pub version_number: u64,
    pub target: DeploymentTarget,
    pub dec_key_file: Option<PathBuf>,
    pub dec_mode: Option<String>,
    pub listening_master: bool,
}

impl WorkerSpec {
    /// Expand merged start configs into one spec per worker process: one per
    /// device id for local servables, one total for distributed ones.
    pub fn expand(configs: &[ServableStartConfig]) -> Vec<WorkerSpec> {
        let mut specs = Vec::new();
        for config in configs {
            if let Some(rank_table_file) = &config.rank_table_file {
                specs.push(WorkerSpec {
                    servable_directory: config.servable_directory.clone(),
                    servable_name: config.servable_name.clone(),
                    version_number: config.version_number,
                    target: DeploymentTarget::Distributed {
                        rank_table_file: rank_table_file.clone(),
                    },
                    dec_key_file: config.dec_key_file.clone(),
                    dec_mode: config.dec_mode.clone(),
                    listening_master: config.listening_master,
                });
                continue;
            }
            for device_id in &config.device_ids {
                specs.push(WorkerSpec {
                    servable_directory: config.servable_directory.clone(),
                    servable_name: config.servable_name.clone(),
                    version_number: config.version_number,
                    target: DeploymentTarget::Device {
                        device_type: config.device_type.clone(),
                        device_id: *device_id,
                    },
                    dec_key_file: config.dec_key_file.clone(),
                    dec_mode: config.dec_mode.clone(),
                    listening_master: config.listening_master,
                });
            }
        }
        specs
    }

    /// Device id for local deployments, None for distributed workers
    pub fn device_id(&self) -> Option<u32> {
        match &self.target {
            DeploymentTarget::Device { device_id, .. } => Some(*device_id),
            DeploymentTarget::Distributed { .. } => None,
        }
    }

    /// Short human-readable identity used in log lines and errors
    pub fn describe(&self) -> String {
        match &self.target {
            DeploymentTarget::Device { device_id, .. } => format!(
                "{} v{} device {}",
                self.servable_name, self.version_number, device_id
            ),
            DeploymentTarget::Distributed { .. } => {
                format!("{} v{} (distributed)", self.servable_name, self.version_number)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_one_spec_per_device() {
        let mut config = ServableStartConfig::new("/srv/models", "resnet", vec![0, 2, 5]);
        config.device_type = "gpu".to_string();

        let specs = WorkerSpec::expand(&[config]);
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[1].device_id(), Some(2));
        assert!(specs.iter().all(|s| s.servable_name == "resnet"));
    }

    #[test]
    fn test_expand_distributed_is_single_worker() {
        let mut config = ServableStartConfig::new("/srv/models", "pangu", vec![]);
        config.rank_table_file = Some(PathBuf::from("/srv/rank_table.json"));

        let specs = WorkerSpec::expand(&[config]);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].device_id(), None);
        assert!(specs[0].describe().contains("distributed"));
    }
}
