use std::path::{Path, PathBuf};

use crate::error::{PublishError, Result};
use crate::models::OrchestratorConfig;

pub const CONFIG_FILENAME: &str = ".dv-orchestrator.yaml";

pub fn load(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        return Err(PublishError::ConfigNotFound(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    parse(&contents)
}

pub fn parse(contents: &str) -> Result<OrchestratorConfig> {
    let config: OrchestratorConfig = if contents.trim().is_empty() {
        OrchestratorConfig::default()
    } else {
        serde_yaml::from_str(contents).map_err(|e| PublishError::InvalidConfig(e.to_string()))?
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &OrchestratorConfig) -> Result<()> {
    if config.monitor_delay_ms == 0 {
        return Err(PublishError::InvalidConfig(
            "monitor_delay_ms must be greater than zero".into(),
        ));
    }
    if config.worker_pool_size == 0 {
        return Err(PublishError::InvalidConfig(
            "worker_pool_size must be greater than zero".into(),
        ));
    }
    if config.namespace.is_empty() {
        return Err(PublishError::InvalidConfig("namespace is required".into()));
    }
    Ok(())
}

/// Find the config file, walking up from `start` until a `.git` root.
pub fn find(start: &Path) -> Option<PathBuf> {
    let mut dir = start;
    loop {
        let candidate = dir.join(CONFIG_FILENAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if dir.join(".git").exists() {
            return None;
        }
        dir = dir.parent()?;
    }
}
