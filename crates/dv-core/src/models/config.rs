use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Published-image properties for one data source, as listed in the config file.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Extra build dependencies contributed by this source type.
    #[serde(default)]
    pub dependencies: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub namespace: String,
    pub monitor_delay_ms: u64,
    pub worker_pool_size: usize,
    pub registry_url: String,
    pub registry_connector_id: String,
    pub usage_cache_ttl_secs: u64,
    pub expose_via_3scale: bool,
    pub log_directory: PathBuf,
    /// Also write debug-level lines to the per-service logs.
    pub debug_log: bool,
    pub work_directory: PathBuf,
    pub max_delete_attempts: u32,
    /// Failed remote calls in a row before a publish gives up.
    pub max_poll_failures: u32,
    pub deployment_grace_secs: u64,
    pub build_pod_ready_timeout_secs: u64,
    pub oc_binary: String,
    pub sources: HashMap<String, SourceConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            monitor_delay_ms: 500,
            worker_pool_size: 3,
            registry_url: "http://syndesis-server/api/v1".to_string(),
            registry_connector_id: "sql".to_string(),
            usage_cache_ttl_secs: 60,
            expose_via_3scale: false,
            log_directory: std::env::temp_dir(),
            debug_log: false,
            work_directory: std::env::temp_dir(),
            max_delete_attempts: 5,
            max_poll_failures: 5,
            deployment_grace_secs: 15,
            build_pod_ready_timeout_secs: 20,
            oc_binary: "oc".to_string(),
            sources: HashMap::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn monitor_delay(&self) -> Duration {
        Duration::from_millis(self.monitor_delay_ms)
    }

    pub fn usage_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.usage_cache_ttl_secs)
    }

    pub fn deployment_grace(&self) -> Duration {
        Duration::from_secs(self.deployment_grace_secs)
    }

    pub fn build_pod_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.build_pod_ready_timeout_secs)
    }

    /// Wait before the `attempt`-th restart of a failed teardown.
    pub fn delete_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        self.monitor_delay()
            .saturating_mul(factor as u32)
            .min(Duration::from_secs(30))
    }
}
