use std::sync::Arc;

use crate::models::OrchestratorConfig;

use super::platform::PlatformGateway;
use super::registrar::{ConnectionIndex, ConnectionRegistrar, UsageCache};
use super::service_log::ServiceLog;
use super::sources::{BuildInputGenerator, SourceCatalog};
use super::worker_pool::WorkerPool;

/// Collaborators and shared state of one orchestrator instance.
pub struct Context {
    pub config: OrchestratorConfig,
    pub gateway: Arc<dyn PlatformGateway>,
    pub registrar: Arc<dyn ConnectionRegistrar>,
    pub sources: Arc<dyn SourceCatalog>,
    pub inputs: Arc<dyn BuildInputGenerator>,
    pub usage: UsageCache,
    pub connections: ConnectionIndex,
    pub log: ServiceLog,
    pub pool: WorkerPool,
}

impl Context {
    pub fn new(
        config: OrchestratorConfig,
        gateway: Arc<dyn PlatformGateway>,
        registrar: Arc<dyn ConnectionRegistrar>,
        sources: Arc<dyn SourceCatalog>,
        inputs: Arc<dyn BuildInputGenerator>,
    ) -> Self {
        Self {
            usage: UsageCache::new(config.usage_cache_ttl()),
            connections: ConnectionIndex::default(),
            log: ServiceLog::new(config.log_directory.clone()).with_debug(config.debug_log),
            pool: WorkerPool::new(config.worker_pool_size),
            config,
            gateway,
            registrar,
            sources,
            inputs,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }
}
