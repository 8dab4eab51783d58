use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::Result;
use crate::models::{
    BuildStatus, DeploymentStatus, OrchestratorConfig, PublishConfiguration, Status,
    VirtualizationStatus,
};

use super::context::Context;
use super::exposure::{consumers, routes};
use super::naming::{service_id, validate_name};
use super::platform::{PlatformGateway, PlatformResult};
use super::registrar::ConnectionRegistrar;
use super::sources::{BuildInputGenerator, SourceCatalog};
use super::status_probe::{reconstruct, update_deployment_status};
use super::work_queue::{StatusUpdate, WorkQueue};

/// Entry point for publishing, inspecting and deleting virtualizations.
///
/// Publish and delete return as soon as the request is queued; progress is
/// observed through [`Orchestrator::get_status`] or [`Orchestrator::subscribe`].
pub struct Orchestrator {
    ctx: Arc<Context>,
    queue: WorkQueue,
}

impl Orchestrator {
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: OrchestratorConfig,
        gateway: Arc<dyn PlatformGateway>,
        registrar: Arc<dyn ConnectionRegistrar>,
        sources: Arc<dyn SourceCatalog>,
        inputs: Arc<dyn BuildInputGenerator>,
    ) -> Self {
        let ctx = Arc::new(Context::new(config, gateway, registrar, sources, inputs));
        let queue = WorkQueue::start(ctx.clone());
        Self { ctx, queue }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.ctx.config
    }

    /// Queue a build of `config`. When a build of the same virtualization is
    /// still in progress, that build's record is returned instead.
    pub async fn publish(&self, config: PublishConfiguration) -> Result<BuildStatus> {
        validate_name(&config.name)?;
        let id = service_id(&config.name);
        let log = &self.ctx.log;
        log.remove(&id).await;
        log.info(
            &id,
            format!("Publishing - Start publishing of virtualization: {id}"),
        )
        .await;

        let (current, _) = self.get_status(&config.name).await.into_parts();
        log.info(
            &id,
            format!("Publishing - Virtualization status: {}", current.status),
        )
        .await;
        if !current.status.accepts_publish() {
            log.info(
                &id,
                format!(
                    "Publishing - Previous build request in progress, failed to submit new build request: {}",
                    current.status
                ),
            )
            .await;
            return Ok(current);
        }

        log.info(&id, "Publishing - Adding to work queue for build").await;
        let submitted = BuildStatus::submitted(id.clone(), self.ctx.namespace().to_string(), config);
        let queued = self.queue.publish(submitted).await?;
        log.info(&id, format!("Publishing - Status of build + {}", queued.status))
            .await;
        Ok(queued)
    }

    /// Current build and deployment state. Never fails: anything that cannot
    /// be determined reads as NOTFOUND.
    pub async fn get_status(&self, name: &str) -> VirtualizationStatus {
        let id = service_id(name);
        let (build, mut deployment) = match self.lookup(&id, name).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(service_id = %id, error = %e, "could not get build status");
                let build = BuildStatus::new(id.clone(), name.to_string(), self.ctx.namespace().to_string());
                let deployment = build.deployment_status.clone();
                (build, deployment)
            }
        };

        if deployment.is_running() {
            deployment.used_by = match consumers(&self.ctx, &id, name).await {
                Ok(used_by) => used_by,
                Err(e) => {
                    tracing::warn!(service_id = %id, error = %e, "could not look up consumers");
                    Vec::new()
                }
            };
            deployment.routes = routes(&self.ctx, &id).await;
        }
        VirtualizationStatus::new(build, deployment)
    }

    async fn lookup(&self, id: &str, name: &str) -> PlatformResult<(BuildStatus, DeploymentStatus)> {
        let gateway = self.ctx.gateway.as_ref();
        let namespace = self.ctx.namespace();
        let grace = self.ctx.config.deployment_grace();
        match self.queue.get(id).await {
            None => {
                let build = reconstruct(gateway, namespace, id, name, grace).await?;
                let deployment = build.deployment_status.clone();
                Ok((build, deployment))
            }
            Some(build) if build.status == Status::Complete => {
                let deployment = build.deployment_status.clone();
                Ok((build, deployment))
            }
            Some(build) => {
                let mut deployment = DeploymentStatus::default();
                update_deployment_status(
                    gateway,
                    namespace,
                    id,
                    None,
                    &mut deployment,
                    build.revision,
                    grace,
                )
                .await?;
                Ok((build, deployment))
            }
        }
    }

    /// Contents of the virtualization's log file.
    pub async fn get_log(&self, name: &str) -> String {
        self.ctx.log.read(&service_id(name)).await
    }

    /// Tear the virtualization down. A no-op when it is gone or already
    /// going; refused while any consumer still uses it.
    pub async fn delete(&self, name: &str) -> Result<BuildStatus> {
        let (mut build, deployment) = self.get_status(name).await.into_parts();
        if build.status.ignores_delete() {
            return Ok(build);
        }
        if !deployment.used_by.is_empty() {
            build.status_message = format!(
                "The virtualization \"{name}\" is currently used in integration(s) \"[{}]\" thus can not be deleted. The unpublish has been CANCELED",
                deployment.used_by.join(", ")
            );
            return Ok(build);
        }

        let id = service_id(name);
        self.ctx
            .log
            .info(&id, "Deleting virtualization deployed as Service")
            .await;
        self.queue.delete(build).await
    }

    /// Records currently held by the work queue.
    pub async fn in_flight(&self) -> Vec<BuildStatus> {
        self.queue.in_flight().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.queue.subscribe()
    }
}
