//! One monitor tick: advance a queued record by a single step.
//!
//! The tick owns the record for its duration. Long steps run on the worker
//! pool and are polled from later ticks through [`Pending`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::Result;
use crate::models::platform::{DeploymentInfo, SecretSpec};
use crate::models::{BuildStatus, DeploymentState, ProtocolType, Status};

use super::configure::{configure, Configured};
use super::context::Context;
use super::exposure::{deployment_spec, ensure_route, ensure_service, register_connection};
use super::naming::secret_name;
use super::platform::{PlatformError, PlatformResult};
use super::status_probe::{
    deployment_is_available, deployment_is_progressing, AVAILABLE, BUILD_COMPLETE_MESSAGE,
    NO_DEPLOYMENT_MESSAGE,
};
use super::teardown::{teardown, TeardownReport};

/// Worker-pool job a record is waiting on.
pub(crate) enum Pending {
    Configure(JoinHandle<Result<Configured>>),
    Teardown(JoinHandle<TeardownReport>),
}

impl Pending {
    fn is_finished(&self) -> bool {
        match self {
            Pending::Configure(handle) => handle.is_finished(),
            Pending::Teardown(handle) => handle.is_finished(),
        }
    }
}

/// A record held by the work queue.
pub(crate) struct Entry {
    pub status: BuildStatus,
    pub pending: Option<Pending>,
    /// Failed teardown passes so far.
    pub delete_attempts: u32,
    /// Remote calls that failed in a row while publishing.
    pub poll_failures: u32,
    /// Bumped whenever the record is replaced or rescheduled out of band;
    /// ticks carrying an older value are ignored.
    pub generation: u64,
}

impl Entry {
    pub fn new(status: BuildStatus, generation: u64) -> Self {
        Self {
            status,
            pending: None,
            delete_attempts: 0,
            poll_failures: 0,
            generation,
        }
    }

    pub fn has_pending_work(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| !p.is_finished())
    }

    /// Move to DELETE_SUBMITTED and hand the teardown to the worker pool.
    pub fn start_teardown(&mut self, ctx: &Arc<Context>) {
        self.status
            .transition(Status::DeleteSubmitted, "delete submitted");
        let job = teardown(
            ctx.clone(),
            self.status.service_id().to_string(),
            self.status.name.clone(),
        );
        self.pending = Some(Pending::Teardown(ctx.pool.spawn(job)));
    }
}

/// What the queue does with the record after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Next {
    After(Duration),
    Stop,
}

pub(crate) async fn tick(ctx: &Arc<Context>, entry: &mut Entry) -> Result<Next> {
    let id = entry.status.service_id().to_string();
    entry.status.touch();
    ctx.log
        .debug(&id, format!("Monitoring {}", entry.status.status))
        .await;
    let delay = ctx.config.monitor_delay();

    match entry.status.status {
        Status::Submitted => {
            ctx.log
                .info(&id, "Publishing - Submitted build to be configured")
                .await;
            Ok(start_configure(ctx, entry))
        }
        Status::Configuring => poll_configure(ctx, &id, entry).await,
        Status::Building => poll_build(ctx, &id, entry).await,
        Status::Complete => poll_deployment(ctx, &id, entry).await,
        Status::DeleteSubmitted => Ok(poll_teardown(ctx, &id, entry).await),
        Status::DeleteRequeue => {
            ctx.log.info(&id, "Restarting the delete request").await;
            entry.start_teardown(ctx);
            Ok(Next::After(delay))
        }
        Status::Cancelled | Status::Failed | Status::DeleteDone | Status::NotFound => {
            Ok(Next::Stop)
        }
    }
}

fn start_configure(ctx: &Arc<Context>, entry: &mut Entry) -> Next {
    let Some(config) = entry.status.publish_configuration.clone() else {
        entry
            .status
            .transition(Status::Failed, "No publish configuration for build");
        return Next::Stop;
    };
    entry
        .status
        .transition(Status::Configuring, "Configuring build");
    let job = configure(ctx.clone(), entry.status.service_id().to_string(), config);
    entry.pending = Some(Pending::Configure(ctx.pool.spawn(job)));
    Next::After(ctx.config.monitor_delay())
}

async fn poll_configure(ctx: &Arc<Context>, id: &str, entry: &mut Entry) -> Result<Next> {
    let handle = match entry.pending.take() {
        Some(Pending::Configure(handle)) => handle,
        other => {
            entry.pending = other;
            entry
                .status
                .transition(Status::Failed, "Build configuration was interrupted");
            return Ok(Next::Stop);
        }
    };
    if !handle.is_finished() {
        entry.pending = Some(Pending::Configure(handle));
        return Ok(Next::After(ctx.config.monitor_delay()));
    }

    let configured = match handle.await {
        Ok(Ok(configured)) => configured,
        Ok(Err(e)) => {
            entry.status.transition(Status::Failed, e.to_string());
            return Ok(Next::Stop);
        }
        Err(e) => {
            ctx.log
                .error(id, format!("Publishing - Configuration worker failed: {e}"))
                .await;
            entry.status.transition(Status::Failed, e.to_string());
            return Ok(Next::Stop);
        }
    };

    let status = &mut entry.status;
    if let Some(config) = status.publish_configuration.as_mut() {
        config.add_environment_variables(configured.environment);
        config.add_secret_variables(configured.secrets);
    }
    status.build_name = Some(configured.build_name);
    status.publish_pod_name = Some(configured.publish_pod_name);
    status.transition(Status::Building, "Build Running");
    Ok(Next::After(ctx.config.monitor_delay()))
}

/// How a failed remote call while publishing plays out.
enum RemoteFailure {
    Retry,
    GiveUp(String),
}

/// Count a failed remote call. Transient failures are retried on later
/// ticks until `max_poll_failures` happen in a row; anything else is
/// returned as an error.
async fn remote_failed(
    ctx: &Arc<Context>,
    id: &str,
    entry: &mut Entry,
    what: &str,
    error: PlatformError,
) -> Result<RemoteFailure> {
    if !error.is_transient() {
        return Err(error.into());
    }
    entry.poll_failures += 1;
    let limit = ctx.config.max_poll_failures;
    ctx.log
        .error(
            id,
            format!(
                "Publishing - {what} failed ({}/{limit}): {error}",
                entry.poll_failures
            ),
        )
        .await;
    if entry.poll_failures >= limit {
        return Ok(RemoteFailure::GiveUp(format!(
            "{what} failed {} times in a row: {error}",
            entry.poll_failures
        )));
    }
    Ok(RemoteFailure::Retry)
}

async fn poll_build(ctx: &Arc<Context>, id: &str, entry: &mut Entry) -> Result<Next> {
    let namespace = ctx.namespace();
    let delay = ctx.config.monitor_delay();
    let read = match &entry.status.build_name {
        Some(name) => ctx.gateway.get_build(namespace, name).await,
        None => Ok(None),
    };
    let build = match read {
        Ok(build) => build,
        Err(e) => {
            return match remote_failed(ctx, id, entry, "Reading the build", e).await? {
                RemoteFailure::Retry => Ok(Next::After(delay)),
                RemoteFailure::GiveUp(message) => {
                    entry.status.transition(Status::Failed, message);
                    Ok(Next::Stop)
                }
            };
        }
    };
    let Some(build) = build else {
        ctx.log
            .error(id, "Publishing - No build available for building")
            .await;
        return Ok(Next::Stop);
    };

    if build.phase.is_completed() {
        ctx.log
            .info(id, "Publishing - Build completed. Preparing to deploy")
            .await;
        let deployment = match start_deployment(ctx, id, &entry.status).await {
            Ok(deployment) => deployment,
            Err(e) => {
                return match remote_failed(ctx, id, entry, "Starting the deployment", e).await? {
                    RemoteFailure::Retry => Ok(Next::After(delay)),
                    RemoteFailure::GiveUp(message) => {
                        entry.status.transition(Status::Failed, message);
                        Ok(Next::Stop)
                    }
                };
            }
        };
        entry.poll_failures = 0;
        let status = &mut entry.status;
        status.transition(Status::Complete, BUILD_COMPLETE_MESSAGE);
        let deployment_status = &mut status.deployment_status;
        deployment_status.status = DeploymentState::Deploying;
        deployment_status.status_message = "build completed, deployment started".into();
        deployment_status.deployment_name = Some(deployment.name);
        deployment_status.version = status.revision;
        return Ok(Next::After(delay));
    }

    entry.poll_failures = 0;
    let status = &mut entry.status;
    if build.phase.is_cancelled() {
        ctx.log.info(id, "Publishing - Build cancelled").await;
        status.transition(Status::Cancelled, build.message.unwrap_or_default());
        ctx.log
            .debug(
                id,
                format!(
                    "Build cancelled: {}. Reason {}",
                    build.name,
                    build.log_snippet.unwrap_or_default()
                ),
            )
            .await;
        Ok(Next::Stop)
    } else if build.phase.is_failed() {
        ctx.log.error(id, "Publishing - Build failed").await;
        status.transition(Status::Failed, build.message.unwrap_or_default());
        ctx.log
            .error(
                id,
                format!(
                    "Build failed :{}. Reason {}",
                    build.name,
                    build.log_snippet.unwrap_or_default()
                ),
            )
            .await;
        Ok(Next::Stop)
    } else {
        Ok(Next::After(delay))
    }
}

/// Secret, deployment and rollout for a finished build. Each call replaces
/// what an earlier attempt left behind.
async fn start_deployment(
    ctx: &Arc<Context>,
    id: &str,
    status: &BuildStatus,
) -> PlatformResult<DeploymentInfo> {
    let namespace = ctx.namespace();
    let secrets = status
        .publish_configuration
        .as_ref()
        .map(|c| c.secret_variables().clone())
        .unwrap_or_default();
    ctx.gateway
        .apply_secret(
            namespace,
            &SecretSpec {
                name: secret_name(id),
                application: id.to_string(),
                data: secrets,
            },
        )
        .await?;
    let deployment = ctx
        .gateway
        .apply_deployment(namespace, &deployment_spec(status))
        .await?;
    ctx.gateway.redeploy(namespace, &deployment.name).await?;
    Ok(deployment)
}

/// Mark the deployment failed and stop watching it.
fn deployment_failed(entry: &mut Entry, message: impl Into<String>) -> Next {
    let deployment_status = &mut entry.status.deployment_status;
    deployment_status.status = DeploymentState::Failed;
    deployment_status.status_message = message.into();
    Next::Stop
}

async fn poll_deployment(ctx: &Arc<Context>, id: &str, entry: &mut Entry) -> Result<Next> {
    let namespace = ctx.namespace();
    let delay = ctx.config.monitor_delay();
    let name = entry
        .status
        .deployment_status
        .deployment_name
        .clone()
        .unwrap_or_else(|| id.to_string());
    let deployment = match ctx.gateway.get_deployment(namespace, &name).await {
        Ok(deployment) => deployment,
        Err(e) => {
            return match remote_failed(ctx, id, entry, "Reading the deployment", e).await? {
                RemoteFailure::Retry => Ok(Next::After(delay)),
                RemoteFailure::GiveUp(message) => Ok(deployment_failed(entry, message)),
            };
        }
    };
    let Some(deployment) = deployment else {
        ctx.log
            .error(id, "Publishing - Deployment disappeared before it became available")
            .await;
        return Ok(deployment_failed(entry, NO_DEPLOYMENT_MESSAGE));
    };

    if deployment_is_available(&deployment) {
        ctx.log.info(id, "Publishing - Deployment completed").await;
        if let Err(e) = expose(ctx, id).await {
            return match remote_failed(ctx, id, entry, "Exposing the service", e).await? {
                RemoteFailure::Retry => Ok(Next::After(delay)),
                RemoteFailure::GiveUp(message) => Ok(deployment_failed(entry, message)),
            };
        }
        entry.poll_failures = 0;
        let virtualization = entry.status.name.clone();
        if let Err(e) = register_connection(ctx, id, &virtualization).await {
            ctx.log
                .error(id, format!("Publishing - Registering the connection failed: {e}"))
                .await;
        }
        entry.status.deployment_status.status = DeploymentState::Running;
        return Ok(Next::Stop);
    }

    entry.poll_failures = 0;
    let deployment_status = &mut entry.status.deployment_status;
    let mut next = Next::After(delay);
    if !deployment_is_progressing(&deployment) {
        deployment_status.status = DeploymentState::Failed;
        ctx.log
            .info(
                id,
                "Publishing - Deployment seems to be failed, this could be due to vdb failure, readiness check failed. Wait threshold is 2 minutes.",
            )
            .await;
        next = Next::Stop;
    }
    ctx.log.debug(id, "Publishing - Deployment not ready").await;
    deployment_status.status_message = match deployment.condition(AVAILABLE) {
        Some(available) => {
            let message = available.message.clone().unwrap_or_default();
            ctx.log
                .debug(id, format!("Publishing - Deployment condition: {message}"))
                .await;
            message
        }
        None => "Available condition not found in the Deployment Config".to_string(),
    };
    Ok(next)
}

async fn expose(ctx: &Arc<Context>, id: &str) -> PlatformResult<()> {
    ensure_service(ctx, id).await?;
    if !ctx.config.expose_via_3scale {
        ensure_route(ctx, id, ProtocolType::Odata).await?;
    }
    Ok(())
}

async fn poll_teardown(ctx: &Arc<Context>, id: &str, entry: &mut Entry) -> Next {
    let delay = ctx.config.monitor_delay();
    let handle = match entry.pending.take() {
        Some(Pending::Teardown(handle)) => handle,
        _ => {
            entry.start_teardown(ctx);
            return Next::After(delay);
        }
    };
    if !handle.is_finished() {
        entry.pending = Some(Pending::Teardown(handle));
        return Next::After(delay);
    }

    let report = handle.await.unwrap_or_else(|e| TeardownReport {
        failed: vec![format!("teardown worker ({e})")],
    });
    if report.succeeded() {
        entry.status.transition(Status::DeleteDone, "delete done");
        entry.status.deployment_status.status = DeploymentState::NotFound;
        return Next::Stop;
    }

    entry.delete_attempts += 1;
    let failed = report.failed.join(", ");
    if entry.delete_attempts >= ctx.config.max_delete_attempts {
        ctx.log
            .error(
                id,
                format!("Giving up the delete after {} attempts", entry.delete_attempts),
            )
            .await;
        entry.status.transition(
            Status::Failed,
            format!("Delete failed, could not remove: {failed}"),
        );
        return Next::Stop;
    }
    entry.status.transition(
        Status::DeleteRequeue,
        format!("Delete requeued, could not remove: {failed}"),
    );
    Next::After(ctx.config.delete_backoff(entry.delete_attempts))
}
