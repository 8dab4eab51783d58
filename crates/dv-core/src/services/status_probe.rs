//! Reading build and deployment state back from the platform.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::platform::{BuildInfo, Condition, ConditionStatus, DeploymentInfo};
use crate::models::{BuildStatus, DeploymentState, DeploymentStatus, Status};

use super::naming::build_config_name;
use super::platform::{PlatformGateway, PlatformResult};

pub const AVAILABLE: &str = "Available";
pub const PROGRESSING: &str = "Progressing";

pub const BUILD_COMPLETE_MESSAGE: &str = "Build complete, see deployment message";
pub const NO_DEPLOYMENT_MESSAGE: &str =
    "Build Completed, but no deployment found. Reason unknown, please redeploy";

fn status_is(condition: Option<&Condition>, status: ConditionStatus) -> bool {
    condition.is_some_and(|c| c.status == status)
}

/// Progressing unless the condition explicitly says `False`.
pub fn is_progressing(progressing: Option<&Condition>) -> bool {
    !status_is(progressing, ConditionStatus::False)
}

/// Available when `Available` is true and `Progressing` is not false, or the
/// `Progressing=False` is older than the `Available` transition.
pub fn is_available(available: Option<&Condition>, progressing: Option<&Condition>) -> bool {
    let Some(avail) = available.filter(|c| c.status == ConditionStatus::True) else {
        return false;
    };
    if !status_is(progressing, ConditionStatus::False) {
        return true;
    }
    let progressed_at = progressing.and_then(|p| p.last_transition_time);
    avail.last_transition_time > progressed_at
}

pub fn deployment_is_available(deployment: &DeploymentInfo) -> bool {
    is_available(deployment.condition(AVAILABLE), deployment.condition(PROGRESSING))
}

pub fn deployment_is_progressing(deployment: &DeploymentInfo) -> bool {
    is_progressing(deployment.condition(PROGRESSING))
}

/// Revision label of the replication controller behind the deployment's
/// latest version, else `fallback`.
pub async fn deployed_revision(
    gateway: &dyn PlatformGateway,
    namespace: &str,
    deployment: &DeploymentInfo,
    fallback: Option<u64>,
) -> PlatformResult<Option<u64>> {
    let controllers = gateway
        .list_replication_controllers(namespace, &deployment.name)
        .await?;
    for rc in controllers {
        if rc.latest_version() != Some(deployment.latest_version) {
            continue;
        }
        if let Some(label) = rc
            .template_labels
            .get(crate::models::platform::DEPLOYMENT_VERSION_LABEL)
        {
            match label.parse() {
                Ok(revision) => return Ok(Some(revision)),
                Err(_) => tracing::error!(value = %label, "unexpected value for deployment-version"),
            }
        }
    }
    Ok(fallback)
}

/// Fill `status` with the deployment state of `service_id`.
pub async fn update_deployment_status(
    gateway: &dyn PlatformGateway,
    namespace: &str,
    service_id: &str,
    completed_at: Option<DateTime<Utc>>,
    status: &mut DeploymentStatus,
    build_revision: Option<u64>,
    grace: Duration,
) -> PlatformResult<()> {
    if let Some(deployment) = gateway.get_deployment(namespace, service_id).await? {
        status.status = DeploymentState::Deploying;
        status.deployment_name = Some(deployment.name.clone());
        status.version = deployed_revision(gateway, namespace, &deployment, build_revision).await?;
        if deployment_is_available(&deployment) {
            status.status = DeploymentState::Running;
        } else {
            if !deployment_is_progressing(&deployment) {
                status.status = DeploymentState::Failed;
            }
            status.status_message = match deployment.condition(AVAILABLE) {
                Some(available) => available.message.clone().unwrap_or_default(),
                None => "Available condition not found in deployment, delete the service and re-deploy?"
                    .to_string(),
            };
        }
    } else if let Some(completed_at) = completed_at {
        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        if Utc::now() > completed_at + grace {
            status.status = DeploymentState::Failed;
            status.status_message = NO_DEPLOYMENT_MESSAGE.to_string();
        } else {
            status.status = DeploymentState::Deploying;
            status.status_message = "Build Completed, Waiting for deployment.".to_string();
        }
    } else {
        status.status = DeploymentState::NotFound;
    }
    Ok(())
}

/// The build matching the config's last version, else the first listed.
fn current_build(builds: &[BuildInfo], last_version: u64) -> Option<&BuildInfo> {
    builds
        .iter()
        .find(|b| b.build_number() == Some(last_version))
        .or_else(|| builds.first())
}

/// Rebuild a status purely from what exists on the platform.
pub async fn reconstruct(
    gateway: &dyn PlatformGateway,
    namespace: &str,
    service_id: &str,
    name: &str,
    grace: Duration,
) -> PlatformResult<BuildStatus> {
    let mut status = BuildStatus::new(service_id.to_string(), name.to_string(), namespace.to_string());

    let last_version = gateway
        .get_build_config(namespace, &build_config_name(service_id))
        .await?
        .map(|bc| bc.last_version)
        .unwrap_or(1);

    let builds = gateway.list_builds(namespace, service_id).await?;
    let mut completed_at = None;
    if let Some(build) = current_build(&builds, last_version) {
        status.build_name = Some(build.name.clone());
        status.revision = build.deployment_version();
        let message = build.message.clone().unwrap_or_default();
        if build.phase.is_cancelled() {
            status.transition(Status::Cancelled, message);
        } else if build.phase.is_failed() {
            status.transition(Status::Failed, message);
        } else if build.phase.is_completed() {
            status.transition(Status::Complete, BUILD_COMPLETE_MESSAGE);
            completed_at = build.completion_timestamp;
        } else {
            status.transition(Status::Building, message);
        }
    } else {
        let controllers = gateway
            .list_replication_controllers(namespace, service_id)
            .await?;
        if controllers.first().is_some_and(|rc| rc.replicas == 0) {
            status.transition(Status::Failed, NO_DEPLOYMENT_MESSAGE);
        }
    }

    let revision = status.revision;
    update_deployment_status(
        gateway,
        namespace,
        service_id,
        completed_at,
        &mut status.deployment_status,
        revision,
        grace,
    )
    .await?;
    status.touch();
    Ok(status)
}
