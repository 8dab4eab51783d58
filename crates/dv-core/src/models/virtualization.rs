use serde::Serialize;

use super::build_status::BuildStatus;
use super::deployment::DeploymentStatus;

/// Read-only view of a build and its deployment, as returned to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualizationStatus {
    build_status: BuildStatus,
    deployment_status: DeploymentStatus,
}

impl VirtualizationStatus {
    pub fn new(build_status: BuildStatus, deployment_status: DeploymentStatus) -> Self {
        Self {
            build_status,
            deployment_status,
        }
    }

    pub fn build_status(&self) -> &BuildStatus {
        &self.build_status
    }

    pub fn deployment_status(&self) -> &DeploymentStatus {
        &self.deployment_status
    }

    pub fn into_parts(self) -> (BuildStatus, DeploymentStatus) {
        (self.build_status, self.deployment_status)
    }
}
