//! Boundary to the container orchestration platform.

use std::time::Duration;

use async_trait::async_trait;

use crate::models::platform::{
    BuildConfigInfo, BuildConfigSpec, BuildInfo, DeploymentInfo, DeploymentSpec, ResourceKind,
    ReplicationControllerInfo, RouteInfo, RouteSpec, Selector, SecretSpec, ServiceInfo,
    ServiceSpec,
};

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("platform request failed: {0}")]
    Request(String),

    #[error("unexpected platform response: {0}")]
    Response(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }

    /// Worth retrying: the platform could not be reached or answered
    /// something unreadable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Request(_) | PlatformError::Response(_) | PlatformError::Timeout(_)
        )
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Operations the engine needs from the platform. Reads return `None` for
/// absent objects; creates replace an existing object of the same name.
#[async_trait]
pub trait PlatformGateway: Send + Sync {
    async fn create_image_stream(&self, namespace: &str, name: &str) -> PlatformResult<()>;

    async fn create_build_config(&self, namespace: &str, spec: &BuildConfigSpec)
        -> PlatformResult<()>;

    async fn get_build_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<BuildConfigInfo>>;

    /// Start a binary build of `build_config` from a tar archive.
    async fn start_binary_build(
        &self,
        namespace: &str,
        build_config: &str,
        archive: Vec<u8>,
    ) -> PlatformResult<BuildInfo>;

    async fn get_build(&self, namespace: &str, name: &str) -> PlatformResult<Option<BuildInfo>>;

    async fn list_builds(&self, namespace: &str, application: &str)
        -> PlatformResult<Vec<BuildInfo>>;

    async fn wait_for_pod_ready(
        &self,
        namespace: &str,
        pod: &str,
        timeout: Duration,
    ) -> PlatformResult<()>;

    async fn apply_secret(&self, namespace: &str, spec: &SecretSpec) -> PlatformResult<()>;

    async fn apply_deployment(
        &self,
        namespace: &str,
        spec: &DeploymentSpec,
    ) -> PlatformResult<DeploymentInfo>;

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<DeploymentInfo>>;

    async fn redeploy(&self, namespace: &str, name: &str) -> PlatformResult<()>;

    async fn list_replication_controllers(
        &self,
        namespace: &str,
        application: &str,
    ) -> PlatformResult<Vec<ReplicationControllerInfo>>;

    async fn get_service(&self, namespace: &str, name: &str) -> PlatformResult<Option<ServiceInfo>>;

    async fn create_service(&self, namespace: &str, spec: &ServiceSpec)
        -> PlatformResult<ServiceInfo>;

    async fn get_route(&self, namespace: &str, name: &str) -> PlatformResult<Option<RouteInfo>>;

    async fn create_route(&self, namespace: &str, spec: &RouteSpec) -> PlatformResult<RouteInfo>;

    /// Delete every object of `kind` matched by `selector`. Deleting
    /// something that does not exist succeeds.
    async fn delete(
        &self,
        namespace: &str,
        kind: ResourceKind,
        selector: &Selector,
    ) -> PlatformResult<()>;
}
