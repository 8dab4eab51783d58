//! Ordered removal of everything a publish created.

use std::sync::Arc;

use crate::models::platform::{ResourceKind, Selector};
use crate::models::ProtocolType;

use super::context::Context;
use super::exposure::unregister_connection;
use super::naming::{build_config_name, route_name, secret_name};
use super::platform::PlatformGateway;

/// One independent deletion in the teardown sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownStep {
    pub label: &'static str,
    pub kind: ResourceKind,
    pub selector: Selector,
}

impl TeardownStep {
    fn new(label: &'static str, kind: ResourceKind, selector: Selector) -> Self {
        Self {
            label,
            kind,
            selector,
        }
    }
}

/// Outcome of one teardown pass. Empty `failed` means everything is gone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub failed: Vec<String>,
}

impl TeardownReport {
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

pub fn teardown_plan(service_id: &str) -> Vec<TeardownStep> {
    let by_name = |name: String| Selector::Name(name);
    let by_app = || Selector::Application(service_id.to_string());
    vec![
        TeardownStep::new(
            "route",
            ResourceKind::Route,
            by_name(route_name(service_id, ProtocolType::Odata)),
        ),
        TeardownStep::new("service", ResourceKind::Service, by_name(service_id.to_string())),
        TeardownStep::new("builds", ResourceKind::Build, by_app()),
        TeardownStep::new("pods", ResourceKind::Pod, by_app()),
        TeardownStep::new("image streams", ResourceKind::ImageStream, by_app()),
        TeardownStep::new(
            "replication controllers",
            ResourceKind::ReplicationController,
            by_app(),
        ),
        TeardownStep::new(
            "deployment config",
            ResourceKind::DeploymentConfig,
            by_name(service_id.to_string()),
        ),
        TeardownStep::new("secret", ResourceKind::Secret, by_name(secret_name(service_id))),
        TeardownStep::new("build config", ResourceKind::BuildConfig, by_app()),
        // Objects the platform recreates while the deployment winds down.
        TeardownStep::new(
            "replication controllers",
            ResourceKind::ReplicationController,
            by_app(),
        ),
        TeardownStep::new("image streams", ResourceKind::ImageStream, by_app()),
    ]
}

/// Run every step of the plan. A failing step is recorded and the rest
/// still run. Returns the labels of the failed steps.
pub async fn delete_resources(
    gateway: &dyn PlatformGateway,
    namespace: &str,
    service_id: &str,
) -> Vec<String> {
    let mut failed = Vec::new();
    for step in teardown_plan(service_id) {
        match gateway.delete(namespace, step.kind, &step.selector).await {
            Ok(()) => {
                tracing::debug!(service_id, kind = %step.kind, selector = %step.selector, "deleted");
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(service_id, kind = %step.kind, "already gone");
            }
            Err(e) => {
                tracing::warn!(
                    service_id,
                    kind = %step.kind,
                    selector = %step.selector,
                    error = %e,
                    "teardown step failed"
                );
                failed.push(step.label.to_string());
            }
        }
    }
    failed
}

/// Worker job for a delete: remove the platform objects, then the catalog
/// entry. Build config name is logged for operators chasing leftovers.
pub async fn teardown(ctx: Arc<Context>, service_id: String, name: String) -> TeardownReport {
    let id = service_id.as_str();
    ctx.log
        .info(
            id,
            format!(
                "Deleting virtualization {name} (build config {})",
                build_config_name(id)
            ),
        )
        .await;

    let mut failed = delete_resources(ctx.gateway.as_ref(), ctx.namespace(), id).await;
    for step in &failed {
        ctx.log
            .error(
                id,
                format!("Deleting {step} failed, requeueing the delete request"),
            )
            .await;
    }

    if let Err(e) = unregister_connection(&ctx, id, &name).await {
        ctx.log
            .error(
                id,
                format!("Removing the connection failed, requeueing the delete request: {e}"),
            )
            .await;
        failed.push("connection".to_string());
    }

    if failed.is_empty() {
        ctx.log.info(id, format!("Virtualization {name} deleted")).await;
    }
    TeardownReport { failed }
}
