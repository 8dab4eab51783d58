// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};

use dv_core::models::{
    BuildStatus, DeploymentState, DeploymentStatus, ProtocolType, RouteStatus, Status,
    VirtualizationStatus,
};

/// Fixed "now" for deterministic snapshots.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
}

/// Build a record for `name` last updated `seconds_ago` before [`fixed_now`].
pub fn make_build(name: &str, status: Status, message: &str, seconds_ago: i64) -> BuildStatus {
    let mut build = BuildStatus::new(format!("dv-{name}"), name.to_string(), "test".to_string());
    build.transition(status, message);
    build.last_updated = fixed_now() - chrono::Duration::seconds(seconds_ago);
    build
}

pub fn running_deployment(version: u64) -> DeploymentStatus {
    DeploymentStatus {
        status: DeploymentState::Running,
        deployment_name: Some("dv-orders".into()),
        version: Some(version),
        ..DeploymentStatus::default()
    }
}

pub fn odata_route(name: &str) -> RouteStatus {
    RouteStatus {
        name: format!("dv-{name}-odata"),
        protocol: ProtocolType::Odata,
        host: Some(format!("dv-{name}-odata.apps.example.com")),
        path: Some("/odata".into()),
        port: Some("odata".into()),
        target: format!("dv-{name}"),
        secure: true,
    }
}

pub fn view(build: BuildStatus, deployment: DeploymentStatus) -> VirtualizationStatus {
    VirtualizationStatus::new(build, deployment)
}

pub fn args(line: &str) -> Vec<String> {
    line.split_whitespace().map(String::from).collect()
}
