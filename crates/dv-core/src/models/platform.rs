//! Views of the orchestration platform objects the engine reads and the
//! specifications it hands to the gateway when creating them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::deployment::ProtocolType;
use super::publish::EnvVar;

pub const BUILD_NUMBER_ANNOTATION: &str = "openshift.io/build.number";
pub const LATEST_VERSION_ANNOTATION: &str = "openshift.io/deployment-config.latest-version";
pub const DEPLOYMENT_VERSION_LABEL: &str = "syndesis.io/deployment-version";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPhase {
    New,
    Pending,
    Running,
    Complete,
    Failed,
    Error,
    Cancelled,
    Other(String),
}

impl BuildPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "New" => BuildPhase::New,
            "Pending" => BuildPhase::Pending,
            "Running" => BuildPhase::Running,
            "Complete" => BuildPhase::Complete,
            "Failed" => BuildPhase::Failed,
            "Error" => BuildPhase::Error,
            "Cancelled" => BuildPhase::Cancelled,
            other => BuildPhase::Other(other.to_string()),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BuildPhase::Complete)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BuildPhase::Failed | BuildPhase::Error)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildPhase::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub name: String,
    pub phase: BuildPhase,
    pub message: Option<String>,
    pub log_snippet: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub completion_timestamp: Option<DateTime<Utc>>,
}

impl BuildInfo {
    pub fn build_number(&self) -> Option<u64> {
        self.annotations
            .get(BUILD_NUMBER_ANNOTATION)
            .and_then(|n| n.parse().ok())
    }

    pub fn deployment_version(&self) -> Option<u64> {
        self.labels
            .get(DEPLOYMENT_VERSION_LABEL)
            .and_then(|n| n.parse().ok())
    }
}

#[derive(Debug, Clone)]
pub struct BuildConfigInfo {
    pub name: String,
    pub last_version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub kind: String,
    pub status: ConditionStatus,
    pub last_transition_time: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeploymentInfo {
    pub name: String,
    pub latest_version: u64,
    pub conditions: Vec<Condition>,
}

impl DeploymentInfo {
    pub fn condition(&self, kind: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }
}

#[derive(Debug, Clone)]
pub struct ReplicationControllerInfo {
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub template_labels: BTreeMap<String, String>,
    pub replicas: u32,
}

impl ReplicationControllerInfo {
    pub fn latest_version(&self) -> Option<u64> {
        self.annotations
            .get(LATEST_VERSION_ANNOTATION)
            .and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: String,
    pub cluster_ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub name: String,
    pub host: Option<String>,
    pub path: Option<String>,
    pub target_port: Option<String>,
    pub target: String,
    pub tls: bool,
}

/// Kinds of platform object the engine creates and tears down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Route,
    Service,
    Build,
    Pod,
    ImageStream,
    ReplicationController,
    DeploymentConfig,
    Secret,
    BuildConfig,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Route => "route",
            ResourceKind::Service => "service",
            ResourceKind::Build => "build",
            ResourceKind::Pod => "pod",
            ResourceKind::ImageStream => "imagestream",
            ResourceKind::ReplicationController => "replicationcontroller",
            ResourceKind::DeploymentConfig => "deploymentconfig",
            ResourceKind::Secret => "secret",
            ResourceKind::BuildConfig => "buildconfig",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which objects of a kind an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Name(String),
    /// Everything labelled `application=<value>`.
    Application(String),
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Name(name) => write!(f, "{name}"),
            Selector::Application(app) => write!(f, "application={app}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildConfigSpec {
    pub name: String,
    pub application: String,
    pub builder_image_stream: String,
    pub output_image_stream: String,
    pub revision: u64,
    pub env: Vec<EnvVar>,
    pub node_selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SecretSpec {
    pub name: String,
    pub application: String,
    /// Values are already base64 encoded.
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DeploymentSpec {
    pub name: String,
    pub revision: u64,
    pub env: Vec<EnvVar>,
    pub memory: String,
    pub cpu: String,
    pub ports: Vec<ProtocolType>,
}

#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub protocols: Vec<ProtocolType>,
}

#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub name: String,
    pub service: String,
    pub protocol: ProtocolType,
    pub application: String,
    pub description: String,
    pub edge_tls: bool,
}
