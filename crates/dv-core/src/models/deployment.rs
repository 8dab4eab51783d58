use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    Deploying,
    Running,
    Failed,
    #[default]
    #[serde(rename = "NOTFOUND")]
    NotFound,
}

impl DeploymentState {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentState::Deploying => "DEPLOYING",
            DeploymentState::Running => "RUNNING",
            DeploymentState::Failed => "FAILED",
            DeploymentState::NotFound => "NOTFOUND",
        }
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network protocols a published virtualization can serve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    Odata,
    Jdbc,
    Pg,
    Jolokia,
    Prometheus,
}

impl ProtocolType {
    pub const ALL: [ProtocolType; 5] = [
        ProtocolType::Odata,
        ProtocolType::Jdbc,
        ProtocolType::Pg,
        ProtocolType::Jolokia,
        ProtocolType::Prometheus,
    ];

    /// Protocols that may be reached through an external route.
    pub const ROUTABLE: [ProtocolType; 3] =
        [ProtocolType::Odata, ProtocolType::Jdbc, ProtocolType::Pg];

    pub fn id(self) -> &'static str {
        match self {
            ProtocolType::Odata => "odata",
            ProtocolType::Jdbc => "jdbc",
            ProtocolType::Pg => "pg",
            ProtocolType::Jolokia => "jolokia",
            ProtocolType::Prometheus => "prometheus",
        }
    }

    /// Port the container listens on.
    pub fn source_port(self) -> u16 {
        match self {
            ProtocolType::Odata => 8080,
            ProtocolType::Jdbc => 31000,
            ProtocolType::Pg => 35432,
            ProtocolType::Jolokia => 8778,
            ProtocolType::Prometheus => 9779,
        }
    }

    /// Port the network service exposes.
    pub fn target_port(self) -> u16 {
        match self {
            ProtocolType::Odata => 80,
            other => other.source_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    pub name: String,
    pub protocol: ProtocolType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub target: String,
    pub secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub status: DeploymentState,
    pub status_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Consumers referencing the service. Only current while `Running`.
    pub used_by: Vec<String>,
    /// Exposed endpoints. Only current while `Running`.
    pub routes: Vec<RouteStatus>,
}

impl DeploymentStatus {
    pub fn is_running(&self) -> bool {
        self.status == DeploymentState::Running
    }
}
