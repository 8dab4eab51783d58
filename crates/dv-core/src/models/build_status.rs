use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::deployment::DeploymentStatus;
use super::publish::PublishConfiguration;

/// Lifecycle of a publish or delete request for one service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Submitted,
    Configuring,
    Building,
    Complete,
    Cancelled,
    Failed,
    DeleteSubmitted,
    DeleteRequeue,
    DeleteDone,
    #[serde(rename = "NOTFOUND")]
    NotFound,
}

impl Status {
    /// States from which a new publish may start.
    pub fn accepts_publish(self) -> bool {
        matches!(
            self,
            Status::Failed
                | Status::NotFound
                | Status::Cancelled
                | Status::DeleteDone
                | Status::Complete
        )
    }

    /// States for which a delete request is a no-op.
    pub fn ignores_delete(self) -> bool {
        matches!(
            self,
            Status::NotFound | Status::DeleteDone | Status::DeleteSubmitted
        )
    }

    /// States the monitor never reschedules.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Cancelled | Status::Failed | Status::DeleteDone | Status::NotFound
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Submitted => "SUBMITTED",
            Status::Configuring => "CONFIGURING",
            Status::Building => "BUILDING",
            Status::Complete => "COMPLETE",
            Status::Cancelled => "CANCELLED",
            Status::Failed => "FAILED",
            Status::DeleteSubmitted => "DELETE_SUBMITTED",
            Status::DeleteRequeue => "DELETE_REQUEUE",
            Status::DeleteDone => "DELETE_DONE",
            Status::NotFound => "NOTFOUND",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    service_id: String,
    /// Logical virtualization name the service id was derived from.
    pub name: String,
    pub status: Status,
    pub status_message: String,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_name: Option<String>,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_pod_name: Option<String>,
    pub deployment_status: DeploymentStatus,
    #[serde(skip)]
    pub publish_configuration: Option<PublishConfiguration>,
}

impl BuildStatus {
    pub fn new(service_id: String, name: String, namespace: String) -> Self {
        Self {
            service_id,
            name,
            status: Status::NotFound,
            status_message: String::new(),
            last_updated: Utc::now(),
            build_name: None,
            namespace,
            revision: None,
            publish_pod_name: None,
            deployment_status: DeploymentStatus::default(),
            publish_configuration: None,
        }
    }

    /// A freshly accepted publish request.
    pub fn submitted(service_id: String, namespace: String, config: PublishConfiguration) -> Self {
        let mut status = Self::new(service_id, config.name.clone(), namespace);
        status.revision = Some(config.revision);
        status.publish_configuration = Some(config);
        status.transition(Status::Submitted, "Submitted build for configuration");
        status
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Move to `status`, recording the message and the transition time.
    pub fn transition(&mut self, status: Status, message: impl Into<String>) {
        self.status = status;
        self.status_message = message.into();
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_gate_matches_terminal_set() {
        let accepting = [
            Status::Failed,
            Status::NotFound,
            Status::Cancelled,
            Status::DeleteDone,
            Status::Complete,
        ];
        for s in accepting {
            assert!(s.accepts_publish(), "{s} should accept a publish");
        }
        for s in [
            Status::Submitted,
            Status::Configuring,
            Status::Building,
            Status::DeleteSubmitted,
            Status::DeleteRequeue,
        ] {
            assert!(!s.accepts_publish(), "{s} should reject a publish");
        }
    }

    #[test]
    fn complete_is_not_terminal_for_the_monitor() {
        assert!(!Status::Complete.is_terminal());
        assert!(!Status::DeleteRequeue.is_terminal());
        assert!(Status::DeleteDone.is_terminal());
    }

    #[test]
    fn status_serializes_in_upper_snake_case() {
        let json = serde_json::to_string(&Status::DeleteRequeue).unwrap();
        assert_eq!(json, "\"DELETE_REQUEUE\"");
        assert_eq!(Status::NotFound.to_string(), "NOTFOUND");
    }

    #[test]
    fn transition_updates_timestamp() {
        let mut status = BuildStatus::new("dv-a".into(), "a".into(), "ns".into());
        let before = status.last_updated;
        std::thread::sleep(std::time::Duration::from_millis(2));
        status.transition(Status::Building, "Build Running");
        assert_eq!(status.status, Status::Building);
        assert_eq!(status.status_message, "Build Running");
        assert!(status.last_updated > before);
    }
}
