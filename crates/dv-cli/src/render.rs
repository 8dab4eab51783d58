use chrono::{DateTime, Utc};

use dv_core::models::{BuildStatus, DeploymentState, RouteStatus, Status, VirtualizationStatus};

/// One line per observed change while following a request.
pub fn status_line(status: &BuildStatus) -> String {
    let line = format!(
        "{} {:<16} {:<9} {}",
        status.last_updated.format("%H:%M:%S"),
        status.status.as_str(),
        status.deployment_status.status.as_str(),
        status.status_message
    );
    line.trim_end().to_string()
}

/// Drops updates that only refreshed the timestamp.
#[derive(Debug, Default)]
pub struct Progress {
    last: Option<(Status, DeploymentState, String)>,
}

impl Progress {
    pub fn observe(&mut self, status: &BuildStatus) -> Option<String> {
        let key = (
            status.status,
            status.deployment_status.status,
            status.status_message.clone(),
        );
        if self.last.as_ref() == Some(&key) {
            return None;
        }
        self.last = Some(key);
        Some(status_line(status))
    }
}

pub fn summary(status: &VirtualizationStatus, now: DateTime<Utc>) -> String {
    let build = status.build_status();
    let deployment = status.deployment_status();

    let mut lines = vec![
        detail_line(
            "Name",
            &format!("{} ({})", build.name, build.service_id()),
        ),
        detail_line("Namespace", &build.namespace),
        detail_line("Build", &with_message(build.status.as_str(), &build.status_message)),
        detail_line(
            "Updated",
            &format!(
                "{} ago",
                format_duration(now.signed_duration_since(build.last_updated))
            ),
        ),
    ];
    if let Some(revision) = build.revision {
        lines.push(detail_line("Revision", &revision.to_string()));
    }
    if let Some(ref build_name) = build.build_name {
        lines.push(detail_line("Build Name", build_name));
    }

    lines.push(detail_line(
        "Deployment",
        &with_message(deployment.status.as_str(), &deployment.status_message),
    ));
    if let Some(version) = deployment.version {
        lines.push(detail_line("Version", &version.to_string()));
    }
    if !deployment.used_by.is_empty() {
        lines.push(detail_line("Used By", &deployment.used_by.join(", ")));
    }
    for route in &deployment.routes {
        lines.push(detail_line("Route", &route_url(route)));
    }

    lines.join("\n")
}

pub fn route_url(route: &RouteStatus) -> String {
    let scheme = if route.secure { "https" } else { "http" };
    let host = route.host.as_deref().unwrap_or("-");
    let path = route.path.as_deref().unwrap_or("");
    format!("{}: {scheme}://{host}{path}", route.protocol.id())
}

fn with_message(state: &str, message: &str) -> String {
    if message.is_empty() {
        state.to_string()
    } else {
        format!("{state}  {message}")
    }
}

fn format_duration(d: chrono::Duration) -> String {
    let total_secs = d.num_seconds().max(0);
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{hours}h {mins:02}m")
    } else if mins > 0 {
        format!("{mins}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}

fn detail_line(label: &str, value: &str) -> String {
    format!("{label:<11}{value}")
}
