//! `PlatformGateway` backed by the `oc` command line client.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::models::platform::{
    BuildConfigInfo, BuildConfigSpec, BuildInfo, BuildPhase, Condition, ConditionStatus,
    DeploymentInfo, DeploymentSpec, ReplicationControllerInfo, ResourceKind, RouteInfo, RouteSpec,
    Selector, SecretSpec, ServiceInfo, ServiceSpec, DEPLOYMENT_VERSION_LABEL,
};
use crate::models::{EnvVar, ProtocolType};

use super::platform::{PlatformError, PlatformGateway, PlatformResult};

const HEALTH_PATH: &str = "/actuator/health";
const HEALTH_PORT: u16 = 8080;

pub struct OcGateway {
    binary: String,
    work_directory: PathBuf,
}

impl OcGateway {
    pub fn new(binary: impl Into<String>, work_directory: PathBuf) -> Self {
        Self {
            binary: binary.into(),
            work_directory,
        }
    }

    async fn run_oc(&self, args: &[&str], input: Option<&[u8]>) -> PlatformResult<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| PlatformError::Request(format!("failed to run {}: {e}", self.binary)))?;

        if let Some(bytes) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(bytes)
                    .await
                    .map_err(|e| PlatformError::Request(format!("failed to write stdin: {e}")))?;
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PlatformError::Request(format!("failed to wait for oc: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlatformError::Request(format!(
                "oc {} failed (exit {}): {}",
                args.first().copied().unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn get_object(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> PlatformResult<Option<Value>> {
        let args = ["get", kind.as_str(), name, "-n", namespace, "-o", "json"];
        match self.run_oc(&args, None).await {
            Ok(out) => Ok(Some(parse_json(&out)?)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_objects(
        &self,
        namespace: &str,
        kind: ResourceKind,
        application: &str,
    ) -> PlatformResult<Vec<Value>> {
        let label = format!("application={application}");
        let args = ["get", kind.as_str(), "-n", namespace, "-l", &label, "-o", "json"];
        let out = self.run_oc(&args, None).await?;
        let list = parse_json(&out)?;
        Ok(list
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply(&self, namespace: &str, manifest: &Value) -> PlatformResult<Value> {
        let body = serde_json::to_vec(manifest)
            .map_err(|e| PlatformError::Request(format!("failed to encode manifest: {e}")))?;
        let out = self
            .run_oc(&["apply", "-n", namespace, "-o", "json", "-f", "-"], Some(&body))
            .await?;
        parse_json(&out)
    }
}

fn is_missing(err: &PlatformError) -> bool {
    match err {
        PlatformError::NotFound { .. } => true,
        PlatformError::Request(msg) => msg.contains("NotFound") || msg.contains("not found"),
        _ => false,
    }
}

fn parse_json(out: &str) -> PlatformResult<Value> {
    serde_json::from_str(out).map_err(|e| PlatformError::Response(e.to_string()))
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_str)
}

fn u64_at(value: &Value, path: &[&str]) -> Option<u64> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_u64)
}

fn map_at(value: &Value, path: &[&str]) -> BTreeMap<String, String> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn time_at(value: &Value, path: &[&str]) -> Option<DateTime<Utc>> {
    str_at(value, path)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn name_of(value: &Value) -> PlatformResult<String> {
    str_at(value, &["metadata", "name"])
        .map(str::to_string)
        .ok_or_else(|| PlatformError::Response("object has no metadata.name".into()))
}

pub fn parse_build(value: &Value) -> PlatformResult<BuildInfo> {
    Ok(BuildInfo {
        name: name_of(value)?,
        phase: BuildPhase::parse(str_at(value, &["status", "phase"]).unwrap_or("New")),
        message: str_at(value, &["status", "message"]).map(str::to_string),
        log_snippet: str_at(value, &["status", "logSnippet"]).map(str::to_string),
        labels: map_at(value, &["metadata", "labels"]),
        annotations: map_at(value, &["metadata", "annotations"]),
        completion_timestamp: time_at(value, &["status", "completionTimestamp"]),
    })
}

pub fn parse_build_config(value: &Value) -> PlatformResult<BuildConfigInfo> {
    Ok(BuildConfigInfo {
        name: name_of(value)?,
        last_version: u64_at(value, &["status", "lastVersion"]).unwrap_or(0),
    })
}

pub fn parse_deployment(value: &Value) -> PlatformResult<DeploymentInfo> {
    let conditions = value
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| {
                    Some(Condition {
                        kind: str_at(c, &["type"])?.to_string(),
                        status: ConditionStatus::parse(str_at(c, &["status"]).unwrap_or("")),
                        last_transition_time: time_at(c, &["lastTransitionTime"]),
                        message: str_at(c, &["message"]).map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(DeploymentInfo {
        name: name_of(value)?,
        latest_version: u64_at(value, &["status", "latestVersion"]).unwrap_or(0),
        conditions,
    })
}

pub fn parse_replication_controller(value: &Value) -> PlatformResult<ReplicationControllerInfo> {
    Ok(ReplicationControllerInfo {
        name: name_of(value)?,
        annotations: map_at(value, &["metadata", "annotations"]),
        template_labels: map_at(value, &["spec", "template", "metadata", "labels"]),
        replicas: u64_at(value, &["status", "replicas"]).unwrap_or(0) as u32,
    })
}

pub fn parse_service(value: &Value) -> PlatformResult<ServiceInfo> {
    Ok(ServiceInfo {
        name: name_of(value)?,
        cluster_ip: str_at(value, &["spec", "clusterIP"]).map(str::to_string),
    })
}

pub fn parse_route(value: &Value) -> PlatformResult<RouteInfo> {
    let target_port = value
        .get("spec")
        .and_then(|s| s.get("port"))
        .and_then(|p| p.get("targetPort"))
        .and_then(|t| match t {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    Ok(RouteInfo {
        name: name_of(value)?,
        host: str_at(value, &["spec", "host"]).map(str::to_string),
        path: str_at(value, &["spec", "path"]).map(str::to_string),
        target_port,
        target: str_at(value, &["spec", "to", "name"])
            .unwrap_or_default()
            .to_string(),
        tls: value
            .get("spec")
            .and_then(|s| s.get("tls"))
            .is_some_and(|t| !t.is_null()),
    })
}

fn env_json(env: &[EnvVar]) -> Value {
    Value::Array(
        env.iter()
            .map(|var| match &var.secret_ref {
                Some(secret) => json!({
                    "name": var.name,
                    "valueFrom": {
                        "secretKeyRef": { "name": secret.name, "key": secret.key, "optional": false }
                    }
                }),
                None => json!({ "name": var.name, "value": var.value.clone().unwrap_or_default() }),
            })
            .collect(),
    )
}

pub fn image_stream_manifest(name: &str) -> Value {
    json!({
        "apiVersion": "image.openshift.io/v1",
        "kind": "ImageStream",
        "metadata": { "name": name, "labels": { "application": name } }
    })
}

pub fn build_config_manifest(namespace: &str, spec: &BuildConfigSpec) -> Value {
    json!({
        "apiVersion": "build.openshift.io/v1",
        "kind": "BuildConfig",
        "metadata": {
            "name": spec.name,
            "labels": {
                "application": spec.application,
                "managed-by": "syndesis",
                DEPLOYMENT_VERSION_LABEL: spec.revision.to_string(),
            }
        },
        "spec": {
            "runPolicy": "SerialLatestOnly",
            "source": { "type": "Binary" },
            "strategy": {
                "type": "Source",
                "sourceStrategy": {
                    "from": {
                        "kind": "ImageStreamTag",
                        "name": spec.builder_image_stream,
                        "namespace": namespace,
                    },
                    "incremental": false,
                    "env": env_json(&spec.env),
                }
            },
            "output": {
                "to": { "kind": "ImageStreamTag", "name": format!("{}:latest", spec.output_image_stream) }
            },
            "nodeSelector": spec.node_selector,
        }
    })
}

pub fn secret_manifest(spec: &SecretSpec) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": spec.name, "labels": { "application": spec.application } },
        "data": spec.data,
    })
}

fn probe() -> Value {
    json!({
        "httpGet": { "port": HEALTH_PORT, "path": HEALTH_PATH },
        "initialDelaySeconds": 30,
        "timeoutSeconds": 5,
        "periodSeconds": 20,
        "failureThreshold": 5,
        "successThreshold": 1,
    })
}

pub fn deployment_manifest(spec: &DeploymentSpec) -> Value {
    let name = &spec.name;
    let ports: Vec<Value> = spec
        .ports
        .iter()
        .map(|p| json!({ "name": p.id(), "containerPort": p.source_port(), "protocol": "TCP" }))
        .collect();
    json!({
        "apiVersion": "apps.openshift.io/v1",
        "kind": "DeploymentConfig",
        "metadata": { "name": name, "labels": { "application": name } },
        "spec": {
            "replicas": 1,
            "strategy": { "type": "Recreate" },
            "triggers": [
                { "type": "ConfigChange" },
                {
                    "type": "ImageChange",
                    "imageChangeParams": {
                        "automatic": true,
                        "containerNames": [name],
                        "from": { "kind": "ImageStreamTag", "name": format!("{name}:latest") }
                    }
                }
            ],
            "selector": { "deploymentConfig": name },
            "template": {
                "metadata": {
                    "name": name,
                    "labels": {
                        "application": name,
                        "deploymentConfig": name,
                        "syndesis.io/type": "datavirtualization",
                        DEPLOYMENT_VERSION_LABEL: spec.revision.to_string(),
                    },
                    "annotations": {
                        "prometheus.io/scrape": "true",
                        "prometheus.io/port": ProtocolType::Prometheus.target_port().to_string(),
                    }
                },
                "spec": {
                    "containers": [{
                        "name": name,
                        "image": " ",
                        "imagePullPolicy": "Always",
                        "env": env_json(&spec.env),
                        "readinessProbe": probe(),
                        "livenessProbe": probe(),
                        "resources": { "limits": { "memory": spec.memory, "cpu": spec.cpu } },
                        "ports": ports,
                    }]
                }
            }
        }
    })
}

pub fn service_manifest(spec: &ServiceSpec) -> Value {
    let ports: Vec<Value> = spec
        .protocols
        .iter()
        .map(|p| json!({ "name": p.id(), "port": p.target_port(), "targetPort": p.id() }))
        .collect();
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": spec.name,
            "labels": spec.labels,
            "annotations": spec.annotations,
        },
        "spec": {
            "sessionAffinity": "ClientIP",
            "selector": { "application": spec.name },
            "ports": ports,
        }
    })
}

pub fn route_manifest(spec: &RouteSpec) -> Value {
    let mut route = json!({
        "apiVersion": "route.openshift.io/v1",
        "kind": "Route",
        "metadata": {
            "name": spec.name,
            "labels": { "application": spec.application },
            "annotations": { "description": spec.description },
        },
        "spec": {
            "port": { "targetPort": spec.protocol.id() },
            "to": { "kind": "Service", "name": spec.service },
        }
    });
    if spec.edge_tls {
        route["spec"]["tls"] = json!({ "termination": "edge" });
    }
    route
}

fn selector_args(selector: &Selector) -> Vec<String> {
    match selector {
        Selector::Name(name) => vec![name.clone()],
        Selector::Application(app) => vec!["-l".to_string(), format!("application={app}")],
    }
}

#[async_trait]
impl PlatformGateway for OcGateway {
    async fn create_image_stream(&self, namespace: &str, name: &str) -> PlatformResult<()> {
        self.apply(namespace, &image_stream_manifest(name)).await?;
        Ok(())
    }

    async fn create_build_config(
        &self,
        namespace: &str,
        spec: &BuildConfigSpec,
    ) -> PlatformResult<()> {
        self.apply(namespace, &build_config_manifest(namespace, spec))
            .await?;
        Ok(())
    }

    async fn get_build_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<BuildConfigInfo>> {
        self.get_object(namespace, ResourceKind::BuildConfig, name)
            .await?
            .map(|v| parse_build_config(&v))
            .transpose()
    }

    async fn start_binary_build(
        &self,
        namespace: &str,
        build_config: &str,
        archive: Vec<u8>,
    ) -> PlatformResult<BuildInfo> {
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let archive_path = self.work_directory.join(format!("{build_config}-{stamp}.tar"));
        tokio::fs::write(&archive_path, &archive)
            .await
            .map_err(|e| PlatformError::Request(format!("failed to stage archive: {e}")))?;

        let from_archive = format!("--from-archive={}", archive_path.to_string_lossy());
        let result = self
            .run_oc(
                &["start-build", build_config, "-n", namespace, &from_archive, "-o", "name"],
                None,
            )
            .await;
        tokio::fs::remove_file(&archive_path).await.ok();

        let out = result?;
        let build_name = out
            .trim()
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PlatformError::Response(format!("no build name in '{out}'")))?
            .to_string();

        self.get_build(namespace, &build_name)
            .await?
            .ok_or(PlatformError::NotFound {
                kind: ResourceKind::Build,
                name: build_name,
            })
    }

    async fn get_build(&self, namespace: &str, name: &str) -> PlatformResult<Option<BuildInfo>> {
        self.get_object(namespace, ResourceKind::Build, name)
            .await?
            .map(|v| parse_build(&v))
            .transpose()
    }

    async fn list_builds(
        &self,
        namespace: &str,
        application: &str,
    ) -> PlatformResult<Vec<BuildInfo>> {
        self.list_objects(namespace, ResourceKind::Build, application)
            .await?
            .iter()
            .map(parse_build)
            .collect()
    }

    async fn wait_for_pod_ready(
        &self,
        namespace: &str,
        pod: &str,
        timeout: Duration,
    ) -> PlatformResult<()> {
        let target = format!("pod/{pod}");
        let timeout_arg = format!("--timeout={}s", timeout.as_secs().max(1));
        let args = [
            "wait",
            &target,
            "-n",
            namespace,
            "--for=condition=Ready",
            &timeout_arg,
        ];
        let wait = self.run_oc(&args, None);
        match tokio::time::timeout(timeout + Duration::from_secs(5), wait).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(PlatformError::Timeout(target)),
        }
    }

    async fn apply_secret(&self, namespace: &str, spec: &SecretSpec) -> PlatformResult<()> {
        self.apply(namespace, &secret_manifest(spec)).await?;
        Ok(())
    }

    async fn apply_deployment(
        &self,
        namespace: &str,
        spec: &DeploymentSpec,
    ) -> PlatformResult<DeploymentInfo> {
        let applied = self.apply(namespace, &deployment_manifest(spec)).await?;
        parse_deployment(&applied)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<DeploymentInfo>> {
        self.get_object(namespace, ResourceKind::DeploymentConfig, name)
            .await?
            .map(|v| parse_deployment(&v))
            .transpose()
    }

    async fn redeploy(&self, namespace: &str, name: &str) -> PlatformResult<()> {
        let target = format!("dc/{name}");
        self.run_oc(&["rollout", "latest", &target, "-n", namespace], None)
            .await?;
        Ok(())
    }

    async fn list_replication_controllers(
        &self,
        namespace: &str,
        application: &str,
    ) -> PlatformResult<Vec<ReplicationControllerInfo>> {
        self.list_objects(namespace, ResourceKind::ReplicationController, application)
            .await?
            .iter()
            .map(parse_replication_controller)
            .collect()
    }

    async fn get_service(&self, namespace: &str, name: &str) -> PlatformResult<Option<ServiceInfo>> {
        self.get_object(namespace, ResourceKind::Service, name)
            .await?
            .map(|v| parse_service(&v))
            .transpose()
    }

    async fn create_service(
        &self,
        namespace: &str,
        spec: &ServiceSpec,
    ) -> PlatformResult<ServiceInfo> {
        let applied = self.apply(namespace, &service_manifest(spec)).await?;
        parse_service(&applied)
    }

    async fn get_route(&self, namespace: &str, name: &str) -> PlatformResult<Option<RouteInfo>> {
        self.get_object(namespace, ResourceKind::Route, name)
            .await?
            .map(|v| parse_route(&v))
            .transpose()
    }

    async fn create_route(&self, namespace: &str, spec: &RouteSpec) -> PlatformResult<RouteInfo> {
        let applied = self.apply(namespace, &route_manifest(spec)).await?;
        parse_route(&applied)
    }

    async fn delete(
        &self,
        namespace: &str,
        kind: ResourceKind,
        selector: &Selector,
    ) -> PlatformResult<()> {
        let mut args: Vec<String> = vec!["delete".into(), kind.as_str().into()];
        args.extend(selector_args(selector));
        args.extend(["-n".into(), namespace.into(), "--ignore-not-found".into()]);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_oc(&args, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build_phase_and_labels() {
        let build = parse_build(&json!({
            "metadata": {
                "name": "dv-orders-build-config-2",
                "labels": { DEPLOYMENT_VERSION_LABEL: "7" },
                "annotations": { "openshift.io/build.number": "2" }
            },
            "status": {
                "phase": "Failed",
                "message": "compile error",
                "completionTimestamp": "2025-06-15T12:00:00Z"
            }
        }))
        .unwrap();
        assert_eq!(build.name, "dv-orders-build-config-2");
        assert!(build.phase.is_failed());
        assert_eq!(build.message.as_deref(), Some("compile error"));
        assert_eq!(build.deployment_version(), Some(7));
        assert_eq!(build.build_number(), Some(2));
        assert!(build.completion_timestamp.is_some());
    }

    #[test]
    fn parses_deployment_conditions() {
        let dc = parse_deployment(&json!({
            "metadata": { "name": "dv-orders" },
            "status": {
                "latestVersion": 4,
                "conditions": [
                    { "type": "Available", "status": "True", "lastTransitionTime": "2025-06-15T12:00:10Z", "message": "ok" },
                    { "type": "Progressing", "status": "False", "lastTransitionTime": "2025-06-15T12:00:00Z" }
                ]
            }
        }))
        .unwrap();
        assert_eq!(dc.latest_version, 4);
        let available = dc.condition("Available").unwrap();
        assert_eq!(available.status, ConditionStatus::True);
        assert_eq!(available.message.as_deref(), Some("ok"));
        assert_eq!(
            dc.condition("Progressing").unwrap().status,
            ConditionStatus::False
        );
        assert!(dc.condition("ReplicaFailure").is_none());
    }

    #[test]
    fn parses_route_with_named_port_and_tls() {
        let route = parse_route(&json!({
            "metadata": { "name": "dv-orders-odata" },
            "spec": {
                "host": "orders.apps.example.com",
                "port": { "targetPort": "odata" },
                "to": { "name": "dv-orders" },
                "tls": { "termination": "edge" }
            }
        }))
        .unwrap();
        assert_eq!(route.target_port.as_deref(), Some("odata"));
        assert_eq!(route.target, "dv-orders");
        assert!(route.tls);
        assert!(route.path.is_none());
    }

    #[test]
    fn object_without_name_is_rejected() {
        assert!(parse_service(&json!({ "spec": {} })).is_err());
    }

    #[test]
    fn route_manifest_is_edge_terminated() {
        let manifest = route_manifest(&RouteSpec {
            name: "dv-orders-odata".into(),
            service: "dv-orders".into(),
            protocol: ProtocolType::Odata,
            application: "dv-orders".into(),
            description: "Virtual Database (VDB)".into(),
            edge_tls: true,
        });
        assert_eq!(manifest["spec"]["tls"]["termination"], "edge");
        assert_eq!(manifest["spec"]["port"]["targetPort"], "odata");
        assert_eq!(manifest["spec"]["to"]["name"], "dv-orders");
    }

    #[test]
    fn deployment_manifest_carries_revision_and_secret_env() {
        let manifest = deployment_manifest(&DeploymentSpec {
            name: "dv-orders".into(),
            revision: 3,
            env: vec![
                EnvVar::literal("VDB_FILE", "orders-vdb.xml"),
                EnvVar::from_secret("PG_URL", "dv-orders-secret", "pg.url"),
            ],
            memory: "1024Mi".into(),
            cpu: "500m".into(),
            ports: vec![ProtocolType::Prometheus, ProtocolType::Jdbc],
        });
        let template = &manifest["spec"]["template"];
        assert_eq!(template["metadata"]["labels"][DEPLOYMENT_VERSION_LABEL], "3");
        let container = &template["spec"]["containers"][0];
        assert_eq!(container["env"][0]["value"], "orders-vdb.xml");
        assert_eq!(
            container["env"][1]["valueFrom"]["secretKeyRef"]["name"],
            "dv-orders-secret"
        );
        assert_eq!(container["ports"].as_array().unwrap().len(), 2);
        assert_eq!(container["resources"]["limits"]["memory"], "1024Mi");
    }

    #[test]
    fn selector_args_for_label_and_name() {
        assert_eq!(selector_args(&Selector::Name("x".into())), vec!["x"]);
        assert_eq!(
            selector_args(&Selector::Application("dv-orders".into())),
            vec!["-l", "application=dv-orders"]
        );
    }

    #[test]
    fn missing_object_errors_are_recognised() {
        let err = PlatformError::Request(
            "oc get failed (exit 1): Error from server (NotFound): builds \"x\" not found".into(),
        );
        assert!(is_missing(&err));
        assert!(!is_missing(&PlatformError::Request("forbidden".into())));
    }
}
