// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use dv_core::models::platform::{
    BuildConfigInfo, BuildConfigSpec, BuildInfo, BuildPhase, Condition, ConditionStatus,
    DeploymentInfo, DeploymentSpec, ReplicationControllerInfo, ResourceKind, RouteInfo, RouteSpec,
    SecretSpec, Selector, ServiceInfo, ServiceSpec, BUILD_NUMBER_ANNOTATION,
    DEPLOYMENT_VERSION_LABEL, LATEST_VERSION_ANNOTATION,
};
use dv_core::models::{
    BuildStatus, Model, OrchestratorConfig, PublishConfiguration, SourceConfig, VirtualDatabase,
};
use dv_core::services::platform::{PlatformError, PlatformGateway, PlatformResult};
use dv_core::services::registrar::{
    Connection, ConnectionDescriptor, ConnectionRegistrar, RegistrarError, RegistrarResult,
};
use dv_core::services::sources::{ConfigSourceCatalog, TemplateInputGenerator};
use dv_core::{Orchestrator, StatusUpdate};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct PlatformState {
    image_streams: HashSet<String>,
    build_configs: HashMap<String, (BuildConfigSpec, u64)>,
    builds: Vec<BuildInfo>,
    secrets: HashMap<String, SecretSpec>,
    deployments: HashMap<String, DeploymentInfo>,
    controllers: Vec<(String, ReplicationControllerInfo)>,
    services: HashMap<String, ServiceInfo>,
    routes: HashMap<String, RouteInfo>,
    build_outcome: Option<(BuildPhase, String)>,
    conditions: Option<Vec<Condition>>,
    pod_ready_delay: Duration,
    failing_deletes: HashMap<ResourceKind, usize>,
    read_faults: HashMap<String, (ReadFault, usize)>,
    deletes: Vec<(ResourceKind, Selector)>,
    builds_started: usize,
}

/// How a faulty read of a build or deployment behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFault {
    /// The platform cannot be reached.
    Fail,
    /// The gateway blows up mid-call.
    Panic,
}

/// In-memory platform. Builds finish as soon as they start, with the phase
/// set through [`FakePlatform::set_build_outcome`] (default: complete).
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_build_outcome(&self, phase: BuildPhase, message: &str) {
        self.state.lock().unwrap().build_outcome = Some((phase, message.to_string()));
    }

    pub fn set_deployment_conditions(&self, conditions: Vec<Condition>) {
        self.state.lock().unwrap().conditions = Some(conditions);
    }

    /// Keep the configuring step busy for `delay`.
    pub fn set_pod_ready_delay(&self, delay: Duration) {
        self.state.lock().unwrap().pod_ready_delay = delay;
    }

    /// Make the next `times` deletes of `kind` fail.
    pub fn fail_deletes(&self, kind: ResourceKind, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(kind, times);
    }

    /// Make the next `times` reads of the build or deployment called `name`
    /// misbehave.
    pub fn fault_reads(&self, name: &str, fault: ReadFault, times: usize) {
        self.state
            .lock()
            .unwrap()
            .read_faults
            .insert(name.to_string(), (fault, times));
    }

    fn read(&self, name: &str) -> PlatformResult<()> {
        // The lock is released before panicking so later calls still work.
        let fault = {
            let mut state = self.state.lock().unwrap();
            match state.read_faults.get_mut(name) {
                Some((fault, remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*fault)
                }
                _ => None,
            }
        };
        match fault {
            Some(ReadFault::Fail) => Err(PlatformError::Request(format!(
                "simulated failure reading {name}"
            ))),
            Some(ReadFault::Panic) => panic!("simulated crash reading {name}"),
            None => Ok(()),
        }
    }

    pub fn delete_calls(&self) -> Vec<(ResourceKind, Selector)> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn builds_started(&self) -> usize {
        self.state.lock().unwrap().builds_started
    }

    pub fn has_deployment(&self, name: &str) -> bool {
        self.state.lock().unwrap().deployments.contains_key(name)
    }

    pub fn has_route(&self, name: &str) -> bool {
        self.state.lock().unwrap().routes.contains_key(name)
    }

    pub fn secret(&self, name: &str) -> Option<SecretSpec> {
        self.state.lock().unwrap().secrets.get(name).cloned()
    }
}

pub fn condition(kind: &str, status: ConditionStatus, seconds_ago: i64) -> Condition {
    Condition {
        kind: kind.to_string(),
        status,
        last_transition_time: Some(Utc::now() - chrono::Duration::seconds(seconds_ago)),
        message: Some(format!("{kind} is {status:?}")),
    }
}

fn healthy_conditions() -> Vec<Condition> {
    vec![
        condition("Available", ConditionStatus::True, 5),
        condition("Progressing", ConditionStatus::True, 10),
    ]
}

fn not_found(kind: ResourceKind, name: &str) -> PlatformError {
    PlatformError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn matches(selector: &Selector, name: &str, application: Option<&str>) -> bool {
    match selector {
        Selector::Name(n) => n == name,
        Selector::Application(app) => application == Some(app.as_str()),
    }
}

#[async_trait]
impl PlatformGateway for FakePlatform {
    async fn create_image_stream(&self, _: &str, name: &str) -> PlatformResult<()> {
        self.state
            .lock()
            .unwrap()
            .image_streams
            .insert(name.to_string());
        Ok(())
    }

    async fn create_build_config(&self, _: &str, spec: &BuildConfigSpec) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        let version = state
            .build_configs
            .get(&spec.name)
            .map(|(_, v)| *v)
            .unwrap_or(0);
        state
            .build_configs
            .insert(spec.name.clone(), (spec.clone(), version));
        Ok(())
    }

    async fn get_build_config(&self, _: &str, name: &str) -> PlatformResult<Option<BuildConfigInfo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .build_configs
            .get(name)
            .map(|(_, version)| BuildConfigInfo {
                name: name.to_string(),
                last_version: *version,
            }))
    }

    async fn start_binary_build(
        &self,
        _: &str,
        build_config: &str,
        archive: Vec<u8>,
    ) -> PlatformResult<BuildInfo> {
        assert!(!archive.is_empty(), "binary build without content");
        let mut state = self.state.lock().unwrap();
        let (spec, version) = state
            .build_configs
            .get_mut(build_config)
            .ok_or_else(|| not_found(ResourceKind::BuildConfig, build_config))?;
        *version += 1;
        let number = *version;
        let application = spec.application.clone();
        let revision = spec.revision;
        let (phase, message) = state
            .build_outcome
            .clone()
            .unwrap_or((BuildPhase::Complete, String::new()));
        let build = BuildInfo {
            name: format!("{build_config}-{number}"),
            completion_timestamp: phase.is_completed().then(Utc::now),
            phase,
            message: Some(message),
            log_snippet: None,
            labels: BTreeMap::from([
                ("application".to_string(), application),
                (DEPLOYMENT_VERSION_LABEL.to_string(), revision.to_string()),
            ]),
            annotations: BTreeMap::from([(BUILD_NUMBER_ANNOTATION.to_string(), number.to_string())]),
        };
        state.builds.push(build.clone());
        state.builds_started += 1;
        Ok(build)
    }

    async fn get_build(&self, _: &str, name: &str) -> PlatformResult<Option<BuildInfo>> {
        self.read(name)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .builds
            .iter()
            .find(|b| b.name == name)
            .cloned())
    }

    async fn list_builds(&self, _: &str, application: &str) -> PlatformResult<Vec<BuildInfo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .builds
            .iter()
            .filter(|b| b.labels.get("application").map(String::as_str) == Some(application))
            .cloned()
            .collect())
    }

    async fn wait_for_pod_ready(&self, _: &str, _: &str, _: Duration) -> PlatformResult<()> {
        let delay = self.state.lock().unwrap().pod_ready_delay;
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn apply_secret(&self, _: &str, spec: &SecretSpec) -> PlatformResult<()> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn apply_deployment(&self, _: &str, spec: &DeploymentSpec) -> PlatformResult<DeploymentInfo> {
        let mut state = self.state.lock().unwrap();
        let latest_version = state
            .deployments
            .get(&spec.name)
            .map(|d| d.latest_version + 1)
            .unwrap_or(1);
        let deployment = DeploymentInfo {
            name: spec.name.clone(),
            latest_version,
            conditions: state.conditions.clone().unwrap_or_else(healthy_conditions),
        };
        state
            .deployments
            .insert(spec.name.clone(), deployment.clone());
        state.controllers.push((
            spec.name.clone(),
            ReplicationControllerInfo {
                name: format!("{}-{latest_version}", spec.name),
                annotations: BTreeMap::from([(
                    LATEST_VERSION_ANNOTATION.to_string(),
                    latest_version.to_string(),
                )]),
                template_labels: BTreeMap::from([(
                    DEPLOYMENT_VERSION_LABEL.to_string(),
                    spec.revision.to_string(),
                )]),
                replicas: 1,
            },
        ));
        Ok(deployment)
    }

    async fn get_deployment(&self, _: &str, name: &str) -> PlatformResult<Option<DeploymentInfo>> {
        self.read(name)?;
        Ok(self.state.lock().unwrap().deployments.get(name).cloned())
    }

    async fn redeploy(&self, _: &str, name: &str) -> PlatformResult<()> {
        if self.state.lock().unwrap().deployments.contains_key(name) {
            Ok(())
        } else {
            Err(not_found(ResourceKind::DeploymentConfig, name))
        }
    }

    async fn list_replication_controllers(
        &self,
        _: &str,
        application: &str,
    ) -> PlatformResult<Vec<ReplicationControllerInfo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .controllers
            .iter()
            .filter(|(app, _)| app == application)
            .map(|(_, rc)| rc.clone())
            .collect())
    }

    async fn get_service(&self, _: &str, name: &str) -> PlatformResult<Option<ServiceInfo>> {
        Ok(self.state.lock().unwrap().services.get(name).cloned())
    }

    async fn create_service(&self, _: &str, spec: &ServiceSpec) -> PlatformResult<ServiceInfo> {
        let service = ServiceInfo {
            name: spec.name.clone(),
            cluster_ip: Some("10.0.0.7".to_string()),
        };
        self.state
            .lock()
            .unwrap()
            .services
            .insert(spec.name.clone(), service.clone());
        Ok(service)
    }

    async fn get_route(&self, _: &str, name: &str) -> PlatformResult<Option<RouteInfo>> {
        Ok(self.state.lock().unwrap().routes.get(name).cloned())
    }

    async fn create_route(&self, _: &str, spec: &RouteSpec) -> PlatformResult<RouteInfo> {
        let route = RouteInfo {
            name: spec.name.clone(),
            host: Some(format!("{}.apps.example.com", spec.name)),
            path: None,
            target_port: Some(spec.protocol.id().to_string()),
            target: spec.service.clone(),
            tls: spec.edge_tls,
        };
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(spec.name.clone(), route.clone());
        Ok(route)
    }

    async fn delete(&self, _: &str, kind: ResourceKind, selector: &Selector) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push((kind, selector.clone()));
        if let Some(remaining) = state.failing_deletes.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PlatformError::Request(format!("simulated failure deleting {kind}")));
            }
        }
        match kind {
            ResourceKind::Route => state.routes.retain(|name, _| !matches(selector, name, None)),
            ResourceKind::Service => state.services.retain(|name, _| !matches(selector, name, None)),
            ResourceKind::Build => state.builds.retain(|b| {
                !matches(selector, &b.name, b.labels.get("application").map(String::as_str))
            }),
            ResourceKind::ImageStream => state
                .image_streams
                .retain(|name| !matches(selector, name, Some(name.as_str()))),
            ResourceKind::ReplicationController => state
                .controllers
                .retain(|(app, rc)| !matches(selector, &rc.name, Some(app.as_str()))),
            ResourceKind::DeploymentConfig => state
                .deployments
                .retain(|name, _| !matches(selector, name, Some(name.as_str()))),
            ResourceKind::Secret => state.secrets.retain(|name, _| !matches(selector, name, None)),
            ResourceKind::BuildConfig => state.build_configs.retain(|name, (spec, _)| {
                !matches(selector, name, Some(spec.application.as_str()))
            }),
            ResourceKind::Pod => {}
        }
        Ok(())
    }
}

#[derive(Default)]
struct RegistrarState {
    connections: Vec<Connection>,
    consumers: HashMap<String, Vec<String>>,
    next_id: usize,
    unregistered: Vec<String>,
    fail_listing: bool,
}

/// In-memory connection catalog.
#[derive(Default)]
pub struct FakeRegistrar {
    state: Mutex<RegistrarState>,
}

impl FakeRegistrar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record `consumer` as using the connection registered for `name`.
    pub fn use_connection(&self, name: &str, consumer: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state
            .connections
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id.clone())
            .expect("connection registered");
        state
            .consumers
            .entry(id)
            .or_default()
            .push(consumer.to_string());
    }

    /// Drop a connection behind the orchestrator's back.
    pub fn forget(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .connections
            .retain(|c| c.name != name);
    }

    /// A connection someone created by hand, listed ahead of ours.
    pub fn add_foreign_connection(&self, id: &str, name: &str, url: &str) {
        self.state.lock().unwrap().connections.insert(
            0,
            Connection {
                id: id.to_string(),
                name: name.to_string(),
                configured_properties: BTreeMap::from([("url".to_string(), url.to_string())]),
            },
        );
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .connections
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().unwrap().fail_listing = fail;
    }

    pub fn connection_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .connections
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn unregistered(&self) -> Vec<String> {
        self.state.lock().unwrap().unregistered.clone()
    }
}

#[async_trait]
impl ConnectionRegistrar for FakeRegistrar {
    async fn register(&self, descriptor: &ConnectionDescriptor) -> RegistrarResult<String> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("conn-{}", state.next_id);
        state.connections.push(Connection {
            id: id.clone(),
            name: descriptor.name.clone(),
            configured_properties: descriptor.configured_properties.clone(),
        });
        Ok(id)
    }

    async fn unregister(&self, external_id: &str) -> RegistrarResult<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.connections.len();
        state.connections.retain(|c| c.id != external_id);
        if state.connections.len() == before {
            return Err(RegistrarError::NotFound(external_id.to_string()));
        }
        state.unregistered.push(external_id.to_string());
        Ok(())
    }

    async fn list_all(&self) -> RegistrarResult<Vec<Connection>> {
        Ok(self.state.lock().unwrap().connections.clone())
    }

    async fn list_consumers_by_connection_id(&self) -> RegistrarResult<HashMap<String, Vec<String>>> {
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(RegistrarError::Status {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(state.consumers.clone())
    }
}

pub fn config(log_directory: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        namespace: "test".to_string(),
        monitor_delay_ms: 10,
        usage_cache_ttl_secs: 0,
        log_directory: log_directory.to_path_buf(),
        work_directory: log_directory.to_path_buf(),
        max_delete_attempts: 3,
        build_pod_ready_timeout_secs: 1,
        sources: HashMap::from([(
            "postgres".to_string(),
            SourceConfig {
                source_type: Some("postgresql".to_string()),
                properties: BTreeMap::from([
                    (
                        "spring.datasource.postgres.url".to_string(),
                        "jdbc:postgresql://db:5432/orders".to_string(),
                    ),
                    (
                        "spring.datasource.postgres.password".to_string(),
                        "s3cret".to_string(),
                    ),
                ]),
                dependencies: String::new(),
            },
        )]),
        ..OrchestratorConfig::default()
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub platform: Arc<FakePlatform>,
    pub registrar: Arc<FakeRegistrar>,
    config: OrchestratorConfig,
    _logs: tempfile::TempDir,
}

impl Harness {
    /// A fresh orchestrator over the same platform and registry, as after a
    /// process restart.
    pub fn restarted(&self) -> Orchestrator {
        orchestrator(&self.config, &self.platform, &self.registrar)
    }
}

fn orchestrator(
    config: &OrchestratorConfig,
    platform: &Arc<FakePlatform>,
    registrar: &Arc<FakeRegistrar>,
) -> Orchestrator {
    let catalog = Arc::new(ConfigSourceCatalog::new(config.sources.clone()));
    Orchestrator::new(
        config.clone(),
        platform.clone(),
        registrar.clone(),
        catalog,
        Arc::new(TemplateInputGenerator),
    )
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

pub fn harness_with(adjust: impl FnOnce(&mut OrchestratorConfig)) -> Harness {
    let logs = tempfile::tempdir().unwrap();
    let mut config = config(logs.path());
    adjust(&mut config);
    let platform = FakePlatform::new();
    let registrar = FakeRegistrar::new();
    Harness {
        orchestrator: orchestrator(&config, &platform, &registrar),
        platform,
        registrar,
        config,
        _logs: logs,
    }
}

pub fn publish_config(name: &str, revision: u64) -> PublishConfiguration {
    let mut config = PublishConfiguration::new(
        name,
        revision,
        VirtualDatabase {
            name: name.to_string(),
            models: vec![Model {
                name: "orders_model".to_string(),
                source_names: vec!["Postgres".to_string()],
            }],
            descriptor: format!("<vdb name=\"{name}\"></vdb>").into_bytes(),
        },
    );
    config.enable_odata = true;
    config
}

/// Collect the updates for `service_id` until its record leaves the queue.
pub async fn settle(
    updates: &mut broadcast::Receiver<StatusUpdate>,
    service_id: &str,
) -> Vec<BuildStatus> {
    let collect = async {
        let mut seen = Vec::new();
        loop {
            match updates.recv().await {
                Ok(update) if update.status.service_id() == service_id => {
                    let settled = update.settled;
                    seen.push(update.status);
                    if settled {
                        return seen;
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return seen,
            }
        }
    };
    tokio::time::timeout(SETTLE_TIMEOUT, collect)
        .await
        .expect("record did not settle in time")
}

/// Collapse repeated states into the sequence of transitions.
pub fn transitions(history: &[BuildStatus]) -> Vec<dv_core::models::Status> {
    let mut states = Vec::new();
    for status in history {
        if states.last() != Some(&status.status) {
            states.push(status.status);
        }
    }
    states
}

/// Poll `check` until it holds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let poll = async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(SETTLE_TIMEOUT, poll)
        .await
        .expect("condition not reached in time");
}
