//! Connection catalog integration: registering published services as
//! reusable connections and finding the consumers that reference them.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RegistrarError {
    #[error("connection '{0}' not found in registry")]
    NotFound(String),

    #[error("registry request failed: {0}")]
    Request(String),

    #[error("registry returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid registry response: {0}")]
    Decode(String),
}

pub type RegistrarResult<T> = std::result::Result<T, RegistrarError>;

/// Payload describing a connection to a published service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    pub name: String,
    pub configured_properties: BTreeMap<String, String>,
    pub connector_id: String,
    pub icon: String,
    pub description: String,
}

impl ConnectionDescriptor {
    /// Descriptor for a JDBC connection to `name` served at `cluster_ip`.
    pub fn jdbc(name: &str, cluster_ip: &str, connector_id: &str) -> Self {
        let configured_properties = BTreeMap::from([
            ("password".to_string(), "password".to_string()),
            ("schema".to_string(), name.to_string()),
            (
                "url".to_string(),
                format!("jdbc:teiid:{name}@mm://{cluster_ip}:31000"),
            ),
            ("user".to_string(), "user".to_string()),
        ]);
        Self {
            name: name.to_string(),
            configured_properties,
            connector_id: connector_id.to_string(),
            icon: "assets:sql.svg".to_string(),
            description: format!("Connection to {name} "),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub configured_properties: BTreeMap<String, String>,
}

impl Connection {
    /// Whether this is the JDBC connection registered for virtualization
    /// `name`, not merely one that shares its name.
    pub fn points_at(&self, name: &str) -> bool {
        self.name == name
            && self
                .configured_properties
                .get("url")
                .is_some_and(|url| url.starts_with(&format!("jdbc:teiid:{name}@")))
    }
}

#[async_trait]
pub trait ConnectionRegistrar: Send + Sync {
    /// Register a connection and return the id the registry assigned.
    async fn register(&self, descriptor: &ConnectionDescriptor) -> RegistrarResult<String>;

    async fn unregister(&self, external_id: &str) -> RegistrarResult<()>;

    async fn list_all(&self) -> RegistrarResult<Vec<Connection>>;

    /// Consumer names keyed by the connection id they reference.
    async fn list_consumers_by_connection_id(&self) -> RegistrarResult<HashMap<String, Vec<String>>>;
}

/// Map integrations to the connection ids referenced by their flow steps.
pub fn consumers_from_integrations(root: &Value) -> HashMap<String, Vec<String>> {
    let mut used_in: HashMap<String, Vec<String>> = HashMap::new();
    let Some(items) = root.get("items").and_then(Value::as_array) else {
        return used_in;
    };
    for item in items {
        let Some(integration) = item.get("name").and_then(Value::as_str) else {
            continue;
        };
        let steps = item
            .get("flows")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|flow| flow.get("steps").and_then(Value::as_array))
            .flatten();
        for step in steps {
            let id = step
                .get("connection")
                .and_then(|c| c.get("id"))
                .and_then(Value::as_str);
            if let Some(id) = id {
                used_in
                    .entry(id.to_string())
                    .or_default()
                    .push(integration.to_string());
            }
        }
    }
    used_in
}

/// Registry client speaking the catalog's REST API.
#[derive(Clone)]
pub struct HttpRegistrar {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRegistrar {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    async fn get_json(&self, path: &str) -> RegistrarResult<Value> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| RegistrarError::Request(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| RegistrarError::Decode(e.to_string()))
    }
}

async fn check_status(response: reqwest::Response) -> RegistrarResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(RegistrarError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ConnectionRegistrar for HttpRegistrar {
    async fn register(&self, descriptor: &ConnectionDescriptor) -> RegistrarResult<String> {
        let response = self
            .client
            .post(self.url("connections/"))
            .json(descriptor)
            .send()
            .await
            .map_err(|e| RegistrarError::Request(e.to_string()))?;
        let body: Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| RegistrarError::Decode(e.to_string()))?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RegistrarError::Decode("response has no id".into()))
    }

    async fn unregister(&self, external_id: &str) -> RegistrarResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("connections/{external_id}")))
            .send()
            .await
            .map_err(|e| RegistrarError::Request(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistrarError::NotFound(external_id.to_string()));
        }
        check_status(response).await?;
        Ok(())
    }

    async fn list_all(&self) -> RegistrarResult<Vec<Connection>> {
        let root = self.get_json("connections").await?;
        let items = root.get("items").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(items).map_err(|e| RegistrarError::Decode(e.to_string()))
    }

    async fn list_consumers_by_connection_id(&self) -> RegistrarResult<HashMap<String, Vec<String>>> {
        let root = self.get_json("integrations").await?;
        Ok(consumers_from_integrations(&root))
    }
}

/// Memoises the consumer map so the registry is queried at most once per ttl.
pub struct UsageCache {
    ttl: Duration,
    cached: Mutex<Option<(Instant, HashMap<String, Vec<String>>)>>,
}

impl UsageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub async fn consumers_of(
        &self,
        registrar: &dyn ConnectionRegistrar,
        connection_id: &str,
    ) -> RegistrarResult<Vec<String>> {
        let mut cached = self.cached.lock().await;
        let fresh = cached
            .as_ref()
            .is_some_and(|(fetched, _)| fetched.elapsed() <= self.ttl);
        if !fresh {
            let usage = registrar.list_consumers_by_connection_id().await?;
            *cached = Some((Instant::now(), usage));
        }
        Ok(cached
            .as_ref()
            .and_then(|(_, usage)| usage.get(connection_id).cloned())
            .unwrap_or_default())
    }
}

/// Registry ids assigned to services registered by this process, by service id.
#[derive(Default)]
pub struct ConnectionIndex {
    ids: RwLock<HashMap<String, String>>,
}

impl ConnectionIndex {
    pub async fn get(&self, service_id: &str) -> Option<String> {
        self.ids.read().await.get(service_id).cloned()
    }

    pub async fn insert(&self, service_id: &str, external_id: String) {
        self.ids
            .write()
            .await
            .insert(service_id.to_string(), external_id);
    }

    pub async fn remove(&self, service_id: &str) {
        self.ids.write().await.remove(service_id);
    }
}
