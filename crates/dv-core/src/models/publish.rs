use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One model of a virtual database and the data sources it reads from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub source_names: Vec<String>,
}

/// The logical database being published. The descriptor bytes are opaque here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDatabase {
    pub name: String,
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default, skip_serializing)]
    pub descriptor: Vec<u8>,
}

impl VirtualDatabase {
    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.models
            .iter()
            .flat_map(|m| m.source_names.iter().map(String::as_str))
    }

    /// Lowercase and trim every source name in place.
    pub fn normalize_source_names(&mut self) {
        for model in &mut self.models {
            for source in &mut model.source_names {
                *source = source.trim().to_lowercase();
            }
        }
    }

    pub fn descriptor_file_name(&self) -> String {
        format!("{}-vdb.xml", self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// A container environment variable, either literal or read from a secret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeyRef>,
}

impl EnvVar {
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            secret_ref: None,
        }
    }

    pub fn from_secret(name: impl Into<String>, secret: &str, key: &str) -> Self {
        Self {
            name: name.into(),
            value: None,
            secret_ref: Some(SecretKeyRef {
                name: secret.to_string(),
                key: key.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SsoSettings {
    pub auth_server_url: String,
    /// Environment variable names that receive the auth server url.
    #[serde(default)]
    pub env_keys: Vec<String>,
}

/// Snapshot of a publish request. Owned by exactly one `BuildStatus`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishConfiguration {
    pub name: String,
    pub revision: u64,
    pub vdb: VirtualDatabase,
    pub build_image_stream: String,
    #[serde(default)]
    pub build_node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub user_environment_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub user_java_options: String,
    pub cpu_units: String,
    pub container_memory_size: String,
    pub container_disk_size: String,
    #[serde(default)]
    pub enable_odata: bool,
    #[serde(default)]
    pub security_enabled: bool,
    #[serde(default)]
    pub sso: Option<SsoSettings>,
    #[serde(default)]
    environment_variables: Vec<EnvVar>,
    #[serde(default)]
    secret_variables: BTreeMap<String, String>,
}

impl PublishConfiguration {
    pub fn new(name: impl Into<String>, revision: u64, vdb: VirtualDatabase) -> Self {
        Self {
            name: name.into(),
            revision,
            vdb,
            build_image_stream: "fuse-java-openshift:1.0".to_string(),
            build_node_selector: BTreeMap::new(),
            user_environment_variables: BTreeMap::new(),
            user_java_options: String::new(),
            cpu_units: "500m".to_string(),
            container_memory_size: "1024Mi".to_string(),
            container_disk_size: "20Gi".to_string(),
            enable_odata: false,
            security_enabled: false,
            sso: None,
            environment_variables: Vec::new(),
            secret_variables: BTreeMap::new(),
        }
    }

    /// Build-time env vars, taken from the caller's variables only.
    pub fn user_env_vars(&self) -> Vec<EnvVar> {
        self.user_environment_variables
            .iter()
            .map(|(k, v)| EnvVar::literal(k, v))
            .collect()
    }

    /// Variables accumulated during configuration, injected into the deployment.
    pub fn environment_variables(&self) -> &[EnvVar] {
        &self.environment_variables
    }

    /// Base64 encoded secret values keyed by property name.
    pub fn secret_variables(&self) -> &BTreeMap<String, String> {
        &self.secret_variables
    }

    pub fn add_environment_variables(&mut self, vars: impl IntoIterator<Item = EnvVar>) {
        self.environment_variables.extend(vars);
    }

    pub fn add_secret_variables(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        self.secret_variables.extend(vars);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vdb() -> VirtualDatabase {
        VirtualDatabase {
            name: "orders".into(),
            models: vec![
                Model {
                    name: "pg".into(),
                    source_names: vec![" Postgres ".into(), "MySQL".into()],
                },
                Model {
                    name: "views".into(),
                    source_names: vec![],
                },
            ],
            descriptor: b"<vdb/>".to_vec(),
        }
    }

    #[test]
    fn normalize_lowercases_and_trims_sources() {
        let mut vdb = vdb();
        vdb.normalize_source_names();
        let names: Vec<&str> = vdb.source_names().collect();
        assert_eq!(names, vec!["postgres", "mysql"]);
    }

    #[test]
    fn accumulated_variables_are_appended() {
        let mut config = PublishConfiguration::new("orders", 3, vdb());
        config.add_environment_variables([EnvVar::literal("A", "1")]);
        config.add_environment_variables([EnvVar::from_secret("B", "dv-orders-secret", "b")]);
        config.add_secret_variables([("b".to_string(), "Yg==".to_string())]);
        assert_eq!(config.environment_variables().len(), 2);
        assert_eq!(
            config.environment_variables()[1].secret_ref,
            Some(SecretKeyRef {
                name: "dv-orders-secret".into(),
                key: "b".into()
            })
        );
        assert_eq!(config.secret_variables().get("b").map(String::as_str), Some("Yg=="));
    }

    #[test]
    fn descriptor_file_is_named_after_vdb() {
        assert_eq!(vdb().descriptor_file_name(), "orders-vdb.xml");
    }
}
