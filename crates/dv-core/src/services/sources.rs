//! Data source lookup and build input generation. Both are supplied by the
//! embedding application; the config-backed versions here serve the CLI.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::error::{PublishError, Result};
use crate::models::{PublishConfiguration, SourceConfig};

/// A data source referenced by a virtual database model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    pub name: String,
    /// `None` when the source type cannot be determined.
    pub source_type: Option<String>,
    /// Published-image properties with decrypted values.
    pub published_properties: BTreeMap<String, String>,
    pub dependencies: String,
}

#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn find(&self, source_name: &str) -> Result<Option<DataSource>>;
}

/// A file placed in the build archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFile {
    pub path: String,
    pub contents: Vec<u8>,
}

impl BuildFile {
    pub fn new(path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// Produces the project files (build manifest and friends) for a publish.
pub trait BuildInputGenerator: Send + Sync {
    fn project_files(
        &self,
        config: &PublishConfiguration,
        sources: &[DataSource],
    ) -> Result<Vec<BuildFile>>;
}

/// Resolve every source named by the configuration's models, in model order.
pub async fn resolve_sources(
    catalog: &dyn SourceCatalog,
    config: &PublishConfiguration,
) -> Result<Vec<DataSource>> {
    let mut resolved = Vec::new();
    for name in config.vdb.source_names() {
        let source = catalog
            .find(name)
            .await?
            .ok_or_else(|| PublishError::SourceNotFound(name.to_string()))?;
        if source.source_type.is_none() {
            return Err(PublishError::SourceTypeUnknown {
                source_name: name.to_string(),
                vdb: config.vdb.name.clone(),
            });
        }
        resolved.push(source);
    }
    Ok(resolved)
}

/// Catalog backed by the `sources` section of the orchestrator config.
pub struct ConfigSourceCatalog {
    sources: HashMap<String, SourceConfig>,
}

impl ConfigSourceCatalog {
    pub fn new(sources: HashMap<String, SourceConfig>) -> Self {
        let sources = sources
            .into_iter()
            .map(|(name, source)| (name.trim().to_lowercase(), source))
            .collect();
        Self { sources }
    }
}

#[async_trait]
impl SourceCatalog for ConfigSourceCatalog {
    async fn find(&self, source_name: &str) -> Result<Option<DataSource>> {
        Ok(self.sources.get(source_name).map(|source| DataSource {
            name: source_name.to_string(),
            source_type: source.source_type.clone(),
            published_properties: source.properties.clone(),
            dependencies: source.dependencies.clone(),
        }))
    }
}

const POM_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <groupId>io.integration</groupId>
  <artifactId><!--vdb-name--></artifactId>
  <version>1.0.0</version>
  <description>VDB for: <!--vdb-source-names--></description>
  <dependencies>
<!--vdb-dependencies-->
  </dependencies>
</project>
"#;

/// Fills a minimal project manifest template with the vdb's name and sources.
#[derive(Default)]
pub struct TemplateInputGenerator;

impl BuildInputGenerator for TemplateInputGenerator {
    fn project_files(
        &self,
        config: &PublishConfiguration,
        sources: &[DataSource],
    ) -> Result<Vec<BuildFile>> {
        let mut names = String::new();
        let mut dependencies = String::new();
        for source in sources {
            names.push_str(&source.name);
            names.push(' ');
            dependencies.push_str(&source.dependencies);
            dependencies.push('\n');
        }
        if config.enable_odata {
            dependencies.push_str(
                "<dependency><groupId>org.teiid</groupId><artifactId>spring-odata</artifactId></dependency>\n",
            );
        }
        if config.security_enabled {
            dependencies.push_str(
                "<dependency><groupId>org.teiid</groupId><artifactId>spring-keycloak</artifactId></dependency>\n",
            );
        }
        let pom = POM_TEMPLATE
            .replace("<!--vdb-name-->", &config.vdb.name)
            .replace("<!--vdb-source-names-->", names.trim_end())
            .replace("<!--vdb-dependencies-->", &dependencies);
        Ok(vec![BuildFile::new("pom.xml", pom)])
    }
}
