//! The configuring step of a publish: assemble build inputs, compute the
//! deployment's variables and submit the remote build.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine;

use crate::error::{PublishError, Result};
use crate::models::platform::BuildConfigSpec;
use crate::models::{EnvVar, PublishConfiguration};

use super::context::Context;
use super::naming::{build_config_name, build_pod_name, env_name, secret_name};
use super::sources::{resolve_sources, BuildFile, DataSource};

/// What the configuring worker hands back to the monitor.
#[derive(Debug, Clone)]
pub struct Configured {
    pub build_name: String,
    pub publish_pod_name: String,
    pub environment: Vec<EnvVar>,
    pub secrets: BTreeMap<String, String>,
}

/// Worker job for a submitted publish. The service log is closed when the
/// job ends, whatever the outcome.
pub async fn configure(
    ctx: Arc<Context>,
    service_id: String,
    config: PublishConfiguration,
) -> Result<Configured> {
    let result = configure_build(&ctx, &service_id, config).await;
    if let Err(e) = &result {
        ctx.log
            .error(&service_id, format!("Publishing - Build failed: {e}"))
            .await;
    }
    ctx.log.close(&service_id).await;
    result
}

async fn configure_build(
    ctx: &Context,
    id: &str,
    mut config: PublishConfiguration,
) -> Result<Configured> {
    let log = &ctx.log;
    let namespace = ctx.namespace();
    let gateway = ctx.gateway.as_ref();

    log.info(id, "Publishing - Configuring ...").await;
    config.vdb.normalize_source_names();
    let sources = resolve_sources(ctx.sources.as_ref(), &config).await?;

    log.info(id, "Publishing - Creating build archive").await;
    let mut files = ctx.inputs.project_files(&config, &sources)?;
    files.push(BuildFile::new(
        format!("src/main/resources/{}", config.vdb.descriptor_file_name()),
        config.vdb.descriptor.clone(),
    ));
    log.debug(id, format!("Publishing - Archive holds {} files", files.len()))
        .await;
    let archive = build_archive(files).await?;

    log.info(id, "Publishing - Creating image stream").await;
    gateway.create_image_stream(namespace, id).await?;

    log.info(id, "Publishing - Creating build config").await;
    let build_config = build_config_name(id);
    gateway
        .create_build_config(
            namespace,
            &BuildConfigSpec {
                name: build_config.clone(),
                application: id.to_string(),
                builder_image_stream: config.build_image_stream.clone(),
                output_image_stream: id.to_string(),
                revision: config.revision,
                env: config.user_env_vars(),
                node_selector: config.build_node_selector.clone(),
            },
        )
        .await?;

    log.info(id, "Publishing - Creating build").await;
    let build = gateway
        .start_binary_build(namespace, &build_config, archive)
        .await?;
    log.info(id, format!("Publishing - Build created: {}", build.name))
        .await;

    let pod = build_pod_name(&build.name);
    log.info(id, "Publishing - Awaiting pod readiness ...").await;
    if let Err(e) = gateway
        .wait_for_pod_ready(namespace, &pod, ctx.config.build_pod_ready_timeout())
        .await
    {
        log.error(
            id,
            format!("Publishing - Timeout waiting for pod to become ready: {e}"),
        )
        .await;
    }

    log.info(id, "Publishing - Fetching environment variables for vdb data sources")
        .await;
    let environment = environment_variables(id, &config, &sources);
    let secrets = secret_variables(&sources);

    log.info(
        id,
        format!("Publishing - Configuration completed. Building ... Pod Name: {pod}"),
    )
    .await;

    Ok(Configured {
        build_name: build.name,
        publish_pod_name: pod,
        environment,
        secrets,
    })
}

/// Variables injected into the published container, in injection order.
pub fn environment_variables(
    service_id: &str,
    config: &PublishConfiguration,
    sources: &[DataSource],
) -> Vec<EnvVar> {
    let mut env = Vec::new();
    if config.security_enabled {
        if let Some(sso) = &config.sso {
            env.extend(
                sso.env_keys
                    .iter()
                    .map(|key| EnvVar::literal(key, &sso.auth_server_url)),
            );
        }
    }
    let secret = secret_name(service_id);
    for source in sources {
        env.extend(
            source
                .published_properties
                .keys()
                .map(|key| EnvVar::from_secret(env_name(key), &secret, key)),
        );
    }
    env.extend(config.user_env_vars());
    env.push(EnvVar::literal("VDB_FILE", config.vdb.descriptor_file_name()));
    env.push(EnvVar::literal("JAVA_OPTIONS", &config.user_java_options));
    env
}

/// Source property values, base64 encoded for the exposure secret.
pub fn secret_variables(sources: &[DataSource]) -> BTreeMap<String, String> {
    let engine = base64::engine::general_purpose::STANDARD;
    sources
        .iter()
        .flat_map(|s| s.published_properties.iter())
        .map(|(key, value)| (key.clone(), engine.encode(value.as_bytes())))
        .collect()
}

pub async fn build_archive(files: Vec<BuildFile>) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || write_archive(&files))
        .await
        .map_err(|e| PublishError::Archive(e.to_string()))?
}

fn write_archive(files: &[BuildFile]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for file in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(file.contents.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(
                &mut header,
                file.path.trim_start_matches('/'),
                file.contents.as_slice(),
            )
            .map_err(|e| PublishError::Archive(format!("{}: {e}", file.path)))?;
    }
    builder
        .into_inner()
        .map_err(|e| PublishError::Archive(e.to_string()))
}
