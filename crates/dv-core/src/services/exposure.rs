//! Making a deployed virtualization reachable: service, routes and the
//! connection catalog entry.

use std::collections::BTreeMap;

use crate::error::{PublishError, Result};
use crate::models::platform::{DeploymentSpec, RouteInfo, RouteSpec, ServiceSpec};
use crate::models::{BuildStatus, ProtocolType, RouteStatus};

use super::context::Context;
use super::naming::route_name;
use super::platform::PlatformResult;
use super::registrar::{ConnectionDescriptor, RegistrarError, RegistrarResult};

pub const SERVICE_DESCRIPTION: &str = "Virtual Database (VDB)";

/// Ports the container listens on. OData only when enabled.
pub fn container_ports(enable_odata: bool) -> Vec<ProtocolType> {
    let mut ports = vec![
        ProtocolType::Prometheus,
        ProtocolType::Jolokia,
        ProtocolType::Jdbc,
        ProtocolType::Pg,
    ];
    if enable_odata {
        ports.push(ProtocolType::Odata);
    }
    ports
}

pub fn deployment_spec(status: &BuildStatus) -> DeploymentSpec {
    let (env, memory, cpu, odata) = match &status.publish_configuration {
        Some(config) => (
            config.environment_variables().to_vec(),
            config.container_memory_size.clone(),
            config.cpu_units.clone(),
            config.enable_odata,
        ),
        None => (Vec::new(), String::new(), String::new(), false),
    };
    DeploymentSpec {
        name: status.service_id().to_string(),
        revision: status.revision.unwrap_or(1),
        env,
        memory,
        cpu,
        ports: container_ports(odata),
    }
}

pub fn service_spec(service_id: &str, via_3scale: bool) -> ServiceSpec {
    let mut labels = BTreeMap::from([("application".to_string(), service_id.to_string())]);
    let mut annotations = BTreeMap::from([(
        "description".to_string(),
        SERVICE_DESCRIPTION.to_string(),
    )]);
    if via_3scale {
        labels.insert("discovery.3scale.net".into(), "true".into());
        annotations.insert("discovery.3scale.net/scheme".into(), "http".into());
        annotations.insert(
            "discovery.3scale.net/port".into(),
            ProtocolType::Odata.target_port().to_string(),
        );
        annotations.insert(
            "discovery.3scale.net/description-path".into(),
            "/openapi.json".into(),
        );
    }
    ServiceSpec {
        name: service_id.to_string(),
        labels,
        annotations,
        protocols: ProtocolType::ALL.to_vec(),
    }
}

pub fn route_spec(service_id: &str, protocol: ProtocolType) -> RouteSpec {
    RouteSpec {
        name: route_name(service_id, protocol),
        service: service_id.to_string(),
        protocol,
        application: service_id.to_string(),
        description: SERVICE_DESCRIPTION.to_string(),
        edge_tls: true,
    }
}

/// Create the network service unless it already exists.
pub async fn ensure_service(ctx: &Context, service_id: &str) -> PlatformResult<()> {
    ctx.log
        .debug(service_id, format!("Creating the Service for VDB {service_id}"))
        .await;
    if ctx.gateway.get_service(ctx.namespace(), service_id).await?.is_none() {
        ctx.gateway
            .create_service(
                ctx.namespace(),
                &service_spec(service_id, ctx.config.expose_via_3scale),
            )
            .await?;
    }
    Ok(())
}

/// Create the edge terminated route for `protocol` unless it already exists.
pub async fn ensure_route(
    ctx: &Context,
    service_id: &str,
    protocol: ProtocolType,
) -> PlatformResult<()> {
    let name = route_name(service_id, protocol);
    if ctx.gateway.get_route(ctx.namespace(), &name).await?.is_none() {
        ctx.gateway
            .create_route(ctx.namespace(), &route_spec(service_id, protocol))
            .await?;
    }
    Ok(())
}

/// Register the running service as a JDBC connection and remember the id
/// the catalog assigned.
pub async fn register_connection(ctx: &Context, service_id: &str, name: &str) -> Result<()> {
    let connector = &ctx.config.registry_connector_id;
    if connector.is_empty() {
        return Err(PublishError::ConnectorMissing(name.to_string()));
    }
    let Some(service) = ctx.gateway.get_service(ctx.namespace(), service_id).await? else {
        ctx.log
            .info(
                service_id,
                format!(
                    "Database connection to Virtual Database {service_id} not created because no service found"
                ),
            )
            .await;
        return Ok(());
    };
    let cluster_ip = service.cluster_ip.unwrap_or_default();
    let descriptor = ConnectionDescriptor::jdbc(name, &cluster_ip, connector);
    let external_id = ctx.registrar.register(&descriptor).await?;
    ctx.log
        .info(
            service_id,
            format!("Database connection to Virtual Database {name} created with Id = {external_id}"),
        )
        .await;
    ctx.connections.insert(service_id, external_id).await;
    Ok(())
}

/// Catalog id of the connection for a virtualization, from the index or,
/// failing that, by name and JDBC url.
pub async fn connection_id(
    ctx: &Context,
    service_id: &str,
    name: &str,
) -> RegistrarResult<Option<String>> {
    if let Some(id) = ctx.connections.get(service_id).await {
        return Ok(Some(id));
    }
    let connections = ctx.registrar.list_all().await?;
    Ok(connections
        .into_iter()
        .find(|c| c.points_at(name))
        .map(|c| c.id))
}

/// Remove the catalog entry. Succeeds when there is nothing to remove.
pub async fn unregister_connection(ctx: &Context, service_id: &str, name: &str) -> RegistrarResult<()> {
    let Some(external_id) = connection_id(ctx, service_id, name).await? else {
        tracing::debug!(service_id, "no registered connection to remove");
        return Ok(());
    };
    match ctx.registrar.unregister(&external_id).await {
        Ok(()) | Err(RegistrarError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }
    ctx.connections.remove(service_id).await;
    ctx.log
        .info(
            service_id,
            format!("Database connection {external_id} to Virtual Database {name} removed"),
        )
        .await;
    Ok(())
}

/// Names of the consumers currently referencing the virtualization.
pub async fn consumers(ctx: &Context, service_id: &str, name: &str) -> RegistrarResult<Vec<String>> {
    match connection_id(ctx, service_id, name).await? {
        Some(id) => ctx.usage.consumers_of(ctx.registrar.as_ref(), &id).await,
        None => Ok(Vec::new()),
    }
}

fn route_status(route: RouteInfo, protocol: ProtocolType) -> RouteStatus {
    RouteStatus {
        name: route.name,
        protocol,
        host: route.host,
        path: route.path,
        port: route.target_port,
        target: route.target,
        secure: route.tls,
    }
}

/// Routes that exist for the routable protocols. Lookup failures are skipped.
pub async fn routes(ctx: &Context, service_id: &str) -> Vec<RouteStatus> {
    let mut found = Vec::new();
    for protocol in ProtocolType::ROUTABLE {
        let name = route_name(service_id, protocol);
        match ctx.gateway.get_route(ctx.namespace(), &name).await {
            Ok(Some(route)) => found.push(route_status(route, protocol)),
            Ok(None) => {}
            Err(e) => tracing::debug!(service_id, route = %name, error = %e, "route lookup failed"),
        }
    }
    found
}
