use std::sync::LazyLock;

use regex::Regex;

use crate::error::{PublishError, Result};
use crate::models::ProtocolType;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]([A-Za-z0-9-]*[A-Za-z])?$").unwrap());

/// Virtualization names must start and end with a letter.
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(PublishError::InvalidName(name.to_string()))
    }
}

/// Platform identity of a virtualization: lower case, `dv-` prefixed.
pub fn service_id(name: &str) -> String {
    format!("dv-{}", name.to_lowercase())
}

pub fn build_config_name(service_id: &str) -> String {
    format!("{service_id}-build-config")
}

pub fn secret_name(service_id: &str) -> String {
    format!("{service_id}-secret")
}

pub fn route_name(service_id: &str, protocol: ProtocolType) -> String {
    format!("{service_id}-{}", protocol.id())
}

pub fn build_pod_name(build_name: &str) -> String {
    format!("{build_name}-build")
}

/// Environment variable name for a data source property key.
pub fn env_name(key: &str) -> String {
    key.replace('-', "").replace('.', "_").to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_is_prefixed_and_lowercased() {
        assert_eq!(service_id("OrdersView"), "dv-ordersview");
        assert_eq!(service_id("orders"), "dv-orders");
    }

    #[test]
    fn derived_names() {
        let id = service_id("orders");
        assert_eq!(build_config_name(&id), "dv-orders-build-config");
        assert_eq!(secret_name(&id), "dv-orders-secret");
        assert_eq!(route_name(&id, ProtocolType::Odata), "dv-orders-odata");
        assert_eq!(build_pod_name("dv-orders-build-config-1"), "dv-orders-build-config-1-build");
    }

    #[test]
    fn env_name_strips_hyphens_and_maps_dots() {
        assert_eq!(env_name("spring.datasource.pg-db.url"), "SPRING_DATASOURCE_PGDB_URL");
        assert_eq!(env_name("user"), "USER");
    }

    #[test]
    fn names_must_start_and_end_with_a_letter() {
        assert!(validate_name("orders").is_ok());
        assert!(validate_name("o").is_ok());
        assert!(validate_name("order-view").is_ok());
        assert!(validate_name("1orders").is_err());
        assert!(validate_name("orders-").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("or ders").is_err());
    }
}
