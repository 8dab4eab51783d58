use std::path::PathBuf;

use crate::services::platform::PlatformError;
use crate::services::registrar::RegistrarError;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid virtualization name '{0}'")]
    InvalidName(String),

    #[error("Datasource {0} not found")]
    SourceNotFound(String),

    #[error("Failed to determine the source type for {source_name} in VDB {vdb}")]
    SourceTypeUnknown { source_name: String, vdb: String },

    #[error("no connector id configured to register '{0}'")]
    ConnectorMissing(String),

    #[error("config file not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to assemble build archive: {0}")]
    Archive(String),

    #[error("work queue is no longer running")]
    QueueClosed,

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Registrar(#[from] RegistrarError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, PublishError>;
