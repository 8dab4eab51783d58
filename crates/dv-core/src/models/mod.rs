pub mod build_status;
pub mod config;
pub mod deployment;
pub mod platform;
pub mod publish;
pub mod virtualization;

pub use build_status::{BuildStatus, Status};
pub use config::{OrchestratorConfig, SourceConfig};
pub use deployment::{DeploymentState, DeploymentStatus, ProtocolType, RouteStatus};
pub use publish::{EnvVar, Model, PublishConfiguration, SecretKeyRef, SsoSettings, VirtualDatabase};
pub use virtualization::VirtualizationStatus;
