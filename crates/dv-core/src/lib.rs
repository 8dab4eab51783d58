pub mod error;
pub mod models;
pub mod services;

pub use error::{PublishError, Result};
pub use services::orchestrator::Orchestrator;
pub use services::StatusUpdate;
