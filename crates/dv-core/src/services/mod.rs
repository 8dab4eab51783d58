pub mod config_loader;
pub mod configure;
pub mod context;
pub mod exposure;
mod monitor;
pub mod naming;
pub mod oc;
pub mod orchestrator;
pub mod platform;
pub mod registrar;
pub mod service_log;
pub mod sources;
pub mod status_probe;
pub mod teardown;
pub mod work_queue;
pub mod worker_pool;

pub use work_queue::StatusUpdate;
