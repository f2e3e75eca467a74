pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use models::*;
pub use traits::{
    DispatchClient, DispatchResponse, HostRepository, JobRepository, ServiceRegistrationRepository,
    ServiceRegistry,
};
