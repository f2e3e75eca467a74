pub mod app_config;
pub mod database;
pub mod dispatcher;
pub mod observability;
pub mod registry;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher::DispatcherConfig;
pub use observability::{LogFormat, ObservabilityConfig};
pub use registry::{MaxJobsSetting, RegistryConfig, DEFAULT_SERVER_URL};
