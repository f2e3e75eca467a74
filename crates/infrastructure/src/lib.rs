pub mod database;
pub mod http_dispatch_client;

pub use database::*;
pub use http_dispatch_client::HttpDispatchClient;
