pub mod app;
pub mod shutdown;

pub use app::Coordinator;
pub use shutdown::ShutdownManager;
