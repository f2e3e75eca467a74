pub mod dispatch;
pub mod registry;
pub mod repository;

pub use dispatch::*;
pub use registry::*;
pub use repository::*;
