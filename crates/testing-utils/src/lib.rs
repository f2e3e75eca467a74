//! # Registry Testing Utils
//!
//! Shared testing utilities for the service registry workspace: an in-memory
//! store implementing every persistence port, a scripted dispatch client and
//! builders for test data.
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! registry-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
