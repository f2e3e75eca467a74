pub mod manager;
pub mod sqlite;

pub use manager::{DatabaseManager, MIGRATOR};
pub use sqlite::{SqliteHostRepository, SqliteJobRepository, SqliteServiceRegistrationRepository};
