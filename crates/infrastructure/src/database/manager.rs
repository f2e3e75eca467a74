use std::sync::Arc;
use std::time::Duration;

use registry_core::{
    config::DatabaseConfig,
    traits::{HostRepository, JobRepository, ServiceRegistrationRepository},
    RegistryError, RegistryResult,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::sqlite::{
    SqliteHostRepository, SqliteJobRepository, SqliteServiceRegistrationRepository,
};

/// 内嵌的数据库迁移脚本
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// SQLite 连接池管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> RegistryResult<Self> {
        let in_memory = config.url.contains(":memory:");
        let mut options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));

        options = if in_memory {
            // 每个连接都是独立的内存数据库，只能保留一个连接
            options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                .max_lifetime(Duration::from_secs(1800))
        };

        let pool = options
            .connect(&config.url)
            .await
            .map_err(RegistryError::Database)?;

        info!("数据库连接池已创建: {}", config.url);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> RegistryResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| RegistryError::Database(e.into()))?;
        debug!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> RegistryResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(RegistryError::Database)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn host_repository(&self) -> Arc<dyn HostRepository> {
        Arc::new(SqliteHostRepository::new(self.pool.clone()))
    }

    pub fn service_repository(&self) -> Arc<dyn ServiceRegistrationRepository> {
        Arc::new(SqliteServiceRegistrationRepository::new(self.pool.clone()))
    }

    pub fn job_repository(&self) -> Arc<dyn JobRepository> {
        Arc::new(SqliteJobRepository::new(self.pool.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> DatabaseConfig {
        DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        }
    }

    #[tokio::test]
    async fn test_sqlite_database_manager() {
        let db_manager = DatabaseManager::new(&memory_config()).await.unwrap();
        db_manager.migrate().await.unwrap();
        assert!(db_manager.health_check().await.is_ok());

        let hosts = db_manager.host_repository();
        hosts.upsert("http://a:8080", 2).await.unwrap();
        assert_eq!(hosts.list().await.unwrap().len(), 1);

        db_manager.close().await;
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db_manager = DatabaseManager::new(&memory_config()).await.unwrap();
        db_manager.migrate().await.unwrap();
        db_manager.migrate().await.unwrap();
        db_manager.close().await;
    }
}
