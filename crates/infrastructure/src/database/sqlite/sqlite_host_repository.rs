use async_trait::async_trait;
use chrono::Utc;
use registry_core::{
    models::HostRegistration, traits::HostRepository, RegistryError, RegistryResult,
};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::requeue_running_jobs;

const HOST_COLUMNS: &str =
    "host, max_jobs, online, maintenance, registered_at, updated_at";

pub struct SqliteHostRepository {
    pool: SqlitePool,
}

impl SqliteHostRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_host(row: &sqlx::sqlite::SqliteRow) -> RegistryResult<HostRegistration> {
        Ok(HostRegistration {
            host: row.try_get("host")?,
            max_jobs: row.try_get("max_jobs")?,
            online: row.try_get("online")?,
            maintenance: row.try_get("maintenance")?,
            registered_at: row.try_get("registered_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch(&self, host: &str) -> RegistryResult<Option<HostRegistration>> {
        let row = sqlx::query(&format!(
            "SELECT {HOST_COLUMNS} FROM host_registrations WHERE host = $1"
        ))
        .bind(host)
        .fetch_optional(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        row.as_ref().map(Self::row_to_host).transpose()
    }
}

#[async_trait]
impl HostRepository for SqliteHostRepository {
    async fn upsert(&self, host: &str, max_jobs: i32) -> RegistryResult<HostRegistration> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO host_registrations (host, max_jobs, online, maintenance, registered_at, updated_at)
            VALUES ($1, $2, 1, 0, $3, $3)
            ON CONFLICT(host) DO UPDATE SET
                max_jobs = excluded.max_jobs,
                online = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(host)
        .bind(max_jobs)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        debug!("注册主机成功: {} (max_jobs={})", host, max_jobs);
        self.fetch(host)
            .await?
            .ok_or_else(|| RegistryError::host_not_found(host))
    }

    async fn get(&self, host: &str) -> RegistryResult<Option<HostRegistration>> {
        self.fetch(host).await
    }

    async fn list(&self) -> RegistryResult<Vec<HostRegistration>> {
        let rows = sqlx::query(&format!(
            "SELECT {HOST_COLUMNS} FROM host_registrations ORDER BY host"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        rows.iter().map(Self::row_to_host).collect()
    }

    async fn set_maintenance(
        &self,
        host: &str,
        maintenance: bool,
    ) -> RegistryResult<HostRegistration> {
        let result = sqlx::query(
            "UPDATE host_registrations SET maintenance = $2, updated_at = $3 WHERE host = $1",
        )
        .bind(host)
        .bind(maintenance)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::host_not_found(host));
        }

        debug!("设置主机维护状态成功: {} -> {}", host, maintenance);
        self.fetch(host)
            .await?
            .ok_or_else(|| RegistryError::host_not_found(host))
    }

    async fn mark_offline(&self, host: &str) -> RegistryResult<Vec<i64>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(RegistryError::Database)?;

        let result = sqlx::query(
            "UPDATE host_registrations SET online = 0, updated_at = $2 WHERE host = $1",
        )
        .bind(host)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(RegistryError::Database)?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::host_not_found(host));
        }

        sqlx::query("UPDATE service_registrations SET online = 0, updated_at = $2 WHERE host = $1")
            .bind(host)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(RegistryError::Database)?;

        let requeued = requeue_running_jobs(&mut tx, None, host)
            .await
            .map_err(RegistryError::Database)?;

        tx.commit().await.map_err(RegistryError::Database)?;

        debug!("主机已下线: {}，重新排队 {} 个作业", host, requeued.len());
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::{setup_test_db, SqliteJobRepository, SqliteServiceRegistrationRepository};
    use registry_core::models::{JobStatus, NewJob};
    use registry_core::traits::{JobRepository, ServiceRegistrationRepository};

    #[tokio::test]
    async fn test_register_host() {
        let repo = SqliteHostRepository::new(setup_test_db().await);

        let host = repo.upsert("http://a:8080", 4).await.unwrap();
        assert_eq!(host.max_jobs, 4);
        assert!(host.online);
        assert!(!host.maintenance);
    }

    #[tokio::test]
    async fn test_reregister_keeps_maintenance_and_comes_online() {
        let repo = SqliteHostRepository::new(setup_test_db().await);
        repo.upsert("http://a:8080", 4).await.unwrap();
        repo.set_maintenance("http://a:8080", true).await.unwrap();
        repo.mark_offline("http://a:8080").await.unwrap();

        let host = repo.upsert("http://a:8080", 8).await.unwrap();
        assert!(host.online);
        assert!(host.maintenance);
        assert_eq!(host.max_jobs, 8);
    }

    #[tokio::test]
    async fn test_unknown_host() {
        let repo = SqliteHostRepository::new(setup_test_db().await);

        assert!(repo.get("http://nowhere").await.unwrap().is_none());
        assert!(repo
            .set_maintenance("http://nowhere", true)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(repo.mark_offline("http://nowhere").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mark_offline_cascades() {
        let pool = setup_test_db().await;
        let hosts = SqliteHostRepository::new(pool.clone());
        let services = SqliteServiceRegistrationRepository::new(pool.clone());
        let jobs = SqliteJobRepository::new(pool);

        hosts.upsert("http://a:8080", 4).await.unwrap();
        hosts.upsert("http://b:8080", 4).await.unwrap();
        services.upsert("encode", "http://a:8080", "/encode", None).await.unwrap();
        services.upsert("encode", "http://b:8080", "/encode", None).await.unwrap();

        let on_a = jobs
            .insert(&NewJob::queued("encode", "run", vec![], None, "http://a:8080").started_locally())
            .await
            .unwrap();
        let on_b = jobs
            .insert(&NewJob::queued("encode", "run", vec![], None, "http://b:8080").started_locally())
            .await
            .unwrap();

        let requeued = hosts.mark_offline("http://a:8080").await.unwrap();
        assert_eq!(requeued, vec![on_a.id]);

        let job = jobs.get(on_a.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.processing_host.is_none());
        assert!(job.date_started.is_none());
        assert_eq!(job.version, on_a.version + 1);

        let untouched = jobs.get(on_b.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::Running);
        assert_eq!(untouched.version, on_b.version);

        let service = services.get("encode", "http://a:8080").await.unwrap().unwrap();
        assert!(!service.online);
        assert!(!hosts.get("http://a:8080").await.unwrap().unwrap().online);
    }
}
