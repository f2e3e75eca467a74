use async_trait::async_trait;
use chrono::Utc;
use registry_core::{
    models::ServiceRegistration, traits::ServiceRegistrationRepository, RegistryError,
    RegistryResult,
};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::requeue_running_jobs;

/// 服务注册的维护状态取自所属主机
const SERVICE_SELECT: &str = r#"
    SELECT s.service_type, s.host, s.path, s.online, s.job_producer, h.maintenance,
           s.registered_at, s.updated_at
    FROM service_registrations s
    JOIN host_registrations h ON h.host = s.host
"#;

pub struct SqliteServiceRegistrationRepository {
    pool: SqlitePool,
}

impl SqliteServiceRegistrationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_registration(row: &sqlx::sqlite::SqliteRow) -> RegistryResult<ServiceRegistration> {
        Ok(ServiceRegistration {
            service_type: row.try_get("service_type")?,
            host: row.try_get("host")?,
            path: row.try_get("path")?,
            online: row.try_get("online")?,
            job_producer: row.try_get("job_producer")?,
            maintenance: row.try_get("maintenance")?,
            registered_at: row.try_get("registered_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch(
        &self,
        service_type: &str,
        host: &str,
    ) -> RegistryResult<Option<ServiceRegistration>> {
        let row = sqlx::query(&format!(
            "{SERVICE_SELECT} WHERE s.service_type = $1 AND s.host = $2"
        ))
        .bind(service_type)
        .bind(host)
        .fetch_optional(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        row.as_ref().map(Self::row_to_registration).transpose()
    }

    async fn fetch_where(
        &self,
        condition: &str,
        value: Option<&str>,
    ) -> RegistryResult<Vec<ServiceRegistration>> {
        let sql = format!("{SERVICE_SELECT} {condition} ORDER BY s.service_type, s.host");
        let mut query = sqlx::query(&sql);
        if let Some(value) = value {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(RegistryError::Database)?;

        rows.iter().map(Self::row_to_registration).collect()
    }
}

#[async_trait]
impl ServiceRegistrationRepository for SqliteServiceRegistrationRepository {
    async fn upsert(
        &self,
        service_type: &str,
        host: &str,
        path: &str,
        job_producer: Option<bool>,
    ) -> RegistryResult<ServiceRegistration> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(RegistryError::Database)?;

        // 主机状态与注册写入在同一事务内，避免与主机注销交错
        let host_online: Option<bool> =
            sqlx::query_scalar("SELECT online FROM host_registrations WHERE host = $1")
                .bind(host)
                .fetch_optional(&mut *tx)
                .await
                .map_err(RegistryError::Database)?;
        match host_online {
            None => return Err(RegistryError::host_not_found(host)),
            Some(false) => {
                return Err(RegistryError::HostOffline {
                    host: host.to_string(),
                })
            }
            Some(true) => {}
        }

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM service_registrations WHERE service_type = $1 AND host = $2",
        )
        .bind(service_type)
        .bind(host)
        .fetch_optional(&mut *tx)
        .await
        .map_err(RegistryError::Database)?;

        if existing.is_some() {
            // 空路径与未指定的生产者标志保持原值
            sqlx::query(
                r#"
                UPDATE service_registrations
                SET online = 1,
                    path = CASE WHEN $3 = '' THEN path ELSE $3 END,
                    job_producer = COALESCE($4, job_producer),
                    updated_at = $5
                WHERE service_type = $1 AND host = $2
                "#,
            )
            .bind(service_type)
            .bind(host)
            .bind(path.trim())
            .bind(job_producer)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(RegistryError::Database)?;
        } else {
            if path.trim().is_empty() {
                return Err(RegistryError::InvalidArgument(format!(
                    "新注册的服务 {service_type}@{host} 必须指定路径"
                )));
            }
            sqlx::query(
                r#"
                INSERT INTO service_registrations
                    (service_type, host, path, online, job_producer, registered_at, updated_at)
                VALUES ($1, $2, $3, 1, $4, $5, $5)
                "#,
            )
            .bind(service_type)
            .bind(host)
            .bind(path.trim())
            .bind(job_producer.unwrap_or(false))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(RegistryError::Database)?;
        }

        tx.commit().await.map_err(RegistryError::Database)?;

        debug!("注册服务成功: {}@{}", service_type, host);
        self.fetch(service_type, host)
            .await?
            .ok_or_else(|| RegistryError::service_not_found(service_type, host))
    }

    async fn get(
        &self,
        service_type: &str,
        host: &str,
    ) -> RegistryResult<Option<ServiceRegistration>> {
        self.fetch(service_type, host).await
    }

    async fn list(&self) -> RegistryResult<Vec<ServiceRegistration>> {
        self.fetch_where("", None).await
    }

    async fn list_by_type(&self, service_type: &str) -> RegistryResult<Vec<ServiceRegistration>> {
        self.fetch_where("WHERE s.service_type = $1", Some(service_type))
            .await
    }

    async fn list_by_host(&self, host: &str) -> RegistryResult<Vec<ServiceRegistration>> {
        self.fetch_where("WHERE s.host = $1", Some(host)).await
    }

    async fn mark_offline(&self, service_type: &str, host: &str) -> RegistryResult<Vec<i64>> {
        let mut tx = self.pool.begin().await.map_err(RegistryError::Database)?;

        let result = sqlx::query(
            r#"
            UPDATE service_registrations SET online = 0, updated_at = $3
            WHERE service_type = $1 AND host = $2
            "#,
        )
        .bind(service_type)
        .bind(host)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(RegistryError::Database)?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::service_not_found(service_type, host));
        }

        let requeued = requeue_running_jobs(&mut tx, Some(service_type), host)
            .await
            .map_err(RegistryError::Database)?;

        tx.commit().await.map_err(RegistryError::Database)?;

        debug!(
            "服务已下线: {}@{}，重新排队 {} 个作业",
            service_type,
            host,
            requeued.len()
        );
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::{setup_test_db, SqliteHostRepository, SqliteJobRepository};
    use registry_core::models::{JobStatus, NewJob};
    use registry_core::traits::{HostRepository, JobRepository};

    async fn setup() -> (SqliteHostRepository, SqliteServiceRegistrationRepository, SqliteJobRepository) {
        let pool = setup_test_db().await;
        let hosts = SqliteHostRepository::new(pool.clone());
        hosts.upsert("http://a:8080", 4).await.unwrap();
        hosts.upsert("http://b:8080", 4).await.unwrap();
        (
            hosts,
            SqliteServiceRegistrationRepository::new(pool.clone()),
            SqliteJobRepository::new(pool),
        )
    }

    #[tokio::test]
    async fn test_register_service_requires_host() {
        let (_, services, _) = setup().await;
        let err = services
            .upsert("encode", "http://nowhere", "/encode", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_register_service_on_offline_host_fails() {
        let (hosts, services, _) = setup().await;
        services
            .upsert("encode", "http://a:8080", "/encode", None)
            .await
            .unwrap();
        hosts.mark_offline("http://a:8080").await.unwrap();

        let err = services
            .upsert("encode", "http://a:8080", "/encode", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::HostOffline { .. }));
        let err = services
            .upsert("inspect", "http://a:8080", "/inspect", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::HostOffline { .. }));

        let registration = services.get("encode", "http://a:8080").await.unwrap().unwrap();
        assert!(!registration.online);
        assert!(services.get("inspect", "http://a:8080").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_registration_requires_path() {
        let (_, services, _) = setup().await;
        let err = services
            .upsert("encode", "http://a:8080", "  ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_upsert_preserves_unspecified_fields() {
        let (_, services, _) = setup().await;
        services
            .upsert("encode", "http://a:8080", "/encode", Some(true))
            .await
            .unwrap();
        services.mark_offline("encode", "http://a:8080").await.unwrap();

        let reg = services
            .upsert("encode", "http://a:8080", "", None)
            .await
            .unwrap();
        assert!(reg.online);
        assert!(reg.job_producer);
        assert_eq!(reg.path, "/encode");
    }

    #[tokio::test]
    async fn test_maintenance_projected_from_host() {
        let (hosts, services, _) = setup().await;
        services.upsert("encode", "http://a:8080", "/encode", None).await.unwrap();
        hosts.set_maintenance("http://a:8080", true).await.unwrap();

        let reg = services.get("encode", "http://a:8080").await.unwrap().unwrap();
        assert!(reg.maintenance);
        assert!(!reg.is_dispatchable());
    }

    #[tokio::test]
    async fn test_listing_is_ordered() {
        let (_, services, _) = setup().await;
        services.upsert("inspect", "http://b:8080", "/inspect", None).await.unwrap();
        services.upsert("encode", "http://b:8080", "/encode", None).await.unwrap();
        services.upsert("encode", "http://a:8080", "/encode", None).await.unwrap();

        let all: Vec<String> = services
            .list()
            .await
            .unwrap()
            .iter()
            .map(|r| r.key().to_string())
            .collect();
        assert_eq!(
            all,
            vec![
                "encode@http://a:8080",
                "encode@http://b:8080",
                "inspect@http://b:8080"
            ]
        );
        assert_eq!(services.list_by_type("encode").await.unwrap().len(), 2);
        assert_eq!(services.list_by_host("http://b:8080").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_offline_requeues_only_its_jobs() {
        let (_, services, jobs) = setup().await;
        services.upsert("encode", "http://a:8080", "/encode", None).await.unwrap();
        services.upsert("inspect", "http://a:8080", "/inspect", None).await.unwrap();

        let encode = jobs
            .insert(&NewJob::queued("encode", "run", vec![], None, "http://a:8080").started_locally())
            .await
            .unwrap();
        let inspect = jobs
            .insert(&NewJob::queued("inspect", "run", vec![], None, "http://a:8080").started_locally())
            .await
            .unwrap();

        let requeued = services.mark_offline("encode", "http://a:8080").await.unwrap();
        assert_eq!(requeued, vec![encode.id]);

        let job = jobs.get(encode.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.processor().is_none());

        let other = jobs.get(inspect.id).await.unwrap().unwrap();
        assert_eq!(other.status, JobStatus::Running);
    }
}
