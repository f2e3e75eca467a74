use async_trait::async_trait;
use registry_core::{
    models::{Job, JobFilter, JobStatisticsRow, JobStatus, NewJob, ServiceRegistrationKey},
    traits::JobRepository,
    RegistryError, RegistryResult,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

const JOB_COLUMNS: &str = r#"
    id, version, job_type, operation, arguments, payload, status,
    creator_host, processing_host, completed_host,
    date_created, date_started, date_completed, queue_time_ms, run_time_ms
"#;

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> RegistryResult<Job> {
        let arguments: String = row.try_get("arguments")?;
        let arguments: Vec<String> = serde_json::from_str(&arguments)
            .map_err(|e| RegistryError::Serialization(format!("解析作业参数失败: {e}")))?;

        Ok(Job {
            id: row.try_get("id")?,
            version: row.try_get("version")?,
            job_type: row.try_get("job_type")?,
            operation: row.try_get("operation")?,
            arguments,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            creator_host: row.try_get("creator_host")?,
            processing_host: row.try_get("processing_host")?,
            completed_host: row.try_get("completed_host")?,
            date_created: row.try_get("date_created")?,
            date_started: row.try_get("date_started")?,
            date_completed: row.try_get("date_completed")?,
            queue_time_ms: row.try_get("queue_time_ms")?,
            run_time_ms: row.try_get("run_time_ms")?,
        })
    }

    fn encode_arguments(arguments: &[String]) -> RegistryResult<String> {
        serde_json::to_string(arguments)
            .map_err(|e| RegistryError::Serialization(format!("序列化作业参数失败: {e}")))
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &JobFilter) {
        builder.push(" WHERE 1 = 1");
        if let Some(job_type) = &filter.job_type {
            builder.push(" AND job_type = ").push_bind(job_type.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(host) = &filter.processing_host {
            builder.push(" AND processing_host = ").push_bind(host.clone());
        }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &NewJob) -> RegistryResult<Job> {
        let arguments = Self::encode_arguments(&job.arguments)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (version, job_type, operation, arguments, payload, status,
                              creator_host, processing_host, date_created, date_started, queue_time_ms)
            VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&job.job_type)
        .bind(&job.operation)
        .bind(arguments)
        .bind(&job.payload)
        .bind(job.status)
        .bind(&job.creator_host)
        .bind(&job.processing_host)
        .bind(job.date_created)
        .bind(job.date_started)
        .bind(job.queue_time_ms)
        .fetch_one(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        debug!("创建作业成功: {} ({})", id, job.job_type);
        Ok(Job {
            id,
            version: 1,
            job_type: job.job_type.clone(),
            operation: job.operation.clone(),
            arguments: job.arguments.clone(),
            payload: job.payload.clone(),
            status: job.status,
            creator_host: job.creator_host.clone(),
            processing_host: job.processing_host.clone(),
            completed_host: None,
            date_created: job.date_created,
            date_started: job.date_started,
            date_completed: None,
            queue_time_ms: job.queue_time_ms,
            run_time_ms: None,
        })
    }

    async fn get(&self, id: i64) -> RegistryResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RegistryError::Database)?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn update(&self, job: &Job) -> RegistryResult<Job> {
        let arguments = Self::encode_arguments(&job.arguments)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET version = version + 1,
                operation = $3, arguments = $4, payload = $5, status = $6,
                processing_host = $7, completed_host = $8,
                date_started = $9, date_completed = $10,
                queue_time_ms = $11, run_time_ms = $12
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(job.id)
        .bind(job.version)
        .bind(&job.operation)
        .bind(arguments)
        .bind(&job.payload)
        .bind(job.status)
        .bind(&job.processing_host)
        .bind(&job.completed_host)
        .bind(job.date_started)
        .bind(job.date_completed)
        .bind(job.queue_time_ms)
        .bind(job.run_time_ms)
        .execute(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        if result.rows_affected() == 0 {
            let exists: Option<i32> = sqlx::query_scalar("SELECT version FROM jobs WHERE id = $1")
                .bind(job.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(RegistryError::Database)?;

            return Err(match exists {
                None => RegistryError::job_not_found(job.id),
                Some(_) => RegistryError::ConcurrentModification {
                    job_id: job.id,
                    expected_version: job.version,
                },
            });
        }

        debug!(
            "更新作业成功: {} -> {} (version {})",
            job.id,
            job.status,
            job.version + 1
        );
        let mut updated = job.clone();
        updated.version += 1;
        Ok(updated)
    }

    async fn list(&self, filter: &JobFilter) -> RegistryResult<Vec<Job>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
        Self::push_filter(&mut builder, filter);
        builder.push(" ORDER BY id");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(RegistryError::Database)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn count(&self, filter: &JobFilter) -> RegistryResult<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM jobs");
        Self::push_filter(&mut builder, filter);

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(RegistryError::Database)?;
        Ok(count)
    }

    async fn statistics(&self, job_type: Option<&str>) -> RegistryResult<Vec<JobStatisticsRow>> {
        let rows = sqlx::query(
            r#"
            SELECT job_type, creator_host AS host, status, COUNT(*) AS job_count,
                   CAST(NULL AS REAL) AS mean_queue_time_ms, CAST(NULL AS REAL) AS mean_run_time_ms
            FROM jobs WHERE status = 'QUEUED' AND ($1 IS NULL OR job_type = $1)
            GROUP BY job_type, creator_host
            UNION ALL
            SELECT job_type, processing_host AS host, status, COUNT(*) AS job_count,
                   CAST(NULL AS REAL), CAST(NULL AS REAL)
            FROM jobs WHERE status = 'RUNNING' AND ($1 IS NULL OR job_type = $1)
            GROUP BY job_type, processing_host
            UNION ALL
            SELECT job_type, completed_host AS host, status, COUNT(*) AS job_count,
                   AVG(queue_time_ms), AVG(run_time_ms)
            FROM jobs WHERE status = 'FINISHED' AND completed_host IS NOT NULL
              AND ($1 IS NULL OR job_type = $1)
            GROUP BY job_type, completed_host
            "#,
        )
        .bind(job_type)
        .fetch_all(&self.pool)
        .await
        .map_err(RegistryError::Database)?;

        rows.iter()
            .map(|row| {
                let status: JobStatus = row.try_get("status")?;
                Ok(JobStatisticsRow {
                    registration: ServiceRegistrationKey::new(
                        row.try_get::<String, _>("job_type")?,
                        row.try_get::<String, _>("host")?,
                    ),
                    status,
                    job_count: row.try_get("job_count")?,
                    mean_queue_time_ms: row.try_get("mean_queue_time_ms")?,
                    mean_run_time_ms: row.try_get("mean_run_time_ms")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::{
        setup_test_db, SqliteHostRepository, SqliteServiceRegistrationRepository,
    };
    use chrono::{Duration, Utc};
    use registry_core::traits::{HostRepository, ServiceRegistrationRepository};

    async fn setup() -> SqliteJobRepository {
        let pool = setup_test_db().await;
        let hosts = SqliteHostRepository::new(pool.clone());
        let services = SqliteServiceRegistrationRepository::new(pool.clone());
        for host in ["http://a:8080", "http://b:8080"] {
            hosts.upsert(host, 4).await.unwrap();
            services.upsert("encode", host, "/encode", None).await.unwrap();
        }
        SqliteJobRepository::new(pool)
    }

    fn new_job(creator: &str) -> NewJob {
        NewJob::queued(
            "encode",
            "encode",
            vec!["track-1".to_string(), "profile-hd".to_string()],
            Some("<mediapackage/>".to_string()),
            creator,
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = setup().await;
        let job = repo.insert(&new_job("http://a:8080")).await.unwrap();
        assert_eq!(job.version, 1);
        assert_eq!(job.status, JobStatus::Queued);

        let loaded = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.arguments, vec!["track-1", "profile-hd"]);
        assert_eq!(loaded.payload.as_deref(), Some("<mediapackage/>"));
        assert_eq!(loaded.creator_host, "http://a:8080");
        assert!(loaded.processing_host.is_none());

        assert!(repo.get(job.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let repo = setup().await;
        let job = repo.insert(&new_job("http://a:8080")).await.unwrap();

        let mut first = job.clone();
        first.assign_to("http://a:8080");
        let first = repo.update(&first).await.unwrap();
        assert_eq!(first.version, 2);

        // 基于旧版本的第二次认领必须失败
        let mut second = job.clone();
        second.assign_to("http://b:8080");
        let err = repo.update(&second).await.unwrap_err();
        assert!(err.is_concurrent_modification());

        let persisted = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(persisted.version, 2);
        assert_eq!(persisted.processing_host.as_deref(), Some("http://a:8080"));
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let repo = setup().await;
        let mut job = repo.insert(&new_job("http://a:8080")).await.unwrap();
        job.id = 999;
        assert!(repo.update(&job).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_running_without_processor_is_rejected_by_schema() {
        let repo = setup().await;
        let mut job = repo.insert(&new_job("http://a:8080")).await.unwrap();
        job.status = JobStatus::Running;
        let err = repo.update(&job).await.unwrap_err();
        assert!(matches!(err, RegistryError::Database(_)));
    }

    #[tokio::test]
    async fn test_list_and_count_with_filter() {
        let repo = setup().await;
        let a = repo.insert(&new_job("http://a:8080")).await.unwrap();
        repo.insert(&new_job("http://b:8080")).await.unwrap();
        repo.insert(&new_job("http://b:8080").started_locally())
            .await
            .unwrap();

        let queued = repo
            .list(&JobFilter::with_status(JobStatus::Queued))
            .await
            .unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].id, a.id);

        let on_b = JobFilter::with_status(JobStatus::Running)
            .job_type("encode")
            .processing_host("http://b:8080");
        assert_eq!(repo.count(&on_b).await.unwrap(), 1);
        assert_eq!(repo.count(&JobFilter::default()).await.unwrap(), 3);
        assert_eq!(
            repo.count(&JobFilter::default().job_type("inspect")).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_statistics_attribution() {
        let repo = setup().await;
        // A 创建两个排队作业
        repo.insert(&new_job("http://a:8080")).await.unwrap();
        repo.insert(&new_job("http://a:8080")).await.unwrap();
        // B 正在运行一个作业
        repo.insert(&new_job("http://b:8080").started_locally())
            .await
            .unwrap();
        // B 完成一个作业
        let mut done = repo
            .insert(&new_job("http://a:8080").started_locally())
            .await
            .unwrap();
        done.processing_host = None;
        done.completed_host = Some("http://b:8080".to_string());
        done.status = JobStatus::Finished;
        done.queue_time_ms = Some(100);
        done.date_completed = Some(Utc::now() + Duration::seconds(1));
        done.run_time_ms = Some(1_000);
        repo.update(&done).await.unwrap();

        let rows = repo.statistics(None).await.unwrap();
        let find = |host: &str, status: JobStatus| {
            rows.iter()
                .find(|r| r.registration.host == host && r.status == status)
                .cloned()
        };

        assert_eq!(find("http://a:8080", JobStatus::Queued).unwrap().job_count, 2);
        assert_eq!(find("http://b:8080", JobStatus::Running).unwrap().job_count, 1);
        let finished = find("http://b:8080", JobStatus::Finished).unwrap();
        assert_eq!(finished.job_count, 1);
        assert_eq!(finished.mean_queue_time_ms, Some(100.0));
        assert_eq!(finished.mean_run_time_ms, Some(1_000.0));
        assert!(find("http://a:8080", JobStatus::Running).is_none());
    }

    #[tokio::test]
    async fn test_statistics_filtered_by_job_type() {
        let repo = setup().await;
        SqliteServiceRegistrationRepository::new(repo.pool.clone())
            .upsert("inspect", "http://a:8080", "/inspect", None)
            .await
            .unwrap();
        repo.insert(&new_job("http://a:8080")).await.unwrap();
        repo.insert(&new_job("http://b:8080").started_locally())
            .await
            .unwrap();
        repo.insert(&NewJob::queued("inspect", "inspect", vec![], None, "http://a:8080"))
            .await
            .unwrap();

        assert_eq!(repo.statistics(None).await.unwrap().len(), 3);

        let rows = repo.statistics(Some("inspect")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].registration,
            ServiceRegistrationKey::new("inspect", "http://a:8080")
        );
        assert_eq!(rows[0].status, JobStatus::Queued);

        let rows = repo.statistics(Some("encode")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.registration.service_type == "encode"));
    }
}
