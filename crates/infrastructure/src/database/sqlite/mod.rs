pub mod sqlite_host_repository;
pub mod sqlite_job_repository;
pub mod sqlite_service_repository;

pub use sqlite_host_repository::SqliteHostRepository;
pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_service_repository::SqliteServiceRegistrationRepository;

/// 将正在某服务注册上运行的作业退回队列，返回作业ID
///
/// `job_type` 为 `None` 时匹配该主机上所有类型的作业。
pub(crate) async fn requeue_running_jobs(
    conn: &mut sqlx::SqliteConnection,
    job_type: Option<&str>,
    host: &str,
) -> Result<Vec<i64>, sqlx::Error> {
    let ids: Vec<i64> = sqlx::query_scalar(
        r#"
        UPDATE jobs
        SET status = 'QUEUED', processing_host = NULL, completed_host = NULL,
            date_started = NULL, date_completed = NULL,
            queue_time_ms = NULL, run_time_ms = NULL,
            version = version + 1
        WHERE status = 'RUNNING' AND processing_host = $1 AND ($2 IS NULL OR job_type = $2)
        RETURNING id
        "#,
    )
    .bind(host)
    .bind(job_type)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids)
}

#[cfg(test)]
pub(crate) async fn setup_test_db() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    crate::database::MIGRATOR.run(&pool).await.unwrap();
    pool
}
