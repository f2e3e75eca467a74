//! 端到端测试：SQLite 存储 + 真实 HTTP 分发端点

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Router};
use registry_core::config::DatabaseConfig;
use registry_core::models::{JobStatus, ServiceRegistrationKey};
use registry_core::traits::ServiceRegistry;
use registry_dispatcher::{JobDispatcher, JobDispatcherConfig, ServiceRegistryImpl};
use registry_infrastructure::{DatabaseManager, HttpDispatchClient};

/// 启动一个对所有分发请求返回固定状态码的工作节点
async fn spawn_worker(status: StatusCode) -> String {
    async fn dispatch(State(status): State<StatusCode>) -> StatusCode {
        status
    }

    let app = Router::new()
        .route("/encode/dispatch", post(dispatch))
        .with_state(status);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn setup() -> (DatabaseManager, Arc<ServiceRegistryImpl>, JobDispatcher) {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..Default::default()
    };
    let database = DatabaseManager::new(&config).await.unwrap();
    database.migrate().await.unwrap();

    let registry = Arc::new(ServiceRegistryImpl::new(
        database.host_repository(),
        database.service_repository(),
        database.job_repository(),
        "http://coordinator.test:8080",
    ));
    let client = HttpDispatchClient::new(Duration::from_secs(5), "/dispatch").unwrap();
    let dispatcher = JobDispatcher::new(
        registry.clone(),
        Arc::new(client),
        JobDispatcherConfig::default(),
    );
    (database, registry, dispatcher)
}

#[tokio::test]
async fn test_busy_worker_is_skipped_and_job_lands_on_next() {
    let (_database, registry, dispatcher) = setup().await;
    let busy = spawn_worker(StatusCode::SERVICE_UNAVAILABLE).await;
    let idle = spawn_worker(StatusCode::NO_CONTENT).await;

    for host in [&busy, &idle] {
        registry.register_host(host, 2).await.unwrap();
        registry
            .register_service("encode", host, "/encode", false)
            .await
            .unwrap();
    }

    let job = registry
        .create_job("encode", "encode", vec!["track-1".to_string()], None, false)
        .await
        .unwrap();

    let summary = dispatcher.run_cycle().await.unwrap();
    assert_eq!(summary.dispatched, 1);

    let job = registry.get_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(
        job.processor(),
        Some(ServiceRegistrationKey::new("encode", idle.as_str()))
    );

    // 处理主机下线后作业回到队列
    registry.unregister_host(&idle).await.unwrap();
    let job = registry.get_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.processor().is_none());
}

#[tokio::test]
async fn test_unreachable_workers_requeue_job() {
    let (_database, registry, dispatcher) = setup().await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let unreachable = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    registry.register_host(&unreachable, 2).await.unwrap();
    registry
        .register_service("encode", &unreachable, "/encode", false)
        .await
        .unwrap();
    let job = registry
        .create_job("encode", "encode", vec![], None, false)
        .await
        .unwrap();

    let summary = dispatcher.run_cycle().await.unwrap();
    assert_eq!(summary.requeued, 1);

    let job = registry.get_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.version, 3);
    assert_eq!(
        registry.count(Some("encode"), Some(JobStatus::Queued)).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_finished_job_feeds_statistics() {
    let (_database, registry, _dispatcher) = setup().await;
    let host = "http://worker.test:8080";
    registry.register_host(host, 2).await.unwrap();
    registry
        .register_service("encode", host, "/encode", true)
        .await
        .unwrap();

    let job = registry
        .create_job_on("encode", host, "encode", vec![], None, true)
        .await
        .unwrap();
    let mut finish = job.clone();
    finish.status = JobStatus::Finished;
    let finished = registry.update_job(&finish).await.unwrap();
    assert_eq!(finished.completed_host.as_deref(), Some(host));

    let stats = registry.get_service_statistics().await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].running_jobs, 0);
    assert!(stats[0].mean_run_time_ms >= 0);

    let load = registry.get_load().await.unwrap();
    assert_eq!(load.len(), 1);
    assert_eq!(load[0].running_jobs, 0);
}
