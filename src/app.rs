use std::sync::Arc;

use anyhow::{Context, Result};
use registry_core::{traits::ServiceRegistry, AppConfig};
use registry_dispatcher::{DispatcherHandle, JobDispatcher, JobDispatcherConfig, ServiceRegistryImpl};
use registry_infrastructure::{DatabaseManager, HttpDispatchClient};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 协调器进程
///
/// 持有数据库连接、注册中心与分发器。启动时将自身注册为主机，关闭时注销。
pub struct Coordinator {
    config: AppConfig,
    database: DatabaseManager,
    registry: Arc<ServiceRegistryImpl>,
    dispatcher: Arc<JobDispatcher>,
}

impl Coordinator {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("执行数据库迁移失败")?;

        let registry = Arc::new(ServiceRegistryImpl::new(
            database.host_repository(),
            database.service_repository(),
            database.job_repository(),
            config.registry.server_url(),
        ));

        let client = HttpDispatchClient::new(
            config.dispatcher.request_timeout(),
            config.registry.dispatch_path_suffix.clone(),
        )
        .context("创建分发客户端失败")?;

        let dispatcher = Arc::new(JobDispatcher::new(
            registry.clone(),
            Arc::new(client),
            JobDispatcherConfig::from(&config.dispatcher),
        ));

        Ok(Self {
            config,
            database,
            registry,
            dispatcher,
        })
    }

    pub fn registry(&self) -> Arc<ServiceRegistryImpl> {
        self.registry.clone()
    }

    pub fn dispatcher_handle(&self) -> DispatcherHandle {
        self.dispatcher.handle()
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let server_url = self.registry.server_url().to_string();
        let max_jobs = self.config.registry.max_jobs();
        self.registry
            .register_host(&server_url, max_jobs)
            .await
            .context("注册协调器主机失败")?;
        info!("协调器已注册: {} (max_jobs={})", server_url, max_jobs);

        if self.config.dispatcher.enabled {
            self.dispatcher.run(shutdown_rx).await;
        } else {
            info!("作业分发器已禁用");
            let _ = shutdown_rx.recv().await;
        }

        if let Err(e) = self.registry.unregister_host(&server_url).await {
            warn!("注销协调器主机失败: {}", e);
        }
        self.database.close().await;
        info!("协调器已停止");
        Ok(())
    }
}
