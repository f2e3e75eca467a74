use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use tracing::{debug, info, instrument};

use registry_core::{
    models::{
        HostLoad, HostRegistration, Job, JobFilter, JobStatus, NewJob, ServiceRegistration,
        ServiceStatistics,
    },
    traits::{HostRepository, JobRepository, ServiceRegistrationRepository, ServiceRegistry},
    RegistryError, RegistryResult,
};

use crate::load_statistics::LoadStatisticsAggregator;

/// 服务注册中心实现
///
/// 所有状态都保存在仓储中，本结构体不持有可变状态，多个协调器实例可以共享同一存储。
pub struct ServiceRegistryImpl {
    host_repo: Arc<dyn HostRepository>,
    service_repo: Arc<dyn ServiceRegistrationRepository>,
    job_repo: Arc<dyn JobRepository>,
    load_statistics: LoadStatisticsAggregator,
    /// 本协调器的主机标识
    server_url: String,
}

impl ServiceRegistryImpl {
    pub fn new(
        host_repo: Arc<dyn HostRepository>,
        service_repo: Arc<dyn ServiceRegistrationRepository>,
        job_repo: Arc<dyn JobRepository>,
        server_url: impl Into<String>,
    ) -> Self {
        let load_statistics = LoadStatisticsAggregator::new(service_repo.clone(), job_repo.clone());
        Self {
            host_repo,
            service_repo,
            job_repo,
            load_statistics,
            server_url: server_url.into(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn require_non_blank(value: &str, name: &str) -> RegistryResult<()> {
        if value.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(format!("{name}不能为空")));
        }
        Ok(())
    }

    /// 在线主机上的服务才能注册
    async fn require_online_host(&self, host: &str) -> RegistryResult<HostRegistration> {
        let registration = self
            .host_repo
            .get(host)
            .await?
            .ok_or_else(|| RegistryError::host_not_found(host))?;
        if !registration.online {
            return Err(RegistryError::HostOffline {
                host: host.to_string(),
            });
        }
        Ok(registration)
    }

    /// 至少存在一个可分发的服务注册，返回按负载排序的候选
    async fn require_capacity(&self, job_type: &str) -> RegistryResult<Vec<ServiceRegistration>> {
        let ranked = self.load_statistics.ranked_registrations(job_type).await?;
        if ranked.is_empty() {
            return Err(RegistryError::ServiceUnavailable {
                service_type: job_type.to_string(),
            });
        }
        Ok(ranked)
    }

    /// 作业的创建者：本协调器已注册该类型服务时为本协调器，否则为负载最低的服务
    async fn resolve_creator(&self, job_type: &str) -> RegistryResult<String> {
        let ranked = self.require_capacity(job_type).await?;
        if self
            .service_repo
            .get(job_type, &self.server_url)
            .await?
            .is_some()
        {
            return Ok(self.server_url.clone());
        }
        ranked
            .into_iter()
            .next()
            .map(|r| r.host)
            .ok_or_else(|| RegistryError::ServiceUnavailable {
                service_type: job_type.to_string(),
            })
    }

    fn filter(job_type: Option<&str>, status: Option<JobStatus>) -> JobFilter {
        JobFilter {
            job_type: job_type.map(str::to_string),
            status,
            processing_host: None,
        }
    }
}

#[async_trait]
impl ServiceRegistry for ServiceRegistryImpl {
    #[instrument(skip(self))]
    async fn register_host(&self, host: &str, max_jobs: i32) -> RegistryResult<HostRegistration> {
        Self::require_non_blank(host, "主机")?;
        if max_jobs < 1 {
            return Err(RegistryError::InvalidArgument(format!(
                "最大作业数必须大于0: {max_jobs}"
            )));
        }

        let registration = self.host_repo.upsert(host, max_jobs).await?;
        info!("主机已注册: {} (max_jobs={})", host, max_jobs);
        Ok(registration)
    }

    #[instrument(skip(self))]
    async fn unregister_host(&self, host: &str) -> RegistryResult<()> {
        let requeued = self.host_repo.mark_offline(host).await?;
        counter!("registry_jobs_requeued_total").increment(requeued.len() as u64);
        info!("主机已注销: {}，重新排队 {} 个作业", host, requeued.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_maintenance_status(&self, host: &str, maintenance: bool) -> RegistryResult<()> {
        self.host_repo.set_maintenance(host, maintenance).await?;
        info!("主机 {} 维护状态: {}", host, maintenance);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn register_service(
        &self,
        service_type: &str,
        host: &str,
        path: &str,
        job_producer: bool,
    ) -> RegistryResult<ServiceRegistration> {
        self.set_online_status(service_type, host, path, true, Some(job_producer))
            .await
    }

    #[instrument(skip(self))]
    async fn unregister_service(&self, service_type: &str, host: &str) -> RegistryResult<()> {
        let requeued = self.service_repo.mark_offline(service_type, host).await?;
        counter!("registry_jobs_requeued_total").increment(requeued.len() as u64);
        info!(
            "服务已注销: {}@{}，重新排队 {} 个作业",
            service_type,
            host,
            requeued.len()
        );
        Ok(())
    }

    async fn set_online_status(
        &self,
        service_type: &str,
        host: &str,
        path: &str,
        online: bool,
        job_producer: Option<bool>,
    ) -> RegistryResult<ServiceRegistration> {
        Self::require_non_blank(service_type, "服务类型")?;
        Self::require_non_blank(host, "主机")?;

        if !online {
            self.unregister_service(service_type, host).await?;
            return self
                .service_repo
                .get(service_type, host)
                .await?
                .ok_or_else(|| RegistryError::service_not_found(service_type, host));
        }

        self.require_online_host(host).await?;
        let registration = self
            .service_repo
            .upsert(service_type, host, path, job_producer)
            .await?;
        info!("服务已注册: {}@{}{}", service_type, host, registration.path);
        Ok(registration)
    }

    async fn create_job(
        &self,
        job_type: &str,
        operation: &str,
        arguments: Vec<String>,
        payload: Option<String>,
        start_immediately: bool,
    ) -> RegistryResult<Job> {
        Self::require_non_blank(job_type, "作业类型")?;
        if start_immediately {
            // 立即运行的作业只能由本协调器自己处理
            let own = self.service_repo.get(job_type, &self.server_url).await?;
            if !own.is_some_and(|r| r.is_dispatchable()) {
                return Err(RegistryError::ServiceUnavailable {
                    service_type: job_type.to_string(),
                });
            }
            return self
                .create_job_on(job_type, &self.server_url, operation, arguments, payload, true)
                .await;
        }

        let creator = self.resolve_creator(job_type).await?;
        self.create_job_on(
            job_type,
            &creator,
            operation,
            arguments,
            payload,
            start_immediately,
        )
        .await
    }

    #[instrument(skip(self, arguments, payload))]
    async fn create_job_on(
        &self,
        job_type: &str,
        host: &str,
        operation: &str,
        arguments: Vec<String>,
        payload: Option<String>,
        start_immediately: bool,
    ) -> RegistryResult<Job> {
        Self::require_non_blank(job_type, "作业类型")?;
        let creator = self
            .service_repo
            .get(job_type, host)
            .await?
            .ok_or_else(|| RegistryError::service_not_found(job_type, host))?;

        let mut new_job = NewJob::queued(job_type, operation, arguments, payload, host);
        if start_immediately {
            // 创建者自己处理，必须当前可分发
            if !creator.is_dispatchable() {
                return Err(RegistryError::ServiceUnavailable {
                    service_type: job_type.to_string(),
                });
            }
            new_job = new_job.started_locally();
        } else {
            self.require_capacity(job_type).await?;
        }

        let job = self.job_repo.insert(&new_job).await?;
        info!("作业已创建: {} ({}) 状态 {}", job.id, job.job_type, job.status);
        Ok(job)
    }

    async fn create_instantiated_job(
        &self,
        job_type: &str,
        operation: &str,
        arguments: Vec<String>,
        payload: Option<String>,
    ) -> RegistryResult<Job> {
        Self::require_non_blank(job_type, "作业类型")?;
        let creator = self.resolve_creator(job_type).await?;
        let new_job =
            NewJob::queued(job_type, operation, arguments, payload, creator).instantiated();

        let job = self.job_repo.insert(&new_job).await?;
        info!("作业已创建: {} ({}) 状态 {}", job.id, job.job_type, job.status);
        Ok(job)
    }

    async fn get_job(&self, id: i64) -> RegistryResult<Job> {
        self.job_repo
            .get(id)
            .await?
            .ok_or_else(|| RegistryError::job_not_found(id))
    }

    #[instrument(skip(self, job), fields(job.id = job.id, job.status = %job.status, job.version = job.version))]
    async fn update_job(&self, job: &Job) -> RegistryResult<Job> {
        let persisted = self.get_job(job.id).await?;
        if persisted.version != job.version {
            return Err(RegistryError::ConcurrentModification {
                job_id: job.id,
                expected_version: job.version,
            });
        }

        let mut next = job.clone();
        next.stamp_transition(&persisted, Utc::now())?;

        if let Some(processor) = next.processor() {
            self.service_repo
                .get(&processor.service_type, &processor.host)
                .await?
                .ok_or_else(|| {
                    RegistryError::service_not_found(&processor.service_type, &processor.host)
                })?;
        }

        let updated = self.job_repo.update(&next).await?;
        debug!(
            "作业 {} 已更新: {} -> {} (version {})",
            updated.id, persisted.status, updated.status, updated.version
        );
        Ok(updated)
    }

    async fn get_jobs(
        &self,
        job_type: Option<&str>,
        status: Option<JobStatus>,
    ) -> RegistryResult<Vec<Job>> {
        self.job_repo.list(&Self::filter(job_type, status)).await
    }

    async fn count(&self, job_type: Option<&str>, status: Option<JobStatus>) -> RegistryResult<i64> {
        self.job_repo.count(&Self::filter(job_type, status)).await
    }

    async fn count_on_host(
        &self,
        job_type: Option<&str>,
        status: Option<JobStatus>,
        host: &str,
    ) -> RegistryResult<i64> {
        let filter = Self::filter(job_type, status).processing_host(host);
        self.job_repo.count(&filter).await
    }

    async fn get_service_registration(
        &self,
        service_type: &str,
        host: &str,
    ) -> RegistryResult<Option<ServiceRegistration>> {
        self.service_repo.get(service_type, host).await
    }

    async fn get_service_registrations(&self) -> RegistryResult<Vec<ServiceRegistration>> {
        self.service_repo.list().await
    }

    async fn get_service_registrations_by_type(
        &self,
        service_type: &str,
    ) -> RegistryResult<Vec<ServiceRegistration>> {
        self.service_repo.list_by_type(service_type).await
    }

    async fn get_service_registrations_by_host(
        &self,
        host: &str,
    ) -> RegistryResult<Vec<ServiceRegistration>> {
        self.service_repo.list_by_host(host).await
    }

    async fn get_service_registrations_by_load(
        &self,
        service_type: &str,
    ) -> RegistryResult<Vec<ServiceRegistration>> {
        self.load_statistics.ranked_registrations(service_type).await
    }

    async fn get_service_statistics(&self) -> RegistryResult<Vec<ServiceStatistics>> {
        self.load_statistics.service_statistics().await
    }

    async fn get_host_registrations(&self) -> RegistryResult<Vec<HostRegistration>> {
        self.host_repo.list().await
    }

    async fn get_load(&self) -> RegistryResult<Vec<HostLoad>> {
        let running = self
            .job_repo
            .list(&JobFilter::with_status(JobStatus::Running))
            .await?;
        let mut running_by_host: HashMap<String, i64> = HashMap::new();
        for job in running {
            if let Some(host) = job.processing_host {
                *running_by_host.entry(host).or_default() += 1;
            }
        }

        Ok(self
            .host_repo
            .list()
            .await?
            .into_iter()
            .filter(|h| h.online)
            .map(|h| HostLoad {
                running_jobs: running_by_host.get(&h.host).copied().unwrap_or(0),
                host: h.host,
                max_jobs: h.max_jobs,
            })
            .collect())
    }
}
