use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use registry_core::{
    models::{
        JobStatisticsRow, JobStatus, ServiceRegistration, ServiceRegistrationKey,
        ServiceStatistics,
    },
    traits::{JobRepository, ServiceRegistrationRepository},
    RegistryResult,
};

/// 负载统计聚合器
///
/// 为每个服务注册计算排队与运行中的作业数，以及已完成作业的平均排队/运行时间，
/// 并据此给出候选服务的负载排名。
pub struct LoadStatisticsAggregator {
    service_repo: Arc<dyn ServiceRegistrationRepository>,
    job_repo: Arc<dyn JobRepository>,
}

impl LoadStatisticsAggregator {
    pub fn new(
        service_repo: Arc<dyn ServiceRegistrationRepository>,
        job_repo: Arc<dyn JobRepository>,
    ) -> Self {
        Self {
            service_repo,
            job_repo,
        }
    }

    /// 所有服务注册的统计，按 (服务类型, 主机) 排序
    pub async fn service_statistics(&self) -> RegistryResult<Vec<ServiceStatistics>> {
        let registrations = self.service_repo.list().await?;
        let rows = self.job_repo.statistics(None).await?;
        Ok(Self::aggregate(registrations, &rows))
    }

    /// 指定类型的可分发服务，按负载升序
    pub async fn ranked_registrations(
        &self,
        service_type: &str,
    ) -> RegistryResult<Vec<ServiceRegistration>> {
        let registrations = self.service_repo.list_by_type(service_type).await?;
        if registrations.iter().all(|r| !r.is_dispatchable()) {
            debug!("服务类型 {} 没有可分发的注册", service_type);
            return Ok(Vec::new());
        }

        let rows = self.job_repo.statistics(Some(service_type)).await?;
        let ranked = Self::rank(Self::aggregate(registrations, &rows), service_type);
        debug!(
            "服务类型 {} 的负载排名: {:?}",
            service_type,
            ranked.iter().map(|r| r.host.as_str()).collect::<Vec<_>>()
        );
        Ok(ranked)
    }

    /// 将分组统计合并到服务注册上，没有作业的注册计为零
    pub fn aggregate(
        registrations: Vec<ServiceRegistration>,
        rows: &[JobStatisticsRow],
    ) -> Vec<ServiceStatistics> {
        let mut by_key: HashMap<&ServiceRegistrationKey, Vec<&JobStatisticsRow>> = HashMap::new();
        for row in rows {
            by_key.entry(&row.registration).or_default().push(row);
        }

        let mut statistics: Vec<ServiceStatistics> = registrations
            .into_iter()
            .map(|registration| {
                let key = registration.key();
                let mut stats = ServiceStatistics::empty(registration);
                for row in by_key.get(&key).into_iter().flatten() {
                    match row.status {
                        JobStatus::Queued => stats.queued_jobs += row.job_count,
                        JobStatus::Running => stats.running_jobs += row.job_count,
                        JobStatus::Finished => {
                            stats.mean_queue_time_ms =
                                row.mean_queue_time_ms.map_or(0, |m| m.round() as i64);
                            stats.mean_run_time_ms =
                                row.mean_run_time_ms.map_or(0, |m| m.round() as i64);
                        }
                        _ => {}
                    }
                }
                stats
            })
            .collect();

        statistics.sort_by(|a, b| a.key().cmp(&b.key()));
        statistics
    }

    /// 过滤出在线且未维护的指定类型服务，按 queued+running 升序，负载相同时按标识排序
    pub fn rank(
        statistics: Vec<ServiceStatistics>,
        service_type: &str,
    ) -> Vec<ServiceRegistration> {
        let mut candidates: Vec<ServiceStatistics> = statistics
            .into_iter()
            .filter(|s| {
                s.registration.service_type == service_type && s.registration.is_dispatchable()
            })
            .collect();

        candidates.sort_by(|a, b| a.load().cmp(&b.load()).then_with(|| a.key().cmp(&b.key())));
        candidates.into_iter().map(|s| s.registration).collect()
    }
}
