use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, error, info, info_span, warn, Instrument};

use registry_core::{
    config::DispatcherConfig,
    models::{Job, JobStatus},
    traits::{DispatchClient, DispatchResponse, ServiceRegistry},
    RegistryError, RegistryResult,
};

/// 作业分发器配置
#[derive(Debug, Clone)]
pub struct JobDispatcherConfig {
    /// 两轮分发之间的等待时间
    pub interval: Duration,
    /// 单轮内并行处理的作业数
    pub max_concurrent_dispatches: usize,
}

impl Default for JobDispatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_concurrent_dispatches: 1,
        }
    }
}

impl From<&DispatcherConfig> for JobDispatcherConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            interval: config.interval(),
            max_concurrent_dispatches: config.max_concurrent_dispatches,
        }
    }
}

/// 单个作业的分发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 已被指定主机接收
    Dispatched(String),
    /// 所有候选都拒绝，作业已退回队列
    Requeued,
    /// 当前没有可用的服务
    NoCapacity,
    /// 作业已被其他协调器或调用方修改
    Conflict,
    /// 分发器正在停止，作业未处理
    Skipped,
}

/// 一轮分发的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchCycleSummary {
    pub examined: usize,
    pub dispatched: usize,
    pub requeued: usize,
    pub no_capacity: usize,
    pub conflicts: usize,
    pub errors: usize,
}

impl DispatchCycleSummary {
    fn record(&mut self, outcome: &RegistryResult<DispatchOutcome>) {
        match outcome {
            Ok(DispatchOutcome::Dispatched(_)) => self.dispatched += 1,
            Ok(DispatchOutcome::Requeued) => self.requeued += 1,
            Ok(DispatchOutcome::NoCapacity) => self.no_capacity += 1,
            Ok(DispatchOutcome::Conflict) => self.conflicts += 1,
            Ok(DispatchOutcome::Skipped) => {}
            Err(_) => self.errors += 1,
        }
    }
}

/// 运行中分发器的控制句柄
#[derive(Clone)]
pub struct DispatcherHandle {
    interval_tx: Arc<watch::Sender<Duration>>,
    wake: Arc<Notify>,
}

impl DispatcherHandle {
    /// 修改分发间隔，正在进行的等待会按新间隔重新开始
    pub fn set_interval(&self, interval: Duration) -> RegistryResult<()> {
        if interval.is_zero() {
            return Err(RegistryError::InvalidArgument(
                "分发间隔必须大于0".to_string(),
            ));
        }
        self.interval_tx.send_replace(interval);
        info!("分发间隔已修改为 {:?}", interval);
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// 立即开始下一轮分发
    pub fn wake(&self) {
        self.wake.notify_one();
    }
}

/// 作业分发器
///
/// 周期性地取出所有排队作业，按负载排名依次尝试候选服务。
/// 认领作业依赖注册中心的乐观锁，多个协调器可以同时对同一存储运行分发循环。
pub struct JobDispatcher {
    registry: Arc<dyn ServiceRegistry>,
    client: Arc<dyn DispatchClient>,
    config: JobDispatcherConfig,
    interval_tx: Arc<watch::Sender<Duration>>,
    wake: Arc<Notify>,
    stopping: AtomicBool,
}

impl JobDispatcher {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        client: Arc<dyn DispatchClient>,
        config: JobDispatcherConfig,
    ) -> Self {
        let (interval_tx, _) = watch::channel(config.interval);
        Self {
            registry,
            client,
            config,
            interval_tx: Arc::new(interval_tx),
            wake: Arc::new(Notify::new()),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            interval_tx: self.interval_tx.clone(),
            wake: self.wake.clone(),
        }
    }

    /// 分发循环，收到关闭信号后等待当前轮次结束再返回
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval_rx = self.interval_tx.subscribe();
        self.stopping.store(false, Ordering::SeqCst);
        info!(
            "作业分发器已启动，间隔 {:?}，并发 {}",
            *interval_rx.borrow(),
            self.config.max_concurrent_dispatches
        );

        'dispatch: loop {
            let cycle = self.run_cycle();
            tokio::pin!(cycle);
            tokio::select! {
                result = &mut cycle => Self::log_cycle(result),
                _ = shutdown.recv() => {
                    info!("收到关闭信号，等待当前分发轮次结束");
                    self.stopping.store(true, Ordering::SeqCst);
                    Self::log_cycle(cycle.await);
                    break 'dispatch;
                }
            }

            loop {
                let interval = *interval_rx.borrow_and_update();
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break 'dispatch,
                    Ok(()) = interval_rx.changed() => {
                        debug!("分发间隔变更，重新计时");
                    }
                    _ = self.wake.notified() => break,
                    _ = tokio::time::sleep(interval) => break,
                }
            }
        }

        info!("作业分发器已停止");
    }

    fn log_cycle(result: RegistryResult<DispatchCycleSummary>) {
        match result {
            Ok(summary) if summary.examined > 0 => info!(
                "分发轮次完成: 检查 {}，分发 {}，退回 {}，无可用服务 {}，冲突 {}，错误 {}",
                summary.examined,
                summary.dispatched,
                summary.requeued,
                summary.no_capacity,
                summary.conflicts,
                summary.errors
            ),
            Ok(_) => debug!("没有排队的作业"),
            Err(e) => error!("分发轮次中止: {}", e),
        }
    }

    /// 执行一轮分发
    ///
    /// 读取排队作业失败时整轮中止；单个作业的失败只记录在汇总中。
    pub async fn run_cycle(&self) -> RegistryResult<DispatchCycleSummary> {
        let started = Instant::now();
        let jobs = self
            .registry
            .get_jobs(None, Some(JobStatus::Queued))
            .await?;

        let mut summary = DispatchCycleSummary {
            examined: jobs.len(),
            ..Default::default()
        };

        let outcomes: Vec<RegistryResult<DispatchOutcome>> = stream::iter(jobs)
            .map(|job| {
                let span = info_span!("dispatch_job", job.id = job.id, job.job_type = %job.job_type);
                self.process_job(job).instrument(span)
            })
            .buffer_unordered(self.config.max_concurrent_dispatches.max(1))
            .collect()
            .await;

        for outcome in &outcomes {
            summary.record(outcome);
        }

        histogram!("registry_dispatch_cycle_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        Ok(summary)
    }

    async fn process_job(&self, job: Job) -> RegistryResult<DispatchOutcome> {
        let job_id = job.id;
        let result = self.dispatch_job(job).await;
        if let Err(e) = &result {
            error!("分发作业 {} 失败: {}", job_id, e);
        }
        result
    }

    /// 按负载排名依次尝试候选服务，直到某个服务接收作业
    pub async fn dispatch_job(&self, job: Job) -> RegistryResult<DispatchOutcome> {
        if self.stopping.load(Ordering::SeqCst) {
            return Ok(DispatchOutcome::Skipped);
        }

        let candidates = self
            .registry
            .get_service_registrations_by_load(&job.job_type)
            .await?;
        if candidates.is_empty() {
            debug!("作业 {} 暂无可用的 {} 服务", job.id, job.job_type);
            return Ok(DispatchOutcome::NoCapacity);
        }

        let mut current = job;
        let mut claimed = false;
        for candidate in &candidates {
            if claimed && self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let mut assignment = current.clone();
            assignment.assign_to(&candidate.host);
            current = match self.registry.update_job(&assignment).await {
                Ok(updated) => updated,
                Err(e) if e.is_concurrent_modification() => {
                    counter!("registry_dispatch_conflicts_total").increment(1);
                    info!("作业 {} 已被其他实例修改，放弃本轮分发", current.id);
                    return Ok(DispatchOutcome::Conflict);
                }
                Err(e) => {
                    if claimed {
                        self.release(current).await;
                    }
                    return Err(e);
                }
            };
            claimed = true;

            match self.client.dispatch(candidate, &current).await {
                DispatchResponse::Accepted => {
                    counter!("registry_jobs_dispatched_total", "service_type" => current.job_type.clone())
                        .increment(1);
                    info!("作业 {} 已分发到 {}", current.id, candidate.host);
                    return Ok(DispatchOutcome::Dispatched(candidate.host.clone()));
                }
                DispatchResponse::Declined => {
                    counter!("registry_dispatch_rejections_total", "reason" => "declined")
                        .increment(1);
                    debug!("{} 拒绝了作业 {}", candidate.host, current.id);
                }
                DispatchResponse::Failed(reason) => {
                    counter!("registry_dispatch_rejections_total", "reason" => "failed")
                        .increment(1);
                    warn!("分发作业 {} 到 {} 失败: {}", current.id, candidate.host, reason);
                }
            }
        }

        if !claimed {
            return Ok(DispatchOutcome::Skipped);
        }

        let job_id = current.id;
        match self.requeue(current).await {
            Ok(_) => {
                counter!("registry_jobs_requeued_total").increment(1);
                info!("作业 {} 没有服务接收，已退回队列", job_id);
                Ok(DispatchOutcome::Requeued)
            }
            Err(e) if e.is_concurrent_modification() => {
                counter!("registry_dispatch_conflicts_total").increment(1);
                Ok(DispatchOutcome::Conflict)
            }
            Err(e) => Err(e),
        }
    }

    async fn requeue(&self, mut job: Job) -> RegistryResult<Job> {
        job.requeue();
        self.registry.update_job(&job).await
    }

    async fn release(&self, job: Job) {
        let job_id = job.id;
        if let Err(e) = self.requeue(job).await {
            warn!("退回作业 {} 失败: {}", job_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_records_outcomes() {
        let mut summary = DispatchCycleSummary::default();
        summary.record(&Ok(DispatchOutcome::Dispatched("http://a".to_string())));
        summary.record(&Ok(DispatchOutcome::Requeued));
        summary.record(&Ok(DispatchOutcome::NoCapacity));
        summary.record(&Ok(DispatchOutcome::Conflict));
        summary.record(&Ok(DispatchOutcome::Skipped));
        summary.record(&Err(RegistryError::Internal("boom".to_string())));

        assert_eq!(
            summary,
            DispatchCycleSummary {
                examined: 0,
                dispatched: 1,
                requeued: 1,
                no_capacity: 1,
                conflicts: 1,
                errors: 1,
            }
        );
    }

    #[test]
    fn test_config_from_dispatcher_settings() {
        let settings = DispatcherConfig {
            interval_ms: 250,
            max_concurrent_dispatches: 4,
            ..Default::default()
        };
        let config = JobDispatcherConfig::from(&settings);
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.max_concurrent_dispatches, 4);
    }
}
