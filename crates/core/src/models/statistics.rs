use serde::{Deserialize, Serialize};

use crate::models::{JobStatus, ServiceRegistration, ServiceRegistrationKey};

/// 存储层按 (服务注册, 状态) 分组的聚合结果
///
/// 作业归属规则：QUEUED 计入创建者，RUNNING 计入处理者，FINISHED 计入完成所在主机。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatisticsRow {
    pub registration: ServiceRegistrationKey,
    pub status: JobStatus,
    pub job_count: i64,
    pub mean_queue_time_ms: Option<f64>,
    pub mean_run_time_ms: Option<f64>,
}

/// 单个服务注册的负载统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatistics {
    pub registration: ServiceRegistration,
    pub queued_jobs: i64,
    pub running_jobs: i64,
    /// 仅基于已完成作业计算
    pub mean_queue_time_ms: i64,
    pub mean_run_time_ms: i64,
}

impl ServiceStatistics {
    pub fn empty(registration: ServiceRegistration) -> Self {
        Self {
            registration,
            queued_jobs: 0,
            running_jobs: 0,
            mean_queue_time_ms: 0,
            mean_run_time_ms: 0,
        }
    }

    /// 排序使用的负载值
    pub fn load(&self) -> i64 {
        self.queued_jobs + self.running_jobs
    }

    pub fn key(&self) -> ServiceRegistrationKey {
        self.registration.key()
    }
}
