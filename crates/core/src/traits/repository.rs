//! 数据仓储层接口定义
//!
//! 此模块定义了注册中心持久化层的抽象接口：
//! - 主机注册仓储接口 (HostRepository)
//! - 服务注册仓储接口 (ServiceRegistrationRepository)
//! - 作业仓储接口 (JobRepository)
//!
//! ## 设计原则
//!
//! ### 原子性
//! 每个方法都是一个独立的原子操作。涉及多张表的操作（例如主机下线时
//! 级联下线其服务并重新排队运行中的作业）必须在同一个事务内完成。
//!
//! ### 乐观锁
//! 作业更新使用 `version` 字段做比较并交换，原子性由仓储实现负责，
//! 业务逻辑只需处理 `ConcurrentModification` 错误。
//!
//! ### 无对象图引用
//! 作业通过 `(job_type, host)` 引用服务注册，关系一律通过ID查询解析。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use registry_core::traits::JobRepository;
//! use registry_core::models::JobStatus;
//!
//! async fn claim(repo: &dyn JobRepository, id: i64) -> RegistryResult<()> {
//!     let mut job = repo.get(id).await?.ok_or_else(|| RegistryError::job_not_found(id))?;
//!     job.assign_to("http://worker-1:8080");
//!     // 版本不匹配时返回 ConcurrentModification
//!     let job = repo.update(&job).await?;
//!     assert_eq!(job.status, JobStatus::Running);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;

use crate::errors::RegistryResult;
use crate::models::{
    HostRegistration, Job, JobFilter, JobStatisticsRow, NewJob, ServiceRegistration,
};

/// 主机注册仓储接口
#[async_trait]
pub trait HostRepository: Send + Sync {
    /// 注册或更新主机
    ///
    /// 已存在的主机会被重新标记为在线并更新最大作业数，维护状态保持不变。
    async fn upsert(&self, host: &str, max_jobs: i32) -> RegistryResult<HostRegistration>;

    /// 根据主机标识获取注册信息
    async fn get(&self, host: &str) -> RegistryResult<Option<HostRegistration>>;

    /// 获取所有主机注册信息，按主机标识排序
    async fn list(&self) -> RegistryResult<Vec<HostRegistration>>;

    /// 设置主机维护状态
    ///
    /// # 错误
    ///
    /// * `NotFound` - 主机不存在
    async fn set_maintenance(&self, host: &str, maintenance: bool) -> RegistryResult<HostRegistration>;

    /// 将主机标记为离线
    ///
    /// 在同一事务中：
    /// 1. 主机离线
    /// 2. 该主机上的所有服务注册离线
    /// 3. 在该主机上运行的作业重新排队（清空处理者，版本号递增）
    ///
    /// 返回被重新排队的作业ID。
    ///
    /// # 错误
    ///
    /// * `NotFound` - 主机不存在
    async fn mark_offline(&self, host: &str) -> RegistryResult<Vec<i64>>;
}

/// 服务注册仓储接口
#[async_trait]
pub trait ServiceRegistrationRepository: Send + Sync {
    /// 注册或更新服务
    ///
    /// 注册会被标记为在线。`job_producer` 为 `None` 时保留原值（新注册默认为 `false`）。
    /// 新注册的 `path` 不能为空；已有注册传入空 `path` 时保留原路径。
    ///
    /// # 错误
    ///
    /// * `NotFound` - 主机不存在
    async fn upsert(
        &self,
        service_type: &str,
        host: &str,
        path: &str,
        job_producer: Option<bool>,
    ) -> RegistryResult<ServiceRegistration>;

    async fn get(&self, service_type: &str, host: &str)
        -> RegistryResult<Option<ServiceRegistration>>;

    /// 获取所有服务注册，按 (服务类型, 主机) 排序
    async fn list(&self) -> RegistryResult<Vec<ServiceRegistration>>;

    async fn list_by_type(&self, service_type: &str) -> RegistryResult<Vec<ServiceRegistration>>;

    async fn list_by_host(&self, host: &str) -> RegistryResult<Vec<ServiceRegistration>>;

    /// 将服务注册标记为离线，并在同一事务中重新排队其正在处理的作业
    ///
    /// 返回被重新排队的作业ID。
    ///
    /// # 错误
    ///
    /// * `NotFound` - 服务注册不存在
    async fn mark_offline(&self, service_type: &str, host: &str) -> RegistryResult<Vec<i64>>;
}

/// 作业仓储接口
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 持久化新作业，分配ID并将版本号置为1
    async fn insert(&self, job: &NewJob) -> RegistryResult<Job>;

    async fn get(&self, id: i64) -> RegistryResult<Option<Job>>;

    /// 比较并交换更新作业
    ///
    /// 仅当持久化版本号等于 `job.version` 时写入，成功后版本号加一并返回新状态。
    ///
    /// # 错误
    ///
    /// * `NotFound` - 作业不存在
    /// * `ConcurrentModification` - 版本号不匹配，作业已被其他调用方修改
    async fn update(&self, job: &Job) -> RegistryResult<Job>;

    /// 按条件查询作业，按ID升序
    async fn list(&self, filter: &JobFilter) -> RegistryResult<Vec<Job>>;

    async fn count(&self, filter: &JobFilter) -> RegistryResult<i64>;

    /// 按 (服务注册, 状态) 分组的作业统计
    ///
    /// 只包含 QUEUED、RUNNING 和 FINISHED 三种状态。指定 `job_type` 时只统计该类型。
    async fn statistics(&self, job_type: Option<&str>) -> RegistryResult<Vec<JobStatisticsRow>>;
}
