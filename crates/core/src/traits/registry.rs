use async_trait::async_trait;

use crate::{
    errors::RegistryResult,
    models::{
        HostLoad, HostRegistration, Job, JobStatus, ServiceRegistration, ServiceStatistics,
    },
};

/// 服务注册中心接口
///
/// 外部调用方（作业生产者、工作节点）与分发器共同使用的操作入口。
/// 每个操作要么完整生效，要么不产生任何影响。
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// 注册或更新主机，重新注册不会清除维护状态
    async fn register_host(&self, host: &str, max_jobs: i32) -> RegistryResult<HostRegistration>;

    /// 主机下线，级联下线其服务并重新排队其运行中的作业
    async fn unregister_host(&self, host: &str) -> RegistryResult<()>;

    /// 设置主机维护状态，维护中的主机不再接收新作业
    async fn set_maintenance_status(&self, host: &str, maintenance: bool) -> RegistryResult<()>;

    /// 注册或更新服务
    async fn register_service(
        &self,
        service_type: &str,
        host: &str,
        path: &str,
        job_producer: bool,
    ) -> RegistryResult<ServiceRegistration>;

    /// 服务下线，并重新排队其运行中的作业
    async fn unregister_service(&self, service_type: &str, host: &str) -> RegistryResult<()>;

    /// 设置服务在线状态
    ///
    /// 上线等同于注册（`job_producer` 为 `None` 时保持原值），下线等同于注销。
    async fn set_online_status(
        &self,
        service_type: &str,
        host: &str,
        path: &str,
        online: bool,
        job_producer: Option<bool>,
    ) -> RegistryResult<ServiceRegistration>;

    /// 创建作业，创建者为本协调器（若已注册该类型服务）或负载最低的可用服务
    ///
    /// `start_immediately` 时作业由本协调器自己运行，本协调器的该类型服务必须可分发。
    async fn create_job(
        &self,
        job_type: &str,
        operation: &str,
        arguments: Vec<String>,
        payload: Option<String>,
        start_immediately: bool,
    ) -> RegistryResult<Job>;

    /// 以指定服务注册为创建者创建作业
    async fn create_job_on(
        &self,
        job_type: &str,
        host: &str,
        operation: &str,
        arguments: Vec<String>,
        payload: Option<String>,
        start_immediately: bool,
    ) -> RegistryResult<Job>;

    /// 创建 INSTANTIATED 状态的作业，分发器不会处理它，直到被更新为 QUEUED
    async fn create_instantiated_job(
        &self,
        job_type: &str,
        operation: &str,
        arguments: Vec<String>,
        payload: Option<String>,
    ) -> RegistryResult<Job>;

    async fn get_job(&self, id: i64) -> RegistryResult<Job>;

    /// 比较并交换更新作业，时间戳由注册中心根据持久化状态计算
    async fn update_job(&self, job: &Job) -> RegistryResult<Job>;

    async fn get_jobs(
        &self,
        job_type: Option<&str>,
        status: Option<JobStatus>,
    ) -> RegistryResult<Vec<Job>>;

    async fn count(&self, job_type: Option<&str>, status: Option<JobStatus>) -> RegistryResult<i64>;

    /// 统计在指定主机上处理的作业数量
    async fn count_on_host(
        &self,
        job_type: Option<&str>,
        status: Option<JobStatus>,
        host: &str,
    ) -> RegistryResult<i64>;

    async fn get_service_registration(
        &self,
        service_type: &str,
        host: &str,
    ) -> RegistryResult<Option<ServiceRegistration>>;

    async fn get_service_registrations(&self) -> RegistryResult<Vec<ServiceRegistration>>;

    async fn get_service_registrations_by_type(
        &self,
        service_type: &str,
    ) -> RegistryResult<Vec<ServiceRegistration>>;

    async fn get_service_registrations_by_host(
        &self,
        host: &str,
    ) -> RegistryResult<Vec<ServiceRegistration>>;

    /// 可分发的服务注册，按 queued+running 升序
    async fn get_service_registrations_by_load(
        &self,
        service_type: &str,
    ) -> RegistryResult<Vec<ServiceRegistration>>;

    async fn get_service_statistics(&self) -> RegistryResult<Vec<ServiceStatistics>>;

    async fn get_host_registrations(&self) -> RegistryResult<Vec<HostRegistration>>;

    /// 在线主机的运行负载
    async fn get_load(&self) -> RegistryResult<Vec<HostLoad>>;
}
