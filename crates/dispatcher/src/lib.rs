//! 注册中心与作业分发
//!
//! - [`ServiceRegistryImpl`]：主机、服务与作业的操作入口
//! - [`LoadStatisticsAggregator`]：服务负载统计与排名
//! - [`JobDispatcher`]：将排队作业投递到负载最低的可用服务

pub mod job_dispatcher;
pub mod load_statistics;
pub mod registry;

pub use job_dispatcher::{
    DispatchCycleSummary, DispatchOutcome, DispatcherHandle, JobDispatcher, JobDispatcherConfig,
};
pub use load_statistics::LoadStatisticsAggregator;
pub use registry::ServiceRegistryImpl;
