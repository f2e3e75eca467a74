//! # 数据模型
//!
//! 注册中心的核心数据结构：作业、主机注册、服务注册以及负载统计。
//!
//! 实体之间不持有对象引用，关系一律通过标识符解析：
//!
//! - 主机注册以基础URL作为唯一标识
//! - 服务注册以 `(service_type, host)` 组合作为唯一标识
//! - 作业通过 `creator_host` / `processing_host` 与同类型的服务注册关联
//!
//! ## 作业状态流转
//!
//! ```text
//! Instantiated
//!
//! Queued → Running → Finished
//!    ↑        │   └→ Failed
//!    └────────┘ (主机或服务注销时重新排队)
//! ```

pub mod host;
pub mod job;
pub mod service;
pub mod statistics;

pub use host::*;
pub use job::*;
pub use service::*;
pub use statistics::*;
