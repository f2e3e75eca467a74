use async_trait::async_trait;

use crate::models::{Job, ServiceRegistration};

/// 远程分发端点的应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResponse {
    /// 204 No Content
    Accepted,
    /// 503 Service Unavailable
    Declined,
    /// 其他状态码或传输错误
    Failed(String),
}

impl DispatchResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DispatchResponse::Accepted)
    }
}

/// 作业分发客户端接口
///
/// 实现不返回错误：传输层故障统一表示为 `DispatchResponse::Failed`，
/// 由分发器按拒绝处理并尝试下一个候选。
#[async_trait]
pub trait DispatchClient: Send + Sync {
    async fn dispatch(&self, registration: &ServiceRegistration, job: &Job) -> DispatchResponse;
}
