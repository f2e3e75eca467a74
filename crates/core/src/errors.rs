use thiserror::Error;

/// 注册中心错误类型定义
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity}未找到: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("没有可用的服务处理类型为 '{service_type}' 的作业")]
    ServiceUnavailable { service_type: String },

    #[error("作业 {job_id} 已被并发修改 (期望版本: {expected_version})")]
    ConcurrentModification { job_id: i64, expected_version: i32 },

    #[error("主机不在线: {host}")]
    HostOffline { host: String },

    #[error("无效的参数: {0}")]
    InvalidArgument(String),

    #[error("无效的状态: {0}")]
    InvalidState(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl RegistryError {
    pub fn host_not_found(host: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "主机",
            id: host.into(),
        }
    }

    pub fn service_not_found(service_type: &str, host: &str) -> Self {
        Self::NotFound {
            entity: "服务注册",
            id: format!("{service_type}@{host}"),
        }
    }

    pub fn job_not_found(job_id: i64) -> Self {
        Self::NotFound {
            entity: "作业",
            id: job_id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    /// 存储或网络层的瞬时故障，调用方可以在下一轮重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Network(_) | Self::ConcurrentModification { .. }
        )
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_messages() {
        let err = RegistryError::job_not_found(42);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "作业未找到: 42");

        let err = RegistryError::service_not_found("encode", "http://a:8080");
        assert_eq!(err.to_string(), "服务注册未找到: encode@http://a:8080");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RegistryError::Network("connection reset".to_string()).is_retryable());
        assert!(RegistryError::ConcurrentModification {
            job_id: 1,
            expected_version: 2
        }
        .is_retryable());
        assert!(!RegistryError::ServiceUnavailable {
            service_type: "encode".to_string()
        }
        .is_retryable());
        assert!(!RegistryError::host_not_found("http://a").is_retryable());
    }
}
