use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 服务注册的复合标识 (服务类型, 主机)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceRegistrationKey {
    pub service_type: String,
    pub host: String,
}

impl ServiceRegistrationKey {
    pub fn new(service_type: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            host: host.into(),
        }
    }
}

impl std::fmt::Display for ServiceRegistrationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.service_type, self.host)
    }
}

/// 服务注册：某主机声明其提供某类型的服务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub service_type: String,
    pub host: String,
    /// 服务在主机上的路径，分发地址为 `{host}{path}/dispatch`
    pub path: String,
    pub online: bool,
    pub job_producer: bool,
    /// 由所属主机的维护状态投影而来
    pub maintenance: bool,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRegistration {
    pub fn new(
        service_type: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
        job_producer: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            service_type: service_type.into(),
            host: host.into(),
            path: path.into(),
            online: true,
            job_producer,
            maintenance: false,
            registered_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> ServiceRegistrationKey {
        ServiceRegistrationKey::new(&self.service_type, &self.host)
    }

    pub fn is_dispatchable(&self) -> bool {
        self.online && !self.maintenance
    }

    /// 分发端点的完整URL
    pub fn dispatch_url(&self, suffix: &str) -> String {
        format!(
            "{}{}{}",
            self.host.trim_end_matches('/'),
            self.path.trim_end_matches('/'),
            suffix
        )
    }
}
