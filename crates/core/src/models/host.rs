use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 主机注册信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRegistration {
    /// 主机基础URL，在注册中心内唯一
    pub host: String,
    pub max_jobs: i32,
    pub online: bool,
    pub maintenance: bool,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HostRegistration {
    pub fn new(host: impl Into<String>, max_jobs: i32) -> Self {
        let now = Utc::now();
        Self {
            host: host.into(),
            max_jobs,
            online: true,
            maintenance: false,
            registered_at: now,
            updated_at: now,
        }
    }

    /// 在线且未处于维护模式的主机才能接收新作业
    pub fn accepts_dispatch(&self) -> bool {
        self.online && !self.maintenance
    }
}

/// 主机负载快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostLoad {
    pub host: String,
    pub max_jobs: i32,
    pub running_jobs: i64,
}

impl HostLoad {
    pub fn load_factor(&self) -> f64 {
        if self.max_jobs <= 0 {
            return 1.0;
        }
        self.running_jobs as f64 / self.max_jobs as f64
    }

    pub fn has_capacity(&self) -> bool {
        self.running_jobs < i64::from(self.max_jobs)
    }
}
