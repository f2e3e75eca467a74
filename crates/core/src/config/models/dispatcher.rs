use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// 单轮内并行处理的作业数，1 表示严格顺序
    pub max_concurrent_dispatches: usize,
    pub request_timeout_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            max_concurrent_dispatches: 1,
            request_timeout_seconds: 30,
        }
    }
}

impl DispatcherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_ms == 0 {
            return Err(anyhow::anyhow!("分发间隔必须大于0"));
        }

        if self.max_concurrent_dispatches == 0 {
            return Err(anyhow::anyhow!("最大并发分发数必须大于0"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }

        Ok(())
    }
}
