use serde::{Deserialize, Serialize};
use url::Url;

/// 未配置服务地址时使用的默认值
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// 最大作业数配置，允许整数或字符串形式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxJobsSetting {
    Count(i64),
    Text(String),
}

impl MaxJobsSetting {
    fn parse(&self) -> Option<i32> {
        let value = match self {
            MaxJobsSetting::Count(n) => *n,
            MaxJobsSetting::Text(s) => s.trim().parse::<i64>().ok()?,
        };
        i32::try_from(value).ok().filter(|n| *n > 0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 本协调器对外可访问的基础URL
    pub server_url: Option<String>,
    pub max_jobs: Option<MaxJobsSetting>,
    pub dispatch_path_suffix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            max_jobs: None,
            dispatch_path_suffix: "/dispatch".to_string(),
        }
    }
}

impl RegistryConfig {
    /// 本协调器的主机标识，未配置或为空时使用默认地址
    pub fn server_url(&self) -> String {
        match self.server_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => DEFAULT_SERVER_URL.to_string(),
        }
    }

    /// 未配置、无法解析或小于1时回退为可用处理器数量
    pub fn max_jobs(&self) -> i32 {
        self.max_jobs
            .as_ref()
            .and_then(MaxJobsSetting::parse)
            .unwrap_or_else(available_processors)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let server_url = self.server_url();
        let parsed = Url::parse(&server_url)
            .map_err(|e| anyhow::anyhow!("服务地址格式无效: {}: {}", server_url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow::anyhow!("服务地址必须使用http或https: {}", server_url));
        }

        if !self.dispatch_path_suffix.starts_with('/') {
            return Err(anyhow::anyhow!(
                "分发路径后缀必须以'/'开头: {}",
                self.dispatch_path_suffix
            ));
        }

        Ok(())
    }
}

fn available_processors() -> i32 {
    std::thread::available_parallelism()
        .ok()
        .and_then(|n| i32::try_from(n.get()).ok())
        .unwrap_or(1)
}
