use std::time::Duration;

use async_trait::async_trait;
use registry_core::{
    models::{Job, ServiceRegistration},
    traits::{DispatchClient, DispatchResponse},
    RegistryError, RegistryResult,
};
use reqwest::StatusCode;
use tracing::{debug, warn};

/// 通过 HTTP 将作业投递到远程服务的分发端点
///
/// 请求体为 `application/x-www-form-urlencoded`，唯一字段 `job` 为作业的 JSON 序列化结果。
pub struct HttpDispatchClient {
    http_client: reqwest::Client,
    path_suffix: String,
}

impl HttpDispatchClient {
    pub fn new(request_timeout: Duration, path_suffix: impl Into<String>) -> RegistryResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RegistryError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            http_client,
            path_suffix: path_suffix.into(),
        })
    }

    pub fn with_client(http_client: reqwest::Client, path_suffix: impl Into<String>) -> Self {
        Self {
            http_client,
            path_suffix: path_suffix.into(),
        }
    }
}

#[async_trait]
impl DispatchClient for HttpDispatchClient {
    async fn dispatch(&self, registration: &ServiceRegistration, job: &Job) -> DispatchResponse {
        let url = registration.dispatch_url(&self.path_suffix);
        let body = match serde_json::to_string(job) {
            Ok(body) => body,
            Err(e) => return DispatchResponse::Failed(format!("序列化作业失败: {e}")),
        };

        debug!("分发作业 {} 到 {}", job.id, url);
        match self
            .http_client
            .post(&url)
            .form(&[("job", body.as_str())])
            .send()
            .await
        {
            Ok(response) => match response.status() {
                StatusCode::NO_CONTENT => DispatchResponse::Accepted,
                StatusCode::SERVICE_UNAVAILABLE => DispatchResponse::Declined,
                status => {
                    warn!("分发作业 {} 到 {} 返回意外状态: {}", job.id, url, status);
                    DispatchResponse::Failed(format!("HTTP {status}"))
                }
            },
            Err(e) => {
                warn!("分发作业 {} 到 {} 失败: {}", job.id, url, e);
                DispatchResponse::Failed(e.to_string())
            }
        }
    }
}
