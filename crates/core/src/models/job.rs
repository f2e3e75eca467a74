use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{RegistryError, RegistryResult};
use crate::models::ServiceRegistrationKey;

/// 作业：集群中的一个异步工作单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// 乐观锁版本号，每次成功更新后递增
    pub version: i32,
    pub job_type: String,
    pub operation: String,
    pub arguments: Vec<String>,
    pub payload: Option<String>,
    pub status: JobStatus,
    /// 创建该作业的服务注册所在主机
    pub creator_host: String,
    /// 当前处理该作业的主机，仅在 RUNNING 时存在
    pub processing_host: Option<String>,
    /// 作业进入终态时所在的主机
    pub completed_host: Option<String>,
    pub date_created: DateTime<Utc>,
    pub date_started: Option<DateTime<Utc>>,
    pub date_completed: Option<DateTime<Utc>>,
    pub queue_time_ms: Option<i64>,
    pub run_time_ms: Option<i64>,
}

/// 作业状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobStatus {
    #[serde(rename = "INSTANTIATED")]
    Instantiated,
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "FINISHED")]
    Finished,
    #[serde(rename = "FAILED")]
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Instantiated => "INSTANTIATED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSTANTIATED" => Ok(JobStatus::Instantiated),
            "QUEUED" => Ok(JobStatus::Queued),
            "RUNNING" => Ok(JobStatus::Running),
            "FINISHED" => Ok(JobStatus::Finished),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(RegistryError::InvalidArgument(format!("无效的作业状态: {s}"))),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<JobStatus>()
            .map_err(|_| format!("Invalid job status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 新建作业请求，由持久化层分配ID和版本号
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub operation: String,
    pub arguments: Vec<String>,
    pub payload: Option<String>,
    pub status: JobStatus,
    pub creator_host: String,
    pub processing_host: Option<String>,
    pub date_created: DateTime<Utc>,
    pub date_started: Option<DateTime<Utc>>,
    pub queue_time_ms: Option<i64>,
}

impl NewJob {
    pub fn queued(
        job_type: impl Into<String>,
        operation: impl Into<String>,
        arguments: Vec<String>,
        payload: Option<String>,
        creator_host: impl Into<String>,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            operation: operation.into(),
            arguments,
            payload,
            status: JobStatus::Queued,
            creator_host: creator_host.into(),
            processing_host: None,
            date_created: Utc::now(),
            date_started: None,
            queue_time_ms: None,
        }
    }

    /// 由创建者自身立即处理的作业
    pub fn started_locally(mut self) -> Self {
        let now = Utc::now();
        self.status = JobStatus::Running;
        self.processing_host = Some(self.creator_host.clone());
        self.date_created = now;
        self.date_started = Some(now);
        self.queue_time_ms = Some(0);
        self
    }

    pub fn instantiated(mut self) -> Self {
        self.status = JobStatus::Instantiated;
        self
    }
}

/// 作业查询条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub job_type: Option<String>,
    pub status: Option<JobStatus>,
    pub processing_host: Option<String>,
}

impl JobFilter {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn processing_host(mut self, host: impl Into<String>) -> Self {
        self.processing_host = Some(host.into());
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.job_type.as_ref().is_none_or(|t| *t == job.job_type)
            && self.status.is_none_or(|s| s == job.status)
            && self
                .processing_host
                .as_ref()
                .is_none_or(|h| job.processing_host.as_ref() == Some(h))
    }
}

impl Job {
    pub fn is_queued(&self) -> bool {
        self.status == JobStatus::Queued
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// 当前处理者的服务注册标识
    pub fn processor(&self) -> Option<ServiceRegistrationKey> {
        self.processing_host
            .as_ref()
            .map(|host| ServiceRegistrationKey::new(&self.job_type, host))
    }

    /// 创建者的服务注册标识
    pub fn creator(&self) -> ServiceRegistrationKey {
        ServiceRegistrationKey::new(&self.job_type, &self.creator_host)
    }

    /// 将作业分配给指定主机（尚未持久化）
    pub fn assign_to(&mut self, host: &str) {
        self.status = JobStatus::Running;
        self.processing_host = Some(host.to_string());
    }

    /// 将作业退回队列（尚未持久化）
    pub fn requeue(&mut self) {
        self.status = JobStatus::Queued;
        self.processing_host = None;
    }

    /// 根据持久化状态与当前时间计算时间戳字段。
    ///
    /// 时间戳只取自 `persisted` 和 `now`，调用方内存中的时间字段会被覆盖。
    pub fn stamp_transition(&mut self, persisted: &Job, now: DateTime<Utc>) -> RegistryResult<()> {
        self.job_type = persisted.job_type.clone();
        self.creator_host = persisted.creator_host.clone();
        self.date_created = persisted.date_created;
        self.date_started = persisted.date_started;
        self.date_completed = persisted.date_completed;
        self.queue_time_ms = persisted.queue_time_ms;
        self.run_time_ms = persisted.run_time_ms;
        self.completed_host = persisted.completed_host.clone();

        match self.status {
            JobStatus::Running => {
                if self.processing_host.is_none() {
                    return Err(RegistryError::InvalidArgument(format!(
                        "运行中的作业 {} 必须指定处理主机",
                        self.id
                    )));
                }
                if persisted.status != JobStatus::Running {
                    self.date_started = Some(now);
                    self.queue_time_ms = Some(millis_between(self.date_created, now));
                    self.date_completed = None;
                    self.run_time_ms = None;
                    self.completed_host = None;
                }
            }
            JobStatus::Queued | JobStatus::Instantiated => {
                self.processing_host = None;
                self.completed_host = None;
                self.date_started = None;
                self.date_completed = None;
                self.queue_time_ms = None;
                self.run_time_ms = None;
            }
            JobStatus::Finished | JobStatus::Failed if persisted.status == self.status => {
                // 已处于同一终态，保留完成时间与完成主机
                self.processing_host = None;
            }
            JobStatus::Finished => {
                let started = self.date_started.ok_or_else(|| {
                    RegistryError::InvalidState(format!("作业 {} 从未启动", self.id))
                })?;
                self.date_completed = Some(now);
                self.run_time_ms = Some(millis_between(started, now));
                self.completed_host = self
                    .processing_host
                    .take()
                    .or_else(|| persisted.processing_host.clone());
            }
            JobStatus::Failed => {
                // 失败的作业可能从未真正启动
                if let Some(started) = self.date_started {
                    self.date_completed = Some(now);
                    self.run_time_ms = Some(millis_between(started, now));
                }
                self.completed_host = self
                    .processing_host
                    .take()
                    .or_else(|| persisted.processing_host.clone());
            }
        }

        Ok(())
    }
}

fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds().max(0)
}
