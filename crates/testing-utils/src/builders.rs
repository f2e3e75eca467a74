//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use chrono::{DateTime, Utc};
use registry_core::models::{HostRegistration, Job, JobStatus, ServiceRegistration};

/// Builder for creating test Job entities
///
/// Defaults to a QUEUED `encode` job created by `http://localhost:8080`.
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            job: Job {
                id: 1,
                version: 1,
                job_type: "encode".to_string(),
                operation: "encode".to_string(),
                arguments: vec![],
                payload: None,
                status: JobStatus::Queued,
                creator_host: "http://localhost:8080".to_string(),
                processing_host: None,
                completed_host: None,
                date_created: Utc::now(),
                date_started: None,
                date_completed: None,
                queue_time_ms: None,
                run_time_ms: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.job.id = id;
        self
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.job.version = version;
        self
    }

    pub fn with_job_type(mut self, job_type: &str) -> Self {
        self.job.job_type = job_type.to_string();
        self.job.operation = job_type.to_string();
        self
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.job.operation = operation.to_string();
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.job.arguments = arguments;
        self
    }

    pub fn with_payload(mut self, payload: &str) -> Self {
        self.job.payload = Some(payload.to_string());
        self
    }

    pub fn with_creator(mut self, host: &str) -> Self {
        self.job.creator_host = host.to_string();
        self
    }

    /// Marks the job RUNNING on `host`, started now
    pub fn with_processor(mut self, host: &str) -> Self {
        let now = Utc::now();
        self.job.status = JobStatus::Running;
        self.job.processing_host = Some(host.to_string());
        self.job.date_started = Some(now);
        self.job.queue_time_ms = Some((now - self.job.date_created).num_milliseconds().max(0));
        self
    }

    /// Marks the job FINISHED on `host` with the given durations
    pub fn finished_on(mut self, host: &str, queue_time_ms: i64, run_time_ms: i64) -> Self {
        let now = Utc::now();
        self.job.status = JobStatus::Finished;
        self.job.processing_host = None;
        self.job.completed_host = Some(host.to_string());
        self.job.date_started = Some(now);
        self.job.date_completed = Some(now);
        self.job.queue_time_ms = Some(queue_time_ms);
        self.job.run_time_ms = Some(run_time_ms);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn with_date_created(mut self, date_created: DateTime<Utc>) -> Self {
        self.job.date_created = date_created;
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test ServiceRegistration entities
pub struct ServiceRegistrationBuilder {
    registration: ServiceRegistration,
}

impl ServiceRegistrationBuilder {
    pub fn new(service_type: &str, host: &str) -> Self {
        Self {
            registration: ServiceRegistration::new(
                service_type,
                host,
                format!("/{service_type}"),
                false,
            ),
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.registration.path = path.to_string();
        self
    }

    pub fn job_producer(mut self) -> Self {
        self.registration.job_producer = true;
        self
    }

    pub fn offline(mut self) -> Self {
        self.registration.online = false;
        self
    }

    pub fn in_maintenance(mut self) -> Self {
        self.registration.maintenance = true;
        self
    }

    pub fn build(self) -> ServiceRegistration {
        self.registration
    }
}

/// Builder for creating test HostRegistration entities
pub struct HostRegistrationBuilder {
    host: HostRegistration,
}

impl HostRegistrationBuilder {
    pub fn new(host: &str) -> Self {
        Self {
            host: HostRegistration::new(host, 4),
        }
    }

    pub fn with_max_jobs(mut self, max_jobs: i32) -> Self {
        self.host.max_jobs = max_jobs;
        self
    }

    pub fn offline(mut self) -> Self {
        self.host.online = false;
        self
    }

    pub fn in_maintenance(mut self) -> Self {
        self.host.maintenance = true;
        self
    }

    pub fn build(self) -> HostRegistration {
        self.host
    }
}
