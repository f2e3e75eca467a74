//! Mock implementations of the persistence ports and the dispatch client
//!
//! `InMemoryRegistryStore` implements all three repository traits over one
//! shared state so cascades (host offline → services offline → jobs requeued)
//! behave exactly like the SQLite adapter, including the version CAS.

use async_trait::async_trait;
use chrono::Utc;
use registry_core::models::{
    HostRegistration, Job, JobFilter, JobStatisticsRow, JobStatus, NewJob, ServiceRegistration,
    ServiceRegistrationKey,
};
use registry_core::traits::{
    DispatchClient, DispatchResponse, HostRepository, JobRepository,
    ServiceRegistrationRepository,
};
use registry_core::{RegistryError, RegistryResult};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct StoreState {
    hosts: BTreeMap<String, HostRegistration>,
    services: BTreeMap<ServiceRegistrationKey, ServiceRegistration>,
    jobs: BTreeMap<i64, Job>,
    next_job_id: i64,
    fail_job_listing: bool,
    injected_conflicts: HashSet<i64>,
}

impl StoreState {
    fn project(&self, registration: &ServiceRegistration) -> ServiceRegistration {
        let mut registration = registration.clone();
        registration.maintenance = self
            .hosts
            .get(&registration.host)
            .is_some_and(|h| h.maintenance);
        registration
    }

    fn requeue_running(&mut self, job_type: Option<&str>, host: &str) -> Vec<i64> {
        let mut requeued = Vec::new();
        for job in self.jobs.values_mut() {
            let matches = job.status == JobStatus::Running
                && job.processing_host.as_deref() == Some(host)
                && job_type.is_none_or(|t| t == job.job_type);
            if matches {
                job.requeue();
                job.completed_host = None;
                job.date_started = None;
                job.date_completed = None;
                job.queue_time_ms = None;
                job.run_time_ms = None;
                job.version += 1;
                requeued.push(job.id);
            }
        }
        requeued
    }
}

/// In-memory implementation of every repository trait
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `JobRepository::list` fail until reset
    pub fn set_job_listing_failure(&self, fail: bool) {
        self.state.lock().unwrap().fail_job_listing = fail;
    }

    /// The next `update` of this job behaves as if another coordinator won the race
    pub fn inject_conflict(&self, job_id: i64) {
        self.state.lock().unwrap().injected_conflicts.insert(job_id);
    }

    pub fn all_jobs(&self) -> Vec<Job> {
        self.state.lock().unwrap().jobs.values().cloned().collect()
    }

    pub fn job(&self, id: i64) -> Option<Job> {
        self.state.lock().unwrap().jobs.get(&id).cloned()
    }

    /// Insert a job as-is, bypassing id assignment
    pub fn put_job(&self, job: Job) {
        let mut state = self.state.lock().unwrap();
        state.next_job_id = state.next_job_id.max(job.id);
        state.jobs.insert(job.id, job);
    }
}

#[async_trait]
impl HostRepository for InMemoryRegistryStore {
    async fn upsert(&self, host: &str, max_jobs: i32) -> RegistryResult<HostRegistration> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let entry = state
            .hosts
            .entry(host.to_string())
            .or_insert_with(|| HostRegistration::new(host, max_jobs));
        entry.max_jobs = max_jobs;
        entry.online = true;
        entry.updated_at = now;
        Ok(entry.clone())
    }

    async fn get(&self, host: &str) -> RegistryResult<Option<HostRegistration>> {
        Ok(self.state.lock().unwrap().hosts.get(host).cloned())
    }

    async fn list(&self) -> RegistryResult<Vec<HostRegistration>> {
        Ok(self.state.lock().unwrap().hosts.values().cloned().collect())
    }

    async fn set_maintenance(
        &self,
        host: &str,
        maintenance: bool,
    ) -> RegistryResult<HostRegistration> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .hosts
            .get_mut(host)
            .ok_or_else(|| RegistryError::host_not_found(host))?;
        entry.maintenance = maintenance;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn mark_offline(&self, host: &str) -> RegistryResult<Vec<i64>> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .hosts
            .get_mut(host)
            .ok_or_else(|| RegistryError::host_not_found(host))?;
        entry.online = false;

        for registration in state.services.values_mut().filter(|r| r.host == host) {
            registration.online = false;
        }
        Ok(state.requeue_running(None, host))
    }
}

#[async_trait]
impl ServiceRegistrationRepository for InMemoryRegistryStore {
    async fn upsert(
        &self,
        service_type: &str,
        host: &str,
        path: &str,
        job_producer: Option<bool>,
    ) -> RegistryResult<ServiceRegistration> {
        let mut state = self.state.lock().unwrap();
        match state.hosts.get(host) {
            None => return Err(RegistryError::host_not_found(host)),
            Some(h) if !h.online => {
                return Err(RegistryError::HostOffline {
                    host: host.to_string(),
                })
            }
            Some(_) => {}
        }

        let key = ServiceRegistrationKey::new(service_type, host);
        let path = path.trim();
        match state.services.get_mut(&key) {
            Some(existing) => {
                existing.online = true;
                if !path.is_empty() {
                    existing.path = path.to_string();
                }
                if let Some(job_producer) = job_producer {
                    existing.job_producer = job_producer;
                }
                existing.updated_at = Utc::now();
            }
            None => {
                if path.is_empty() {
                    return Err(RegistryError::InvalidArgument(format!(
                        "新注册的服务 {key} 必须指定路径"
                    )));
                }
                let registration = ServiceRegistration::new(
                    service_type,
                    host,
                    path,
                    job_producer.unwrap_or(false),
                );
                state.services.insert(key.clone(), registration);
            }
        }

        let registration = &state.services[&key];
        Ok(state.project(registration))
    }

    async fn get(
        &self,
        service_type: &str,
        host: &str,
    ) -> RegistryResult<Option<ServiceRegistration>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .services
            .get(&ServiceRegistrationKey::new(service_type, host))
            .map(|r| state.project(r)))
    }

    async fn list(&self) -> RegistryResult<Vec<ServiceRegistration>> {
        let state = self.state.lock().unwrap();
        Ok(state.services.values().map(|r| state.project(r)).collect())
    }

    async fn list_by_type(&self, service_type: &str) -> RegistryResult<Vec<ServiceRegistration>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .services
            .values()
            .filter(|r| r.service_type == service_type)
            .map(|r| state.project(r))
            .collect())
    }

    async fn list_by_host(&self, host: &str) -> RegistryResult<Vec<ServiceRegistration>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .services
            .values()
            .filter(|r| r.host == host)
            .map(|r| state.project(r))
            .collect())
    }

    async fn mark_offline(&self, service_type: &str, host: &str) -> RegistryResult<Vec<i64>> {
        let mut state = self.state.lock().unwrap();
        let registration = state
            .services
            .get_mut(&ServiceRegistrationKey::new(service_type, host))
            .ok_or_else(|| RegistryError::service_not_found(service_type, host))?;
        registration.online = false;
        Ok(state.requeue_running(Some(service_type), host))
    }
}

#[async_trait]
impl JobRepository for InMemoryRegistryStore {
    async fn insert(&self, job: &NewJob) -> RegistryResult<Job> {
        let mut state = self.state.lock().unwrap();
        let creator = ServiceRegistrationKey::new(&job.job_type, &job.creator_host);
        if !state.services.contains_key(&creator) {
            return Err(RegistryError::service_not_found(&job.job_type, &job.creator_host));
        }

        state.next_job_id += 1;
        let created = Job {
            id: state.next_job_id,
            version: 1,
            job_type: job.job_type.clone(),
            operation: job.operation.clone(),
            arguments: job.arguments.clone(),
            payload: job.payload.clone(),
            status: job.status,
            creator_host: job.creator_host.clone(),
            processing_host: job.processing_host.clone(),
            completed_host: None,
            date_created: job.date_created,
            date_started: job.date_started,
            date_completed: None,
            queue_time_ms: job.queue_time_ms,
            run_time_ms: None,
        };
        state.jobs.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: i64) -> RegistryResult<Option<Job>> {
        Ok(self.state.lock().unwrap().jobs.get(&id).cloned())
    }

    async fn update(&self, job: &Job) -> RegistryResult<Job> {
        let mut state = self.state.lock().unwrap();
        if (job.status == JobStatus::Running) != job.processing_host.is_some() {
            return Err(RegistryError::InvalidState(format!(
                "作业 {} 的状态与处理主机不一致",
                job.id
            )));
        }

        let conflict = state.injected_conflicts.remove(&job.id);
        let persisted = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| RegistryError::job_not_found(job.id))?;

        if conflict {
            persisted.version += 1;
        }
        if persisted.version != job.version {
            return Err(RegistryError::ConcurrentModification {
                job_id: job.id,
                expected_version: job.version,
            });
        }

        let mut updated = job.clone();
        updated.version += 1;
        // 不可变字段以存储为准
        updated.job_type = persisted.job_type.clone();
        updated.creator_host = persisted.creator_host.clone();
        updated.date_created = persisted.date_created;
        *persisted = updated.clone();
        Ok(updated)
    }

    async fn list(&self, filter: &JobFilter) -> RegistryResult<Vec<Job>> {
        let state = self.state.lock().unwrap();
        if state.fail_job_listing {
            return Err(RegistryError::Internal("simulated storage failure".to_string()));
        }
        Ok(state
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &JobFilter) -> RegistryResult<i64> {
        let state = self.state.lock().unwrap();
        Ok(state.jobs.values().filter(|job| filter.matches(job)).count() as i64)
    }

    async fn statistics(&self, job_type: Option<&str>) -> RegistryResult<Vec<JobStatisticsRow>> {
        #[derive(Default)]
        struct Acc {
            count: i64,
            queue_total: i64,
            queue_samples: i64,
            run_total: i64,
            run_samples: i64,
        }

        let state = self.state.lock().unwrap();
        let mut groups: BTreeMap<(ServiceRegistrationKey, JobStatus), Acc> = BTreeMap::new();

        for job in state.jobs.values() {
            if job_type.is_some_and(|t| t != job.job_type) {
                continue;
            }
            let host = match job.status {
                JobStatus::Queued => Some(&job.creator_host),
                JobStatus::Running => job.processing_host.as_ref(),
                JobStatus::Finished => job.completed_host.as_ref(),
                _ => None,
            };
            let Some(host) = host else { continue };

            let acc = groups
                .entry((ServiceRegistrationKey::new(&job.job_type, host), job.status))
                .or_default();
            acc.count += 1;
            if let Some(q) = job.queue_time_ms {
                acc.queue_total += q;
                acc.queue_samples += 1;
            }
            if let Some(r) = job.run_time_ms {
                acc.run_total += r;
                acc.run_samples += 1;
            }
        }

        Ok(groups
            .into_iter()
            .map(|((registration, status), acc)| {
                let finished = status == JobStatus::Finished;
                let mean = |total: i64, samples: i64| {
                    (finished && samples > 0).then(|| total as f64 / samples as f64)
                };
                JobStatisticsRow {
                    registration,
                    status,
                    job_count: acc.count,
                    mean_queue_time_ms: mean(acc.queue_total, acc.queue_samples),
                    mean_run_time_ms: mean(acc.run_total, acc.run_samples),
                }
            })
            .collect())
    }
}

/// A dispatch attempt recorded by `MockDispatchClient`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchCall {
    pub host: String,
    pub job_id: i64,
    pub job_version: i32,
}

/// Scripted dispatch client
///
/// Each host answers with its queued scripted responses first, then with its
/// default response, then with the client-wide default (`Accepted` unless changed).
#[derive(Debug, Clone)]
pub struct MockDispatchClient {
    default_response: DispatchResponse,
    host_defaults: Arc<Mutex<HashMap<String, DispatchResponse>>>,
    scripts: Arc<Mutex<HashMap<String, VecDeque<DispatchResponse>>>>,
    calls: Arc<Mutex<Vec<DispatchCall>>>,
    delay: Option<Duration>,
}

impl MockDispatchClient {
    pub fn new() -> Self {
        Self::with_default(DispatchResponse::Accepted)
    }

    pub fn with_default(response: DispatchResponse) -> Self {
        Self {
            default_response: response,
            host_defaults: Arc::new(Mutex::new(HashMap::new())),
            scripts: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Simulate a slow endpoint
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond(&self, host: &str, response: DispatchResponse) {
        self.host_defaults
            .lock()
            .unwrap()
            .insert(host.to_string(), response);
    }

    pub fn script(&self, host: &str, responses: Vec<DispatchResponse>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .extend(responses);
    }

    pub fn calls(&self) -> Vec<DispatchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn hosts_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.host).collect()
    }
}

impl Default for MockDispatchClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchClient for MockDispatchClient {
    async fn dispatch(&self, registration: &ServiceRegistration, job: &Job) -> DispatchResponse {
        self.calls.lock().unwrap().push(DispatchCall {
            host: registration.host.clone(),
            job_id: job.id,
            job_version: job.version,
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&registration.host)
            .and_then(VecDeque::pop_front);
        if let Some(response) = scripted {
            return response;
        }

        self.host_defaults
            .lock()
            .unwrap()
            .get(&registration.host)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> InMemoryRegistryStore {
        let store = InMemoryRegistryStore::new();
        HostRepository::upsert(&store, "http://a:8080", 2).await.unwrap();
        ServiceRegistrationRepository::upsert(&store, "encode", "http://a:8080", "/encode", None)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_cas_conflict() {
        let store = seeded().await;
        let job = store
            .insert(&NewJob::queued("encode", "run", vec![], None, "http://a:8080"))
            .await
            .unwrap();

        let mut claimed = job.clone();
        claimed.assign_to("http://a:8080");
        store.update(&claimed).await.unwrap();

        let err = store.update(&claimed).await.unwrap_err();
        assert!(err.is_concurrent_modification());
    }

    #[tokio::test]
    async fn test_injected_conflict_is_consumed() {
        let store = seeded().await;
        let job = store
            .insert(&NewJob::queued("encode", "run", vec![], None, "http://a:8080"))
            .await
            .unwrap();
        store.inject_conflict(job.id);

        let mut claimed = job.clone();
        claimed.assign_to("http://a:8080");
        assert!(store.update(&claimed).await.unwrap_err().is_concurrent_modification());

        claimed.version = store.job(job.id).unwrap().version;
        assert!(store.update(&claimed).await.is_ok());
    }

    #[tokio::test]
    async fn test_maintenance_projection() {
        let store = seeded().await;
        store.set_maintenance("http://a:8080", true).await.unwrap();
        let reg = ServiceRegistrationRepository::get(&store, "encode", "http://a:8080")
            .await
            .unwrap()
            .unwrap();
        assert!(reg.maintenance);
    }

    #[tokio::test]
    async fn test_service_upsert_rejects_offline_host() {
        let store = seeded().await;
        HostRepository::mark_offline(&store, "http://a:8080").await.unwrap();

        let err = ServiceRegistrationRepository::upsert(&store, "encode", "http://a:8080", "", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::HostOffline { .. }));
        let reg = ServiceRegistrationRepository::get(&store, "encode", "http://a:8080")
            .await
            .unwrap()
            .unwrap();
        assert!(!reg.online);
    }

    #[tokio::test]
    async fn test_statistics_filtered_by_type() {
        let store = seeded().await;
        ServiceRegistrationRepository::upsert(&store, "inspect", "http://a:8080", "/inspect", None)
            .await
            .unwrap();
        store
            .insert(&NewJob::queued("encode", "run", vec![], None, "http://a:8080"))
            .await
            .unwrap();
        store
            .insert(&NewJob::queued("inspect", "run", vec![], None, "http://a:8080"))
            .await
            .unwrap();

        assert_eq!(store.statistics(None).await.unwrap().len(), 2);
        let rows = store.statistics(Some("inspect")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].registration.service_type, "inspect");
    }

    #[tokio::test]
    async fn test_scripted_responses_then_default() {
        let client = MockDispatchClient::new();
        client.script("http://a:8080", vec![DispatchResponse::Declined]);
        let registration = ServiceRegistration::new("encode", "http://a:8080", "/encode", false);
        let job = crate::builders::JobBuilder::new().build();

        assert_eq!(client.dispatch(&registration, &job).await, DispatchResponse::Declined);
        assert_eq!(client.dispatch(&registration, &job).await, DispatchResponse::Accepted);
        assert_eq!(client.calls().len(), 2);
    }
}
