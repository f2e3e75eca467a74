//! Test helper utilities and common testing patterns

use registry_core::traits::{HostRepository, ServiceRegistrationRepository};
use std::time::Duration;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        false
    }

    /// Register `host` with `max_jobs` and one online service per entry of `service_types`
    pub async fn register_host_with_services<R>(
        repo: &R,
        host: &str,
        max_jobs: i32,
        service_types: &[&str],
    ) where
        R: HostRepository + ServiceRegistrationRepository,
    {
        HostRepository::upsert(repo, host, max_jobs).await.unwrap();
        for service_type in service_types {
            ServiceRegistrationRepository::upsert(
                repo,
                service_type,
                host,
                &format!("/{service_type}"),
                None,
            )
            .await
            .unwrap();
        }
    }
}
