//! Container engine access.
//!
//! [`ContainerEngine`] is the seam the rest of the crate programs against;
//! [`DockerClient`] implements it over the `docker` CLI.

pub mod client;
pub mod engine;
pub mod error;
pub mod labels;
pub mod locator;

pub use client::DockerClient;
pub use engine::{
    ContainerEngine, ContainerHandle, ContainerPort, ContainerSpec, ContainerState,
    ContainerSummary, HealthStatus, PortBinding,
};
pub use error::DockerError;
pub use locator::{ContainerAddress, ContainerLocator};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Cache duration for daemon health. Build steps ask once per service.
const DAEMON_HEALTH_CACHE_DURATION: Duration = Duration::from_secs(5);

static DAEMON_HEALTHY: AtomicBool = AtomicBool::new(false);

/// Nanos since `REFERENCE_INSTANT` of the last check; 0 means never.
static DAEMON_HEALTH_CHECKED_AT: AtomicU64 = AtomicU64::new(0);

static REFERENCE_INSTANT: OnceLock<Instant> = OnceLock::new();

fn elapsed_nanos() -> u64 {
    // +1 so a check in the very first nanosecond is not mistaken for "never"
    REFERENCE_INSTANT.get_or_init(Instant::now).elapsed().as_nanos() as u64 + 1
}

/// Check if the Docker daemon is responsive, caching the answer briefly.
pub async fn is_daemon_healthy(client: &DockerClient) -> bool {
    let last_checked = DAEMON_HEALTH_CHECKED_AT.load(Ordering::Relaxed);
    let now = elapsed_nanos();
    let cache_valid = last_checked > 0
        && now.saturating_sub(last_checked) < DAEMON_HEALTH_CACHE_DURATION.as_nanos() as u64;

    if cache_valid {
        return DAEMON_HEALTHY.load(Ordering::Relaxed);
    }

    let healthy = client.daemon_healthy(Duration::from_secs(2)).await;
    if !healthy {
        tracing::debug!("Docker daemon did not answer `docker info`");
    }

    DAEMON_HEALTHY.store(healthy, Ordering::Relaxed);
    DAEMON_HEALTH_CHECKED_AT.store(now, Ordering::Relaxed);

    healthy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn daemon_check_is_stable_within_cache_window() {
        // Either answer is fine; the second must come from the cache.
        let client = DockerClient::new();
        let first = is_daemon_healthy(&client).await;
        let second = is_daemon_healthy(&client).await;
        assert_eq!(first, second);
    }

    #[test]
    fn elapsed_nanos_is_never_zero() {
        assert!(elapsed_nanos() > 0);
    }
}
