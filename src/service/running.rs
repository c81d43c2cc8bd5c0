use super::{DevService, Ownership, Release, ServiceId};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle to a service that is already up.
///
/// `close()` runs the release (for owned services) at most once: a close that
/// races another waits for it, and a close after a failed release tries again.
pub struct RunningService {
    id: ServiceId,
    name: String,
    description: Option<String>,
    container_id: RwLock<Option<String>>,
    config: BTreeMap<String, String>,
    ownership: Ownership,
    running: AtomicBool,
    /// `true` once the release has succeeded.
    released: tokio::sync::Mutex<bool>,
}

impl RunningService {
    fn build(
        name: impl Into<String>,
        container_id: Option<String>,
        config: BTreeMap<String, String>,
        ownership: Ownership,
        running: bool,
    ) -> Self {
        Self {
            id: ServiceId::next(),
            name: name.into(),
            description: None,
            container_id: RwLock::new(container_id),
            config,
            ownership,
            running: AtomicBool::new(running),
            released: tokio::sync::Mutex::new(false),
        }
    }

    /// A service we started and must tear down on close.
    pub fn owned(
        name: impl Into<String>,
        container_id: Option<String>,
        config: BTreeMap<String, String>,
        release: Arc<dyn Release>,
    ) -> Self {
        Self::build(name, container_id, config, Ownership::Owned(release), true)
    }

    /// A service somebody else started; close never touches it.
    pub fn discovered(
        name: impl Into<String>,
        container_id: Option<String>,
        config: BTreeMap<String, String>,
    ) -> Self {
        Self::build(name, container_id, config, Ownership::Discovered, true)
    }

    /// Owned, but not started yet.
    pub(super) fn pending(
        name: impl Into<String>,
        config: BTreeMap<String, String>,
        release: Arc<dyn Release>,
    ) -> Self {
        Self::build(name, None, config, Ownership::Owned(release), false)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    pub fn static_config(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    pub(super) fn mark_started(&self, container_id: Option<String>) {
        *self.container_id.write() = container_id;
        self.running.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DevService for RunningService {
    fn id(&self) -> ServiceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn container_id(&self) -> Option<String> {
        self.container_id.read().clone()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_owner(&self) -> bool {
        matches!(self.ownership, Ownership::Owned(_))
    }

    fn config_snapshot(&self) -> BTreeMap<String, String> {
        self.config.clone()
    }

    async fn close(&self) -> Result<()> {
        let mut released = self.released.lock().await;
        if *released {
            return Ok(());
        }
        if let Ownership::Owned(release) = &self.ownership {
            if self.is_running() {
                tracing::debug!("Releasing dev service '{}'", self.name);
                release.release().await?;
            }
        }
        *released = true;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for RunningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningService")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("container_id", &*self.container_id.read())
            .field("ownership", &self.ownership)
            .field("running", &self.is_running())
            .finish()
    }
}
