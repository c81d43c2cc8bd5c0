//! Dev service handles.
//!
//! - [`RunningService`]: something that already runs, owned or discovered
//! - [`StartableService`]: a deferred start that consults the registry first
//! - [`ContainerLauncher`]: the standard start/release action for one container
//! - [`DevServicesConfigSource`]: live connection properties for the config system

mod config_source;
mod launcher;
mod running;
mod startable;

pub use config_source::DevServicesConfigSource;
pub use launcher::{find_free_port, ContainerLauncher};
pub use running::RunningService;
pub use startable::{ServiceState, StartOutcome, StartableService};

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-unique handle identity, used by the registry to find a service
/// again without comparing trait objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ServiceId(u64);

impl ServiceId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ServiceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A config value computed when read, e.g. a URL containing a mapped port.
pub type LazyValue = Arc<dyn Fn() -> String + Send + Sync>;

/// Produces the current connection properties of a registered service.
pub trait ConfigSupplier: Send + Sync {
    fn config(&self) -> BTreeMap<String, String>;
}

/// Capability to tear down what a service started.
#[async_trait]
pub trait Release: Send + Sync {
    async fn release(&self) -> Result<()>;
}

/// Deferred start action. Returns the container id, if there is a single one.
#[async_trait]
pub trait Startable: Send + Sync {
    async fn start(&self) -> Result<Option<String>>;
}

/// Whether closing a service tears anything down.
#[derive(Clone)]
pub enum Ownership {
    /// Started by us; closing invokes the release.
    Owned(Arc<dyn Release>),
    /// Found already running; closing only drops our handle.
    Discovered,
}

impl fmt::Debug for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::Owned(_) => f.write_str("Owned"),
            Ownership::Discovered => f.write_str("Discovered"),
        }
    }
}

#[async_trait]
pub trait DevService: Send + Sync {
    fn id(&self) -> ServiceId;

    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn container_id(&self) -> Option<String>;

    fn is_running(&self) -> bool;

    fn is_owner(&self) -> bool;

    /// Connection properties as of now.
    fn config_snapshot(&self) -> BTreeMap<String, String>;

    /// Release owned resources and mark the service stopped.
    ///
    /// Idempotent; safe to call from several tasks at once.
    async fn close(&self) -> Result<()>;

    /// Supplier view for the config source. Only startable services have one.
    fn as_supplier(self: Arc<Self>) -> Option<Arc<dyn ConfigSupplier>> {
        None
    }
}

impl fmt::Debug for dyn DevService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevService")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("container_id", &self.container_id())
            .field("running", &self.is_running())
            .finish()
    }
}
