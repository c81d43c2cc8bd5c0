//! Cross-restart service registry.
//!
//! The registry outlives every application restart. Each restart asks it
//! whether a compatible service already runs, registers the services it
//! starts, and evicts the ones a previous restart left with a different
//! configuration.
//!
//! Services are partitioned by [`AppIdentity`]; each partition has its own
//! mutex, so restarts of unrelated shapes never contend.

mod identity;
mod snapshot;

pub use identity::{AppIdentity, LaunchMode, ServiceConfig};
pub use snapshot::{RegistrySnapshot, SnapshotEntry};

use crate::error::{Error, Result};
use crate::lock_order::{self, LockId};
use crate::service::{ConfigSupplier, DevService, ServiceId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

type Services = Vec<Arc<dyn DevService>>;
type Bucket = HashMap<BTreeMap<String, String>, Services>;

#[derive(Default)]
pub struct Registry {
    partitions: RwLock<HashMap<AppIdentity, Arc<Mutex<Bucket>>>>,
    suppliers: RwLock<BTreeMap<ServiceId, Arc<dyn ConfigSupplier>>>,
}

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry shared by every restart.
    pub fn global() -> Arc<Registry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Registry::new())))
    }

    fn partition(&self, identity: &AppIdentity) -> Option<Arc<Mutex<Bucket>>> {
        let _order = lock_order::hold(LockId::Partitions);
        let bucket = self.partitions.read().get(identity).cloned();
        bucket
    }

    /// Services registered under exactly `key`.
    pub fn lookup(&self, key: &ServiceConfig) -> Vec<Arc<dyn DevService>> {
        let Some(bucket) = self.partition(&key.identity) else {
            return Vec::new();
        };
        let _order = lock_order::hold(LockId::Bucket);
        let services = bucket.lock().get(&key.config).cloned().unwrap_or_default();
        services
    }

    /// Services under the same identity as `key` but a different configuration.
    pub fn lookup_others(&self, key: &ServiceConfig) -> Vec<Arc<dyn DevService>> {
        self.lookup_others_keyed(key)
            .into_iter()
            .map(|(_, service)| service)
            .collect()
    }

    /// Like [`lookup_others`](Self::lookup_others), with each service's key.
    pub fn lookup_others_keyed(
        &self,
        key: &ServiceConfig,
    ) -> Vec<(ServiceConfig, Arc<dyn DevService>)> {
        let Some(bucket) = self.partition(&key.identity) else {
            return Vec::new();
        };
        let _order = lock_order::hold(LockId::Bucket);
        let bucket = bucket.lock();
        let others = bucket
            .iter()
            .filter(|(config, _)| **config != key.config)
            .flat_map(|(config, services)| {
                services.iter().map(move |s| {
                    (
                        ServiceConfig::new(key.identity.clone(), config.clone()),
                        Arc::clone(s),
                    )
                })
            })
            .collect();
        others
    }

    /// Everything registered under `identity`.
    pub fn services_for(&self, identity: &AppIdentity) -> Vec<(ServiceConfig, Arc<dyn DevService>)> {
        let Some(bucket) = self.partition(identity) else {
            return Vec::new();
        };
        let _order = lock_order::hold(LockId::Bucket);
        let bucket = bucket.lock();
        let entries = bucket
            .iter()
            .flat_map(|(config, services)| {
                services.iter().map(move |s| {
                    (
                        ServiceConfig::new(identity.clone(), config.clone()),
                        Arc::clone(s),
                    )
                })
            })
            .collect();
        entries
    }

    /// Every registered service with its key.
    pub fn all_services(&self) -> Vec<(ServiceConfig, Arc<dyn DevService>)> {
        let identities: Vec<AppIdentity> = {
            let _order = lock_order::hold(LockId::Partitions);
            self.partitions.read().keys().cloned().collect()
        };
        identities
            .iter()
            .flat_map(|identity| self.services_for(identity))
            .collect()
    }

    /// Register `service` as the only service under `key`.
    ///
    /// Any list previously stored under the same key is replaced, not merged.
    pub fn register(&self, key: ServiceConfig, service: Arc<dyn DevService>) {
        let supplier = Arc::clone(&service).as_supplier();
        let id = service.id();

        // Fast path: the partition exists. The read lock stays held so a
        // concurrent prune cannot detach the bucket mid-insert.
        {
            let _order = lock_order::hold(LockId::Partitions);
            let partitions = self.partitions.read();
            if let Some(bucket) = partitions.get(&key.identity) {
                self.insert(bucket, key.config, service, id, supplier);
                return;
            }
        }

        let _order = lock_order::hold(LockId::Partitions);
        let mut partitions = self.partitions.write();
        let bucket = partitions.entry(key.identity).or_default();
        self.insert(bucket, key.config, service, id, supplier);
    }

    fn insert(
        &self,
        bucket: &Mutex<Bucket>,
        config: BTreeMap<String, String>,
        service: Arc<dyn DevService>,
        id: ServiceId,
        supplier: Option<Arc<dyn ConfigSupplier>>,
    ) {
        let _order = lock_order::hold(LockId::Bucket);
        let mut bucket = bucket.lock();
        let replaced = bucket.insert(config, vec![service]).unwrap_or_default();

        let _order = lock_order::hold(LockId::Suppliers);
        let mut suppliers = self.suppliers.write();
        for old in replaced.iter().filter(|s| s.id() != id) {
            suppliers.remove(&old.id());
        }
        match supplier {
            Some(supplier) => {
                suppliers.insert(id, supplier);
            }
            None => {
                suppliers.remove(&id);
            }
        }
    }

    /// Remove `service` from under `key`. Returns whether it was present.
    ///
    /// Empty keys and empty identity partitions are pruned.
    pub fn unregister(&self, key: &ServiceConfig, service: &dyn DevService) -> bool {
        let id = service.id();
        let (removed, partition_empty) = {
            let _order = lock_order::hold(LockId::Partitions);
            let partitions = self.partitions.read();
            let Some(bucket) = partitions.get(&key.identity) else {
                return false;
            };
            let _order = lock_order::hold(LockId::Bucket);
            let mut bucket = bucket.lock();
            let Some(services) = bucket.get_mut(&key.config) else {
                return false;
            };
            let before = services.len();
            services.retain(|s| s.id() != id);
            let removed = services.len() != before;
            if services.is_empty() {
                bucket.remove(&key.config);
            }
            if removed {
                let _order = lock_order::hold(LockId::Suppliers);
                self.suppliers.write().remove(&id);
            }
            (removed, bucket.is_empty())
        };

        if partition_empty {
            let _order = lock_order::hold(LockId::Partitions);
            let mut partitions = self.partitions.write();
            let still_empty = partitions.get(&key.identity).is_some_and(|bucket| {
                let _order = lock_order::hold(LockId::Bucket);
                let empty = bucket.lock().is_empty();
                empty
            });
            if still_empty {
                partitions.remove(&key.identity);
            }
        }

        removed
    }

    /// Configuration suppliers of every registered startable service.
    pub fn live_config_suppliers(&self) -> Vec<Arc<dyn ConfigSupplier>> {
        let _order = lock_order::hold(LockId::Suppliers);
        let suppliers = self.suppliers.read().values().cloned().collect();
        suppliers
    }

    pub fn is_empty(&self) -> bool {
        let _order = lock_order::hold(LockId::Partitions);
        let empty = self.partitions.read().is_empty();
        empty
    }

    /// Plain-data view of the registry.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot::capture(self.all_services())
    }

    /// Close every registered service, collecting failures.
    ///
    /// Used when the host process exits. Services that fail to close stay
    /// registered.
    pub async fn close_all(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (key, service) in self.all_services() {
            match service.close().await {
                Ok(()) => {
                    self.unregister(&key, service.as_ref());
                }
                Err(e) => {
                    tracing::warn!("Failed to close dev service '{}': {}", service.name(), e);
                    errors.push(e);
                }
            }
        }
        Error::from_many(errors)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let partitions = {
            let _order = lock_order::hold(LockId::Partitions);
            self.partitions.read().len()
        };
        f.debug_struct("Registry")
            .field("partitions", &partitions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::RunningService;

    fn key(feature: &str, image: &str) -> ServiceConfig {
        ServiceConfig::new(AppIdentity::new(feature, LaunchMode::Development), BTreeMap::new())
            .with("image", image)
    }

    fn discovered(name: &str) -> Arc<dyn DevService> {
        Arc::new(RunningService::discovered(name, None, BTreeMap::new()))
    }

    #[test]
    fn equal_keys_find_the_service() {
        let registry = Registry::new();
        let service = discovered("redis");
        registry.register(key("redis", "redis:7"), Arc::clone(&service));

        let found = registry.lookup(&key("redis", "redis:7"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), service.id());
        assert!(registry.lookup(&key("redis", "redis:6")).is_empty());
    }

    #[test]
    fn lookup_others_excludes_exact_key() {
        let registry = Registry::new();
        let service = discovered("redis");
        registry.register(key("redis", "redis:7"), Arc::clone(&service));

        let others = registry.lookup_others(&key("redis", "redis:6"));
        assert_eq!(others.len(), 1);
        assert!(registry.lookup_others(&key("redis", "redis:7")).is_empty());
        // Different identity never sees it
        assert!(registry.lookup_others(&key("kafka", "redis:6")).is_empty());
    }

    #[test]
    fn register_replaces_the_list() {
        let registry = Registry::new();
        let first = discovered("a");
        let second = discovered("b");
        registry.register(key("redis", "redis:7"), Arc::clone(&first));
        registry.register(key("redis", "redis:7"), Arc::clone(&second));

        let found = registry.lookup(&key("redis", "redis:7"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), second.id());
    }

    #[test]
    fn unregister_is_idempotent_and_prunes() {
        let registry = Registry::new();
        let service = discovered("redis");
        let k = key("redis", "redis:7");
        registry.register(k.clone(), Arc::clone(&service));

        assert!(registry.unregister(&k, service.as_ref()));
        assert!(!registry.unregister(&k, service.as_ref()));
        assert!(registry.lookup(&k).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_of_absent_service_is_noop() {
        let registry = Registry::new();
        let kept = discovered("kept");
        let stranger = discovered("stranger");
        let k = key("redis", "redis:7");
        registry.register(k.clone(), Arc::clone(&kept));

        assert!(!registry.unregister(&k, stranger.as_ref()));
        assert_eq!(registry.lookup(&k).len(), 1);
    }

    #[test]
    fn discovered_services_have_no_supplier() {
        let registry = Registry::new();
        registry.register(key("redis", "redis:7"), discovered("redis"));
        assert!(registry.live_config_suppliers().is_empty());
    }

    #[tokio::test]
    async fn close_all_empties_the_registry() {
        let registry = Registry::new();
        registry.register(key("redis", "redis:7"), discovered("redis"));
        registry.register(key("kafka", "kafka:3"), discovered("kafka"));
        registry.close_all().await.unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn global_is_shared() {
        assert!(Arc::ptr_eq(&Registry::global(), &Registry::global()));
    }
}
