use super::ConfigSupplier;
use crate::registry::Registry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Exposes the connection properties of every registered dev service as a
/// low-priority configuration source.
///
/// Values are read through the registry's live suppliers on every call, so a
/// service registered or evicted after a restart is visible immediately.
#[derive(Debug, Clone)]
pub struct DevServicesConfigSource {
    registry: Arc<Registry>,
}

impl DevServicesConfigSource {
    pub const NAME: &'static str = "DevServicesConfigSource";

    /// Below application files and environment variables, so anything the
    /// user sets explicitly wins.
    pub const ORDINAL: i32 = 10;

    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    fn suppliers(&self) -> Vec<Arc<dyn ConfigSupplier>> {
        self.registry.live_config_suppliers()
    }

    pub fn property_names(&self) -> BTreeSet<String> {
        self.suppliers()
            .iter()
            .flat_map(|s| s.config().into_keys())
            .collect()
    }

    /// Value of `name` from the first supplier that defines it.
    pub fn get_value(&self, name: &str) -> Option<String> {
        self.suppliers()
            .iter()
            .find_map(|s| s.config().remove(name))
    }

    /// All properties; where suppliers overlap the first one wins.
    pub fn properties(&self) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for supplier in self.suppliers() {
            for (key, value) in supplier.config() {
                merged.entry(key).or_insert(value);
            }
        }
        merged
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn ordinal(&self) -> i32 {
        Self::ORDINAL
    }
}
