use super::{AppIdentity, ServiceConfig};
use crate::service::DevService;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One registered service, as plain data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotEntry {
    pub identity: AppIdentity,
    pub config: BTreeMap<String, String>,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub running: bool,
    pub owner: bool,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<SnapshotEntry>,
}

impl RegistrySnapshot {
    pub(super) fn capture(services: Vec<(ServiceConfig, Arc<dyn DevService>)>) -> Self {
        let mut entries: Vec<SnapshotEntry> = services
            .into_iter()
            .map(|(key, service)| SnapshotEntry {
                identity: key.identity,
                config: key.config,
                service: service.name().to_string(),
                description: service.description().map(str::to_string),
                container_id: service.container_id(),
                running: service.is_running(),
                owner: service.is_owner(),
            })
            .collect();
        entries.sort_by(|a, b| {
            (&a.identity, &a.service, &a.config).cmp(&(&b.identity, &b.service, &b.config))
        });
        Self {
            taken_at: Utc::now(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries belonging to `feature`.
    pub fn for_feature<'a>(&'a self, feature: &'a str) -> impl Iterator<Item = &'a SnapshotEntry> {
        self.entries
            .iter()
            .filter(move |e| e.identity.feature == feature)
    }
}
