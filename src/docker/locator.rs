//! Finding containers that are already running.
//!
//! A shared dev service started by one application carries a label naming the
//! service. Another application (or the next run of the same one) locates it
//! here and connects to it instead of starting its own copy.

use super::engine::{ContainerEngine, ContainerSummary};
use super::labels::COMPOSE_PROJECT_LABEL;
use super::DockerError;
use crate::registry::LaunchMode;
use std::fmt;

/// Where a located container can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerAddress {
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl ContainerAddress {
    /// `host:port`
    pub fn url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ContainerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url(), self.id)
    }
}

#[derive(Debug, Clone)]
enum Filter {
    /// Any of the labels equals the expected value.
    Labels(Vec<String>),
    /// Compose project label contains the expected value and the image
    /// contains one of the partials.
    ComposeImage(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ContainerLocator {
    filter: Filter,
    port: u16,
}

impl ContainerLocator {
    /// Locate containers whose `labels` carry the service name, exposing `port`.
    pub fn with_labels(port: u16, labels: &[&str]) -> Self {
        Self {
            filter: Filter::Labels(labels.iter().map(|l| l.to_string()).collect()),
            port,
        }
    }

    /// Locate containers of a compose project by image name fragment.
    pub fn compose_by_image(port: u16, image_partials: &[&str]) -> Self {
        Self {
            filter: Filter::ComposeImage(image_partials.iter().map(|p| p.to_string()).collect()),
            port,
        }
    }

    fn matches(&self, container: &ContainerSummary, expected: &str) -> bool {
        match &self.filter {
            Filter::Labels(labels) => labels
                .iter()
                .any(|l| container.label(l) == Some(expected)),
            Filter::ComposeImage(partials) => {
                container
                    .label(COMPOSE_PROJECT_LABEL)
                    .is_some_and(|project| project.contains(expected))
                    && partials.iter().any(|p| container.image.contains(p.as_str()))
            }
        }
    }

    /// Find the first matching container with `port` published.
    async fn find(
        &self,
        engine: &dyn ContainerEngine,
        expected: &str,
        private_port: u16,
    ) -> Result<Option<(ContainerSummary, u16)>, DockerError> {
        let containers = engine.list_containers().await?;
        Ok(containers
            .into_iter()
            .filter(|c| self.matches(c, expected))
            .find_map(|c| c.public_port(private_port).map(|public| (c, public))))
    }

    /// Locate a shared container for `service_name`.
    ///
    /// Only shared services in development mode are ever located; in every
    /// other case this returns `Ok(None)` without asking the engine.
    pub async fn locate(
        &self,
        engine: &dyn ContainerEngine,
        service_name: &str,
        shared: bool,
        launch_mode: LaunchMode,
    ) -> Result<Option<ContainerAddress>, DockerError> {
        if !shared || launch_mode != LaunchMode::Development {
            return Ok(None);
        }
        self.locate_unconditionally(engine, service_name).await
    }

    /// Locate a container of the compose project `project`.
    pub async fn locate_in_project(
        &self,
        engine: &dyn ContainerEngine,
        project: &str,
    ) -> Result<Option<ContainerAddress>, DockerError> {
        self.locate_unconditionally(engine, project).await
    }

    async fn locate_unconditionally(
        &self,
        engine: &dyn ContainerEngine,
        expected: &str,
    ) -> Result<Option<ContainerAddress>, DockerError> {
        let Some((container, public)) = self.find(engine, expected, self.port).await? else {
            return Ok(None);
        };
        let address = ContainerAddress {
            id: container.id.clone(),
            host: engine.host(),
            port: public,
        };
        tracing::info!(
            "Dev Services container found: {} ({}). Connecting to: {}.",
            container.id,
            container.image,
            address.url()
        );
        Ok(Some(address))
    }

    /// Public port of `private_port` on a shared container for `service_name`.
    pub async fn locate_public_port(
        &self,
        engine: &dyn ContainerEngine,
        service_name: &str,
        shared: bool,
        launch_mode: LaunchMode,
        private_port: u16,
    ) -> Result<Option<u16>, DockerError> {
        if !shared || launch_mode != LaunchMode::Development {
            return Ok(None);
        }
        Ok(self
            .find(engine, service_name, private_port)
            .await?
            .map(|(_, public)| public))
    }
}
