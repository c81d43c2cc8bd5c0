//! Configuration file types.
//!
//! The root [`Config`] mirrors `devservices.yaml`. Every field has a default
//! so an empty file is a valid configuration.

use super::duration::serde_duration;
use crate::compose::wait::DEFAULT_STARTUP_TIMEOUT;
use crate::error::{Error, Result};
use crate::registry::LaunchMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Stop timeout handed to `compose down`.
pub const DEFAULT_COMPOSE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Root configuration structure for devservices.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch for every dev service.
    pub enabled: bool,

    /// Application name; defaults to the project directory name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,

    pub launch_mode: LaunchMode,

    /// Runs as a companion of another application.
    pub auxiliary: bool,

    /// Startup timeout for readiness waits.
    #[serde(with = "serde_duration", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    pub services: BTreeMap<String, ContainerServiceConfig>,

    pub compose: ComposeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            application: None,
            launch_mode: LaunchMode::default(),
            auxiliary: false,
            timeout: None,
            services: BTreeMap::new(),
            compose: ComposeConfig::default(),
        }
    }
}

impl Config {
    pub fn startup_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT)
    }

    /// The configured application name, else the last component of `root`.
    pub fn application_name(&self, root: &Path) -> String {
        self.application.clone().unwrap_or_else(|| {
            root.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "application".to_string())
        })
    }

    /// Check what serde cannot: required fields and value ranges.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (name, service) in &self.services {
            if !service.enabled {
                continue;
            }
            if service.image.trim().is_empty() {
                errors.push(Error::Validation(format!(
                    "Service '{}' has no image",
                    name
                )));
            }
            if service.container_port == 0 {
                errors.push(Error::Validation(format!(
                    "Service '{}' needs a container_port",
                    name
                )));
            }
            if service.port == Some(0) {
                errors.push(Error::Validation(format!(
                    "Service '{}' has port 0; leave it out to pick a free port",
                    name
                )));
            }
        }
        for option in &self.compose.options {
            if !option.starts_with('-') {
                errors.push(Error::Validation(format!(
                    "Compose option '{}' is not a flag",
                    option
                )));
            }
        }
        Error::from_many(errors)
    }
}

/// A dev service backed by a single container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerServiceConfig {
    pub enabled: bool,

    pub image: String,

    /// Port the service listens on inside the container.
    pub container_port: u16,

    /// Fixed host port; a free one is picked when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    pub env: BTreeMap<String, String>,

    pub labels: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Shared containers are found and reused by other applications.
    pub shared: bool,

    /// Value of the service label used to find shared containers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Property under which the connection URL is published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_scheme: Option<String>,

    /// Explicit connection string. When set no dev service is started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    /// Image fragment identifying this service inside a compose project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose_image: Option<String>,
}

impl Default for ContainerServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            image: String::new(),
            container_port: 0,
            port: None,
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            command: Vec::new(),
            shared: true,
            service_name: None,
            config_key: None,
            url_scheme: None,
            connection: None,
            compose_image: None,
        }
    }
}

impl ContainerServiceConfig {
    /// Shared-container label value; defaults to `name`.
    pub fn service_label(&self, name: &str) -> String {
        self.service_name.clone().unwrap_or_else(|| name.to_string())
    }

    pub fn config_key(&self, name: &str) -> String {
        self.config_key
            .clone()
            .unwrap_or_else(|| format!("{}.url", name))
    }

    pub fn url_scheme(&self, name: &str) -> String {
        self.url_scheme.clone().unwrap_or_else(|| name.to_string())
    }

    /// Image name without registry path or tag, e.g. `redis` for
    /// `docker.io/library/redis:7`.
    pub fn compose_image(&self) -> String {
        if let Some(partial) = &self.compose_image {
            return partial.clone();
        }
        let last = self.image.rsplit('/').next().unwrap_or(&self.image);
        let untagged = last.split(|c| c == '@' || c == ':').next().unwrap_or(last);
        untagged.to_string()
    }

    /// The settings that decide whether a running container can be reused.
    pub fn identifying_config(&self) -> BTreeMap<String, String> {
        let mut config = BTreeMap::new();
        config.insert("image".to_string(), self.image.clone());
        config.insert("container_port".to_string(), self.container_port.to_string());
        if let Some(port) = self.port {
            config.insert("port".to_string(), port.to_string());
        }
        for (k, v) in &self.env {
            config.insert(format!("env.{}", k), v.clone());
        }
        for (k, v) in &self.labels {
            config.insert(format!("label.{}", k), v.clone());
        }
        if !self.command.is_empty() {
            config.insert("command".to_string(), self.command.join(" "));
        }
        config.insert("shared".to_string(), self.shared.to_string());
        config
    }
}

/// What `compose down` removes besides containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoveImages {
    /// Images built for the project.
    #[default]
    Local,
    /// Every image the project used.
    All,
}

impl RemoveImages {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoveImages::Local => "local",
            RemoveImages::All => "all",
        }
    }
}

/// The compose project dev service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    pub enabled: bool,

    /// Compose files, relative to the project root. Discovered when empty.
    pub files: Vec<PathBuf>,

    pub profiles: Vec<String>,

    /// Extra flags for `compose up`.
    pub options: Vec<String>,

    /// Environment for every compose invocation.
    pub env: BTreeMap<String, String>,

    pub remove_volumes: bool,

    pub remove_images: RemoveImages,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    #[serde(with = "serde_duration", skip_serializing_if = "Option::is_none")]
    pub stop_timeout: Option<Duration>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            files: Vec::new(),
            profiles: Vec::new(),
            options: Vec::new(),
            env: BTreeMap::new(),
            remove_volumes: false,
            remove_images: RemoveImages::Local,
            project_name: None,
            stop_timeout: None,
        }
    }
}

impl ComposeConfig {
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout.unwrap_or(DEFAULT_COMPOSE_STOP_TIMEOUT)
    }

    /// Files resolved against `root`.
    pub fn resolved_files(&self, root: &Path) -> Vec<PathBuf> {
        self.files
            .iter()
            .map(|f| if f.is_absolute() { f.clone() } else { root.join(f) })
            .collect()
    }

    /// The settings that decide whether a running compose project can be
    /// reused. `files` are the resolved ones actually passed to compose.
    pub fn identifying_config(&self, files: &[PathBuf]) -> BTreeMap<String, String> {
        let join = |items: &[String]| items.join(",");
        let mut config = BTreeMap::new();
        config.insert(
            "files".to_string(),
            files
                .iter()
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()
                .join(","),
        );
        config.insert("profiles".to_string(), join(&self.profiles));
        config.insert("options".to_string(), join(&self.options));
        config.insert("remove_volumes".to_string(), self.remove_volumes.to_string());
        config.insert("remove_images".to_string(), self.remove_images.as_str().to_string());
        for (k, v) in &self.env {
            config.insert(format!("env.{}", k), v.clone());
        }
        if let Some(name) = &self.project_name {
            config.insert("project_name".to_string(), name.clone());
        }
        config
    }
}
