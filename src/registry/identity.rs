use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How the application is being run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    Normal,
    #[default]
    Development,
    Test,
}

impl LaunchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchMode::Normal => "normal",
            LaunchMode::Development => "development",
            LaunchMode::Test => "test",
        }
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LaunchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "prod" => Ok(LaunchMode::Normal),
            "development" | "dev" => Ok(LaunchMode::Development),
            "test" => Ok(LaunchMode::Test),
            other => Err(format!(
                "unknown launch mode '{}' (expected normal, development or test)",
                other
            )),
        }
    }
}

/// Which application shape a service belongs to.
///
/// Services started for a test run never satisfy a development run (and the
/// reverse), and an auxiliary companion application keeps its own services.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppIdentity {
    /// Feature that owns the services, e.g. `redis` or `compose`.
    pub feature: String,
    pub launch_mode: LaunchMode,
    #[serde(default)]
    pub auxiliary: bool,
}

impl AppIdentity {
    pub fn new(feature: impl Into<String>, launch_mode: LaunchMode) -> Self {
        Self {
            feature: feature.into(),
            launch_mode,
            auxiliary: false,
        }
    }

    pub fn auxiliary(mut self, auxiliary: bool) -> Self {
        self.auxiliary = auxiliary;
        self
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.feature, self.launch_mode)?;
        if self.auxiliary {
            f.write_str("/auxiliary")?;
        }
        Ok(())
    }
}

/// Registry key: an identity plus the settings that decide reuse.
///
/// Only settings that make an existing container unsuitable belong in
/// `config` (image, fixed port, container env). Values produced at runtime,
/// such as a randomly mapped port, never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub identity: AppIdentity,
    pub config: BTreeMap<String, String>,
}

impl ServiceConfig {
    pub fn new(identity: AppIdentity, config: BTreeMap<String, String>) -> Self {
        Self { identity, config }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}
