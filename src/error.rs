// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings on the named fields.
#![allow(unused_assignments)]

use crate::docker::DockerError;
use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(devsvc::config::validation),
        help("Run `devsvc validate` for detailed validation errors")
    )]
    Validation(String),

    #[error("Service '{service}' in compose file '{file}' sets 'container_name'")]
    #[diagnostic(
        code(devsvc::compose::container_name),
        help("Remove 'container_name' so each dev service project gets its own container names")
    )]
    ContainerNameOverride { service: String, file: String },

    #[error("Unable to parse compose file '{file}': {reason}")]
    #[diagnostic(
        code(devsvc::compose::parse),
        help("Check the file with `docker compose -f {file} config`")
    )]
    ComposeFile { file: String, reason: String },

    #[error("Docker error: {0}")]
    #[diagnostic(
        code(devsvc::docker::error),
        help("Check that Docker is running with `docker ps`")
    )]
    Docker(#[from] DockerError),

    #[error("Container engine is not available")]
    #[diagnostic(
        code(devsvc::docker::unavailable),
        help("Start Docker, or configure the service connection explicitly")
    )]
    EngineUnavailable,

    #[error("Docker Compose error: {0}")]
    #[diagnostic(
        code(devsvc::docker::compose),
        help("Verify Docker is running with `docker ps` and check the compose file syntax")
    )]
    DockerCompose(String),

    #[error(
        "Timed out waiting for container port to open for '{service}' ({host} ports: [{}] should be listening)",
        .ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
    )]
    #[diagnostic(
        code(devsvc::readiness::timeout),
        help("The service may be slow to start. Raise the wait timeout or check the container logs")
    )]
    ReadinessTimeout {
        service: String,
        host: String,
        ports: Vec<u16>,
        timeout: Duration,
    },

    #[error("Timed out after {timeout:?} waiting for '{service}' to {condition}")]
    #[diagnostic(code(devsvc::readiness::timeout))]
    WaitTimeout {
        service: String,
        condition: String,
        timeout: Duration,
    },

    #[error("Container for '{service}' is no longer running")]
    #[diagnostic(
        code(devsvc::readiness::exited),
        help("Check the container logs with `docker logs`")
    )]
    ContainerExited { service: String },

    #[error("Operation cancelled for service '{0}'")]
    Cancelled(String),

    #[error("Service '{service}' failed to start: {reason}")]
    #[diagnostic(code(devsvc::service::start_failed))]
    StartFailed {
        service: String,
        reason: String,
        startup_log: Option<String>,
    },

    #[error("Service '{0}' has been closed and cannot be started again")]
    #[diagnostic(
        code(devsvc::service::closed),
        help("Create a new service instance for the next restart")
    )]
    ServiceClosed(String),

    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<Error>),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::ContainerNameOverride { service, .. } => Some(format!(
                "Delete the 'container_name' key from service '{}'. Compose dev services are project scoped.",
                service
            )),
            Error::Config(msg) if msg.contains("Could not find") => None,
            Error::Config(_) | Error::Validation(_) | Error::ComposeFile { .. } => {
                Some("Validate your config with: devsvc validate".to_string())
            }
            Error::Docker(_) | Error::DockerCompose(_) | Error::EngineUnavailable => {
                Some("Check that Docker is running: docker ps".to_string())
            }
            Error::ReadinessTimeout { timeout, .. } | Error::WaitTimeout { timeout, .. } => {
                Some(format!(
                    "The container did not become ready within {:?}. Raise `timeout` in devservices.yaml or the `wait_for.ports.timeout` label.",
                    timeout
                ))
            }
            Error::StartFailed {
                startup_log: Some(log),
                ..
            } if !log.is_empty() => Some(format!("Last container output:\n{}", log)),
            Error::ContainerExited { service } => Some(format!(
                "Inspect the exited container: docker ps -a --filter label=devservices.service={}",
                service
            )),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }

    /// Collapse a list of errors into a single result.
    pub fn from_many(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}
