use super::coordinator::{wait_all, ComposePlan};
use super::wait::{ContainerTarget, ReadinessTarget, ReadinessWaiter, WaitStrategy};
use crate::config::{ComposeConfig, RemoveImages};
use crate::docker::labels::{COMPOSE_PROJECT_LABEL, COMPOSE_SERVICE_LABEL};
use crate::docker::ContainerEngine;
use crate::error::{Error, Result};
use crate::service::{Release, Startable};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// `compose up` pulls images, so it gets a long leash.
const UP_TIMEOUT: Duration = Duration::from_secs(600);
const DOWN_TIMEOUT: Duration = Duration::from_secs(120);

/// Docker Compose command type (v1 or v2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeCommand {
    V2, // docker compose
    V1, // docker-compose
}

static COMPOSE_COMMAND: OnceCell<ComposeCommand> = OnceCell::const_new();

impl ComposeCommand {
    async fn succeeds(program: &str, args: &[&str]) -> bool {
        tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .is_ok_and(|o| o.status.success())
    }

    async fn detect() -> Result<ComposeCommand> {
        if Self::succeeds("docker", &["compose", "version"]).await {
            return Ok(ComposeCommand::V2);
        }
        if Self::succeeds("docker-compose", &["--version"]).await {
            return Ok(ComposeCommand::V1);
        }
        Err(Error::DockerCompose(
            "Neither 'docker compose' (v2) nor 'docker-compose' (v1) found".to_string(),
        ))
    }

    /// The installed compose flavour, detected once per process.
    pub async fn get() -> Result<ComposeCommand> {
        COMPOSE_COMMAND
            .get_or_try_init(Self::detect)
            .await
            .copied()
    }

    fn program_and_prefix(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            ComposeCommand::V2 => ("docker", &["compose"]),
            ComposeCommand::V1 => ("docker-compose", &[]),
        }
    }
}

/// FNV-1a 32-bit hash, stable across Rust versions and platforms.
pub(crate) fn fnv1a_32(data: &[u8]) -> u32 {
    const FNV_OFFSET: u32 = 2_166_136_261;
    const FNV_PRIME: u32 = 16_777_619;
    data.iter().fold(FNV_OFFSET, |hash, &byte| {
        (hash ^ byte as u32).wrapping_mul(FNV_PRIME)
    })
}

/// Command line as shown in logs and errors.
fn render_command_line(program: &str, prefix: &[&str], args: &[String]) -> String {
    std::iter::once(program)
        .chain(prefix.iter().copied())
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compose project name for `application` rooted at `root`:
/// `devservices-<app>-<hash of root>`.
///
/// Compose only accepts lowercase letters, digits, `-` and `_`.
pub fn project_name_for(application: &str, root: &Path) -> String {
    let app: String = application
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let canonical = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let hash = fnv1a_32(canonical.as_os_str().as_encoded_bytes());
    format!("devservices-{}-{:08x}", app.trim_matches('-'), hash)
}

/// A compose project brought up as one dev service.
///
/// `start` runs `up -d` for the planned services and waits for each of them;
/// `release` runs `down` for the whole project.
pub struct ComposeProject {
    engine: Arc<dyn ContainerEngine>,
    name: String,
    files: Vec<PathBuf>,
    work_dir: PathBuf,
    profiles: Vec<String>,
    options: Vec<String>,
    env: BTreeMap<String, String>,
    remove_volumes: bool,
    remove_images: RemoveImages,
    stop_timeout: Duration,
    plan: ComposePlan,
    waiter: ReadinessWaiter,
    cancel: CancellationToken,
    containers: Mutex<BTreeMap<String, String>>,
}

impl ComposeProject {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        name: impl Into<String>,
        files: Vec<PathBuf>,
        work_dir: impl Into<PathBuf>,
        config: &ComposeConfig,
        plan: ComposePlan,
    ) -> Self {
        Self {
            engine,
            name: name.into(),
            files,
            work_dir: work_dir.into(),
            profiles: config.profiles.clone(),
            options: config.options.clone(),
            env: config.env.clone(),
            remove_volumes: config.remove_volumes,
            remove_images: config.remove_images,
            stop_timeout: config.stop_timeout(),
            plan,
            waiter: ReadinessWaiter::default(),
            cancel: CancellationToken::new(),
            containers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_readiness(mut self, waiter: ReadinessWaiter, cancel: CancellationToken) -> Self {
        self.waiter = waiter;
        self.cancel = cancel;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plan(&self) -> &ComposePlan {
        &self.plan
    }

    /// Service name to container id, known after a successful start.
    pub fn containers(&self) -> BTreeMap<String, String> {
        self.containers.lock().clone()
    }

    /// `-f` per file, `-p`, `--profile` per profile, then `args`.
    pub fn command_args(&self, args: &[String]) -> Vec<String> {
        let mut all = Vec::new();
        for file in &self.files {
            all.push("-f".to_string());
            all.push(file.display().to_string());
        }
        all.push("-p".to_string());
        all.push(self.name.clone());
        for profile in &self.profiles {
            all.push("--profile".to_string());
            all.push(profile.clone());
        }
        all.extend(args.iter().cloned());
        all
    }

    pub fn up_args(&self) -> Vec<String> {
        let mut args = vec!["up".to_string(), "-d".to_string()];
        args.extend(self.options.iter().cloned());
        args.extend(self.plan.service_names());
        args
    }

    pub fn down_args(&self) -> Vec<String> {
        let mut args = vec![
            "down".to_string(),
            "--remove-orphans".to_string(),
            "-t".to_string(),
            self.stop_timeout.as_secs().to_string(),
            "--rmi".to_string(),
            self.remove_images.as_str().to_string(),
        ];
        if self.remove_volumes {
            args.push("-v".to_string());
        }
        args
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<Output> {
        let command = ComposeCommand::get().await?;
        let (program, prefix) = command.program_and_prefix();
        let full_args = self.command_args(args);
        let command_line = render_command_line(program, prefix, &full_args);
        tracing::debug!("Running {}", command_line);

        let output = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(program)
                .args(prefix)
                .args(&full_args)
                .envs(&self.env)
                .current_dir(&self.work_dir)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::DockerCompose(format!("'{}' timed out after {:?}", command_line, timeout)))?
        .map_err(|e| Error::DockerCompose(format!("Failed to run '{}': {}", command_line, e)))?;

        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::DockerCompose(format!(
                "'{}' failed: {}",
                command_line,
                stderr.trim()
            )))
        }
    }

    async fn down(&self) -> Result<()> {
        tracing::info!("Stopping compose project '{}'", self.name);
        self.run(&self.down_args(), DOWN_TIMEOUT).await?;
        self.containers.lock().clear();
        Ok(())
    }

    async fn down_after_failure(&self) {
        if let Err(e) = self.down().await {
            tracing::warn!("Cleanup of compose project '{}' failed: {}", self.name, e);
        }
    }

    /// Container ids of the planned services, by service name.
    async fn resolve_containers(&self) -> Result<BTreeMap<String, String>> {
        let planned = self.plan.service_names();
        let mut found = BTreeMap::new();
        for container in self.engine.list_containers().await? {
            if container.label(COMPOSE_PROJECT_LABEL) != Some(self.name.as_str()) {
                continue;
            }
            if let Some(service) = container.label(COMPOSE_SERVICE_LABEL) {
                if planned.iter().any(|p| p == service) {
                    found.insert(service.to_string(), container.id.clone());
                }
            }
        }
        Ok(found)
    }

    async fn wait_until_ready(&self, containers: &BTreeMap<String, String>) -> Result<()> {
        let mut targets: Vec<(Arc<dyn ReadinessTarget>, Vec<WaitStrategy>)> = Vec::new();
        for service in &self.plan.services {
            let Some(id) = containers.get(&service.name) else {
                tracing::warn!(
                    "No running container for compose service '{}', not waiting for it",
                    service.name
                );
                continue;
            };
            let target: Arc<dyn ReadinessTarget> = Arc::new(ContainerTarget::new(
                Arc::clone(&self.engine),
                id.clone(),
                service.name.clone(),
            ));
            targets.push((target, service.strategies.clone()));
        }
        wait_all(&self.waiter, targets, &self.cancel).await
    }
}

#[async_trait]
impl Startable for ComposeProject {
    async fn start(&self) -> Result<Option<String>> {
        if self.plan.is_empty() {
            tracing::info!("Compose project '{}' has no services to start", self.name);
            return Ok(None);
        }
        tracing::info!(
            "Starting compose project '{}' ({})",
            self.name,
            self.plan.service_names().join(", ")
        );
        if let Err(e) = self.run(&self.up_args(), UP_TIMEOUT).await {
            self.down_after_failure().await;
            return Err(e);
        }

        let ready = async {
            let containers = self.resolve_containers().await?;
            self.wait_until_ready(&containers).await?;
            Ok::<_, Error>(containers)
        }
        .await;
        match ready {
            Ok(containers) => {
                *self.containers.lock() = containers;
                Ok(None)
            }
            Err(e) => {
                self.down_after_failure().await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Release for ComposeProject {
    async fn release(&self) -> Result<()> {
        self.down().await
    }
}
