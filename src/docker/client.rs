//! Docker CLI client.
//!
//! All engine interactions go through `DockerClient`, which provides
//! consistent timeout handling, error mapping to [`DockerError`], and a single
//! point where `Command::new("docker")` is constructed.

use super::engine::{
    ContainerEngine, ContainerHandle, ContainerPort, ContainerSpec, ContainerState,
    ContainerSummary, HealthStatus,
};
use super::DockerError;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::process::Output;
use std::sync::OnceLock;
use std::time::Duration;

const RUN_TIMEOUT: Duration = Duration::from_secs(300); // Includes image pull
const STOP_TIMEOUT: Duration = Duration::from_secs(30);
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_GRACE_SECS: u32 = 10;

/// Client for Docker CLI operations.
///
/// Zero-sized; construct freely and share through `Arc<dyn ContainerEngine>`.
#[derive(Debug, Clone, Default)]
pub struct DockerClient;

impl DockerClient {
    pub fn new() -> Self {
        DockerClient
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output, DockerError> {
        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("docker")
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let cmd_str = format!("docker {}", args.join(" "));

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(DockerError::exec_failed(cmd_str, e)),
            Err(_) => Err(DockerError::timeout(cmd_str, timeout)),
        }
    }

    async fn run_success(&self, args: &[&str], timeout: Duration) -> Result<Output, DockerError> {
        let output = self.run(args, timeout).await?;
        if output.status.success() {
            Ok(output)
        } else {
            let cmd_str = format!("docker {}", args.join(" "));
            Err(DockerError::failed(cmd_str, &output))
        }
    }

    // ========================================================================
    // Container lifecycle
    // ========================================================================

    /// Build the argument list for `docker run -d`.
    pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string()];
        if let Some(name) = &spec.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        for binding in &spec.ports {
            args.push("-p".to_string());
            match binding.host_port {
                Some(host) => args.push(format!("{}:{}", host, binding.container_port)),
                None => args.push(binding.container_port.to_string()),
            }
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }

    /// Force-remove a container and its anonymous volumes.
    /// Returns `Ok(())` if the container doesn't exist.
    pub async fn rm_force(&self, container: &str, timeout: Duration) -> Result<(), DockerError> {
        match self.run_success(&["rm", "-f", "-v", container], timeout).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stop a container with a grace period, then remove it.
    pub async fn stop_and_remove(
        &self,
        container: &str,
        grace_secs: u32,
        timeout: Duration,
    ) -> Result<(), DockerError> {
        let grace = grace_secs.to_string();
        if let Err(e) = self
            .run_success(&["stop", "-t", &grace, container], timeout)
            .await
        {
            if !e.is_not_found() {
                tracing::debug!("docker stop {} failed, forcing removal: {}", container, e);
            }
        }
        self.rm_force(container, timeout).await
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// List containers matching a filter with a custom format string.
    pub async fn ps_formatted(
        &self,
        filter: Option<&str>,
        format: &str,
        timeout: Duration,
    ) -> Result<Output, DockerError> {
        let mut args = vec!["ps", "--no-trunc"];
        if let Some(filter) = filter {
            args.extend_from_slice(&["--filter", filter]);
        }
        args.extend_from_slice(&["--format", format]);
        self.run_success(&args, timeout).await
    }

    /// Check if the Docker daemon is healthy.
    pub async fn daemon_healthy(&self, timeout: Duration) -> bool {
        match self
            .run(&["info", "--format", "{{.ServerVersion}}"], timeout)
            .await
        {
            Ok(o) => o.status.success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerClient {
    async fn is_available(&self) -> bool {
        super::is_daemon_healthy(self).await
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, DockerError> {
        let args = Self::run_args(spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_success(&arg_refs, RUN_TIMEOUT).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        // Pull progress may precede the id when the image is missing locally
        let id = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| DockerError::unexpected("docker run", "no container id printed"))?;
        tracing::debug!("Started container {} from {}", id, spec.image);
        Ok(ContainerHandle { id: id.to_string() })
    }

    async fn stop(&self, container: &str) -> Result<(), DockerError> {
        self.stop_and_remove(container, STOP_GRACE_SECS, STOP_TIMEOUT)
            .await
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, DockerError> {
        let output = self
            .ps_formatted(None, "{{json .}}", QUERY_TIMEOUT)
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut containers = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            match parse_ps_line(line) {
                Ok(summary) => containers.push(summary),
                Err(e) => tracing::debug!("Skipping unparsable docker ps row: {}", e),
            }
        }
        Ok(containers)
    }

    async fn inspect(&self, container: &str) -> Result<ContainerState, DockerError> {
        let output = self
            .run_success(
                &["inspect", "--format", "{{json .State}}", container],
                QUERY_TIMEOUT,
            )
            .await?;
        parse_state(&String::from_utf8_lossy(&output.stdout))
    }

    async fn mapped_ports(&self, container: &str) -> Result<HashMap<u16, u16>, DockerError> {
        let output = self
            .run_success(
                &[
                    "inspect",
                    "--format={{json .NetworkSettings.Ports}}",
                    container,
                ],
                QUERY_TIMEOUT,
            )
            .await?;
        Ok(parse_port_bindings(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    async fn logs(&self, container: &str, tail: Option<usize>) -> Result<String, DockerError> {
        let tail_str = tail.map_or_else(|| "all".to_string(), |n| n.to_string());
        let output = self
            .run_success(&["logs", "--tail", &tail_str, container], QUERY_TIMEOUT)
            .await?;
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }
}

// ============================================================================
// Output parsing
// ============================================================================

fn port_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:[^,\s]*:(\d+)->)?(\d+)/[a-z]+").expect("static regex is valid")
    })
}

/// Parse the `Ports` column of `docker ps`,
/// e.g. `0.0.0.0:32768->6379/tcp, :::32768->6379/tcp, 8080/tcp`.
pub(crate) fn parse_ps_ports(ports: &str) -> Vec<ContainerPort> {
    let mut parsed: Vec<ContainerPort> = Vec::new();
    for caps in port_regex().captures_iter(ports) {
        let Some(private) = caps.get(2).and_then(|m| m.as_str().parse().ok()) else {
            continue;
        };
        let public = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let port = ContainerPort { private, public };
        if !parsed.contains(&port) {
            parsed.push(port);
        }
    }
    parsed
}

/// Parse the `Labels` column of `docker ps` (`k=v,k2=v2`).
pub(crate) fn parse_ps_labels(labels: &str) -> HashMap<String, String> {
    labels
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

fn parse_ps_line(line: &str) -> Result<ContainerSummary, DockerError> {
    let row: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| DockerError::unexpected("docker ps", e.to_string()))?;
    let field = |name: &str| {
        row.get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let id = field("ID");
    if id.is_empty() {
        return Err(DockerError::unexpected("docker ps", "row without ID"));
    }
    Ok(ContainerSummary {
        id,
        image: field("Image"),
        names: field("Names")
            .split(',')
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect(),
        labels: parse_ps_labels(&field("Labels")),
        ports: parse_ps_ports(&field("Ports")),
        state: field("State"),
    })
}

fn parse_state(json: &str) -> Result<ContainerState, DockerError> {
    let state: serde_json::Value = serde_json::from_str(json.trim())
        .map_err(|e| DockerError::unexpected("docker inspect", e.to_string()))?;
    let running = state
        .get("Running")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let health = state
        .get("Health")
        .and_then(|h| h.get("Status"))
        .and_then(|s| s.as_str())
        .and_then(HealthStatus::parse);
    Ok(ContainerState { running, health })
}

/// Parse `{{json .NetworkSettings.Ports}}` into container port -> host port.
pub(crate) fn parse_port_bindings(json: &str) -> HashMap<u16, u16> {
    let Ok(ports_json) = serde_json::from_str::<serde_json::Value>(json.trim()) else {
        return HashMap::new();
    };

    let mut mappings = HashMap::new();
    if let Some(ports_obj) = ports_json.as_object() {
        for (container_port, bindings) in ports_obj {
            let Some(private) = container_port
                .split('/')
                .next()
                .and_then(|p| p.parse::<u16>().ok())
            else {
                continue;
            };
            let host_port = bindings
                .as_array()
                .and_then(|b| b.first())
                .and_then(|b| b.get("HostPort"))
                .and_then(|v| v.as_str())
                .and_then(|v| v.parse::<u16>().ok());
            if let Some(public) = host_port {
                mappings.insert(private, public);
            }
        }
    }
    mappings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::engine::PortBinding;

    #[test]
    fn run_args_include_labels_env_and_ports() {
        let spec = ContainerSpec::new("redis:7")
            .with_label("devservices.service", "cache")
            .with_env("FOO", "bar")
            .with_port(6379, Some(40000))
            .with_port(8080, None);
        let args = DockerClient::run_args(&spec);
        assert_eq!(&args[..2], &["run", "-d"]);
        assert!(args
            .windows(2)
            .any(|w| w[0] == "--label" && w[1] == "devservices.service=cache"));
        assert!(args.windows(2).any(|w| w[0] == "-e" && w[1] == "FOO=bar"));
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "40000:6379"));
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "8080"));
        assert_eq!(args.last().map(String::as_str), Some("redis:7"));
        assert_eq!(spec.ports[0], PortBinding { container_port: 6379, host_port: Some(40000) });
    }

    #[test]
    fn ps_ports_parsing() {
        let ports = parse_ps_ports("0.0.0.0:32768->6379/tcp, :::32768->6379/tcp, 8080/tcp");
        assert_eq!(
            ports,
            vec![
                ContainerPort { private: 6379, public: Some(32768) },
                ContainerPort { private: 8080, public: None },
            ]
        );
        assert!(parse_ps_ports("").is_empty());
    }

    #[test]
    fn ps_row_parsing() {
        let line = r#"{"ID":"abc123","Image":"redis:7","Labels":"devservices.service=cache,com.docker.compose.project=p1","Names":"brave_turing","Ports":"127.0.0.1:40000->6379/tcp","State":"running"}"#;
        let summary = parse_ps_line(line).unwrap();
        assert_eq!(summary.id, "abc123");
        assert_eq!(summary.label("devservices.service"), Some("cache"));
        assert_eq!(summary.label("com.docker.compose.project"), Some("p1"));
        assert_eq!(summary.public_port(6379), Some(40000));
        assert_eq!(summary.names, vec!["brave_turing".to_string()]);
    }

    #[test]
    fn state_parsing() {
        let state = parse_state(
            r#"{"Status":"running","Running":true,"Health":{"Status":"healthy","FailingStreak":0}}"#,
        )
        .unwrap();
        assert!(state.running);
        assert_eq!(state.health, Some(HealthStatus::Healthy));

        let state = parse_state(r#"{"Status":"exited","Running":false}"#).unwrap();
        assert!(!state.running);
        assert_eq!(state.health, None);
    }

    #[test]
    fn port_binding_parsing() {
        let json = r#"{"5432/tcp":[{"HostIp":"0.0.0.0","HostPort":"59890"}],"9000/tcp":null}"#;
        let ports = parse_port_bindings(json);
        assert_eq!(ports.get(&5432), Some(&59890));
        assert!(!ports.contains_key(&9000));
        assert!(parse_port_bindings("not json").is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn lists_containers_from_real_daemon() {
        let client = DockerClient::new();
        if !client.is_available().await {
            return;
        }
        client.list_containers().await.unwrap();
    }
}
