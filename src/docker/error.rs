use std::fmt;
use std::time::Duration;

/// Structured error type for container engine operations.
#[derive(Debug)]
pub enum DockerError {
    /// Engine command timed out.
    Timeout { command: String, timeout: Duration },

    /// Engine command ran but returned non-zero exit.
    CommandFailed {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// The `docker` binary couldn't be executed (not in PATH, permission denied).
    ExecFailed {
        command: String,
        source: std::io::Error,
    },

    /// Container doesn't exist (parsed from "No such container" stderr).
    ContainerNotFound { container: String },

    /// Engine output could not be understood.
    UnexpectedOutput { command: String, detail: String },

    /// Docker daemon not responding.
    DaemonUnavailable,
}

impl DockerError {
    pub fn timeout(cmd: impl Into<String>, dur: Duration) -> Self {
        DockerError::Timeout {
            command: cmd.into(),
            timeout: dur,
        }
    }

    /// Create a command-failed error from an `std::process::Output`.
    ///
    /// Recognises the engine's "No such container" and daemon connection
    /// messages and maps them to their dedicated variants.
    pub fn failed(cmd: impl Into<String>, output: &std::process::Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Self::classify(cmd.into(), stderr, output.status.code())
    }

    pub fn cmd_failed(
        cmd: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::classify(cmd.into(), stderr.into(), exit_code)
    }

    pub fn exec_failed(cmd: impl Into<String>, err: std::io::Error) -> Self {
        DockerError::ExecFailed {
            command: cmd.into(),
            source: err,
        }
    }

    pub fn unexpected(cmd: impl Into<String>, detail: impl Into<String>) -> Self {
        DockerError::UnexpectedOutput {
            command: cmd.into(),
            detail: detail.into(),
        }
    }

    fn classify(command: String, stderr: String, exit_code: Option<i32>) -> Self {
        if let Some(rest) = stderr.split("No such container:").nth(1) {
            return DockerError::ContainerNotFound {
                container: rest.trim().to_string(),
            };
        }
        if stderr.contains("Cannot connect to the Docker daemon") {
            return DockerError::DaemonUnavailable;
        }
        DockerError::CommandFailed {
            command,
            stderr,
            exit_code,
        }
    }

    /// True when the container the command targeted is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DockerError::ContainerNotFound { .. })
    }
}

impl fmt::Display for DockerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockerError::Timeout { command, timeout } => {
                write!(f, "Timed out running '{}' after {:?}", command, timeout)
            }
            DockerError::CommandFailed {
                command,
                stderr,
                exit_code: Some(code),
            } => write!(f, "'{}' failed (exit code {}): {}", command, code, stderr),
            DockerError::CommandFailed {
                command, stderr, ..
            } => write!(f, "'{}' failed: {}", command, stderr),
            DockerError::ExecFailed { command, source } => {
                write!(f, "Failed to execute '{}': {}", command, source)
            }
            DockerError::ContainerNotFound { container } => {
                write!(f, "No such container: {}", container)
            }
            DockerError::UnexpectedOutput { command, detail } => {
                write!(f, "Unexpected output from '{}': {}", command, detail)
            }
            DockerError::DaemonUnavailable => write!(f, "Docker daemon is not responding"),
        }
    }
}

impl std::error::Error for DockerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DockerError::ExecFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_container_is_classified() {
        let err = DockerError::cmd_failed(
            "docker rm -f abc",
            "Error response from daemon: No such container: abc",
            Some(1),
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "No such container: abc");
    }

    #[test]
    fn daemon_down_is_classified() {
        let err = DockerError::cmd_failed(
            "docker ps",
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?",
            Some(1),
        );
        assert!(matches!(err, DockerError::DaemonUnavailable));
    }

    #[test]
    fn other_failures_keep_stderr() {
        let err = DockerError::cmd_failed("docker run", "pull access denied", Some(125));
        assert_eq!(
            err.to_string(),
            "'docker run' failed (exit code 125): pull access denied"
        );
    }
}
