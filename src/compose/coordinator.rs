//! Deciding what a compose deployment waits for, and waiting for it.
//!
//! Services opt out or tune their waits through labels:
//!
//! | Label | Effect |
//! |---|---|
//! | `devservices.compose.ignore` | not started at all |
//! | `devservices.compose.wait_for.logs[.N]` | wait for the value to be logged N times |
//! | `devservices.compose.wait_for.ports.disable` | no port wait |
//! | `devservices.compose.wait_for.ports.timeout` | port wait timeout, e.g. `30S` |
//!
//! A service with a health check waits for it and nothing else.

use super::definition::ComposeServiceDefinition;
use super::files::ComposeFiles;
use super::wait::{ReadinessTarget, ReadinessWaiter, WaitStrategy};
use crate::config::parse_duration_string;
use crate::error::{Error, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const IGNORE_LABEL: &str = "devservices.compose.ignore";
pub const WAIT_FOR_LOGS_LABEL: &str = "devservices.compose.wait_for.logs";
pub const WAIT_FOR_PORTS_DISABLE_LABEL: &str = "devservices.compose.wait_for.ports.disable";
pub const WAIT_FOR_PORTS_TIMEOUT_LABEL: &str = "devservices.compose.wait_for.ports.timeout";

/// One service to start, and how to know it is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePlan {
    pub name: String,
    pub strategies: Vec<WaitStrategy>,
}

/// The outcome of applying labels and profiles to a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposePlan {
    pub services: Vec<ServicePlan>,
    /// Skipped because of the ignore label.
    pub ignored: Vec<String>,
    /// Skipped because none of their profiles is active.
    pub inactive: Vec<String>,
}

impl ComposePlan {
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    pub fn strategies(&self, service: &str) -> Option<&[WaitStrategy]> {
        self.services
            .iter()
            .find(|s| s.name == service)
            .map(|s| s.strategies.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn is_true(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

/// Decide which services run and what each waits for.
pub fn plan(files: &ComposeFiles, active_profiles: &[String]) -> ComposePlan {
    let mut plan = ComposePlan::default();
    for (name, def) in files.services() {
        if !def.profiles.is_empty() && !def.profiles.iter().any(|p| active_profiles.contains(p)) {
            tracing::debug!("Compose service '{}' has no active profile, skipped", name);
            plan.inactive.push(name.clone());
            continue;
        }
        if is_true(def.label(IGNORE_LABEL)) {
            tracing::warn!(
                "Compose service '{}' is ignored ({}=true) and will not be started",
                name,
                IGNORE_LABEL
            );
            plan.ignored.push(name.clone());
            continue;
        }
        plan.services.push(ServicePlan {
            name: name.clone(),
            strategies: strategies_for(def),
        });
    }
    plan
}

/// Wait strategies for one service, from its health check and labels.
pub fn strategies_for(def: &ComposeServiceDefinition) -> Vec<WaitStrategy> {
    if def.has_healthcheck {
        return vec![WaitStrategy::HealthCheck];
    }

    let mut strategies = Vec::new();
    for (key, message) in def.labels_with_prefix(WAIT_FOR_LOGS_LABEL) {
        let times = match &key[WAIT_FOR_LOGS_LABEL.len()..] {
            "" => 1,
            suffix => match suffix.strip_prefix('.').and_then(|n| n.parse::<usize>().ok()) {
                Some(n) => n,
                None => {
                    tracing::warn!(
                        "Cannot parse log count in label '{}' of '{}', waiting for one occurrence",
                        key,
                        def.name
                    );
                    1
                }
            },
        };
        strategies.push(WaitStrategy::log_message(message, times));
    }

    if !is_true(def.label(WAIT_FOR_PORTS_DISABLE_LABEL)) {
        let timeout = def.label(WAIT_FOR_PORTS_TIMEOUT_LABEL).and_then(|raw| {
            let parsed = parse_duration_string(raw);
            if parsed.is_none() {
                tracing::warn!(
                    "Invalid duration '{}' in label '{}' of '{}', using the default timeout",
                    raw,
                    WAIT_FOR_PORTS_TIMEOUT_LABEL,
                    def.name
                );
            }
            parsed
        });
        strategies.push(WaitStrategy::Ports {
            ports: def.ports.clone(),
            timeout,
        });
    }
    strategies
}

/// Wait for every target concurrently; each target runs its strategies in
/// order. All failures are reported together.
pub async fn wait_all(
    waiter: &ReadinessWaiter,
    targets: Vec<(Arc<dyn ReadinessTarget>, Vec<WaitStrategy>)>,
    cancel: &CancellationToken,
) -> Result<()> {
    let waits = targets.into_iter().map(|(target, strategies)| async move {
        for strategy in &strategies {
            waiter.wait(Arc::clone(&target), strategy, cancel).await?;
        }
        tracing::debug!("Compose service '{}' is ready", target.service_name());
        Ok::<(), Error>(())
    });
    let errors: Vec<Error> = join_all(waits)
        .await
        .into_iter()
        .filter_map(|r| r.err())
        .collect();
    Error::from_many(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::file::ParsedComposeFile;
    use crate::compose::wait::ContainerTarget;
    use crate::docker::{ContainerEngine, ContainerSpec};
    use crate::testing::StubEngine;
    use std::path::Path;
    use std::time::Duration;

    fn files(yaml: &str) -> ComposeFiles {
        ComposeFiles::merge([ParsedComposeFile::from_str(yaml, Path::new("/p/compose.yml")).unwrap()])
    }

    #[test]
    fn healthcheck_replaces_other_waits() {
        let plan = plan(
            &files(
                "services:\n  db:\n    image: postgres\n    ports: ['5432']\n    healthcheck:\n      test: [CMD, pg_isready]\n    labels:\n      devservices.compose.wait_for.logs: ready\n",
            ),
            &[],
        );
        assert_eq!(plan.strategies("db"), Some(&[WaitStrategy::HealthCheck][..]));
    }

    #[test]
    fn labels_shape_the_waits() {
        let plan = plan(
            &files(
                r#"services:
  kafka:
    image: kafka
    ports: ["9092"]
    labels:
      devservices.compose.wait_for.logs: started
      devservices.compose.wait_for.logs.2: joined
      devservices.compose.wait_for.logs.x: odd
      devservices.compose.wait_for.ports.timeout: 30S
  worker:
    image: worker
    ports: ["8080"]
    labels:
      devservices.compose.wait_for.ports.disable: "true"
"#,
            ),
            &[],
        );
        let kafka = plan.strategies("kafka").unwrap();
        assert!(kafka.contains(&WaitStrategy::log_message("started", 1)));
        assert!(kafka.contains(&WaitStrategy::log_message("joined", 2)));
        assert!(kafka.contains(&WaitStrategy::log_message("odd", 1)));
        assert!(kafka.contains(&WaitStrategy::Ports {
            ports: vec![9092],
            timeout: Some(Duration::from_secs(30)),
        }));
        assert!(plan.strategies("worker").unwrap().is_empty());
    }

    #[test]
    fn ignore_label_and_profiles_filter_services() {
        let compose = files(
            "services:\n  db:\n    image: postgres\n  tool:\n    image: tool\n    labels: [devservices.compose.ignore=true]\n  debug:\n    image: debug\n    profiles: [debug]\n",
        );
        let plain = plan(&compose, &[]);
        assert_eq!(plain.service_names(), vec!["db"]);
        assert_eq!(plain.ignored, vec!["tool"]);
        assert_eq!(plain.inactive, vec!["debug"]);

        let with_debug = plan(&compose, &["debug".to_string()]);
        assert_eq!(with_debug.service_names(), vec!["db", "debug"]);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_run_concurrently_and_report_every_failure() {
        let engine = Arc::new(StubEngine::new());
        let dyn_engine: Arc<dyn ContainerEngine> = engine.clone();
        let mut targets: Vec<(Arc<dyn ReadinessTarget>, Vec<WaitStrategy>)> = Vec::new();
        for name in ["a", "b", "c"] {
            let id = engine
                .start(&ContainerSpec::new(name).with_port(80, None))
                .await
                .unwrap()
                .id;
            let target: Arc<dyn ReadinessTarget> =
                Arc::new(ContainerTarget::new(Arc::clone(&dyn_engine), id, name));
            targets.push((target, vec![WaitStrategy::ports(vec![80])]));
        }
        engine.accept_connections(false);
        let opener = Arc::clone(&engine);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            opener.accept_connections(true);
        });

        let begin = tokio::time::Instant::now();
        wait_all(&ReadinessWaiter::new(Duration::from_secs(5)), targets, &CancellationToken::new())
            .await
            .unwrap();
        assert!(begin.elapsed() < Duration::from_millis(700));

        engine.accept_connections(false);
        let failing: Vec<(Arc<dyn ReadinessTarget>, Vec<WaitStrategy>)> = engine
            .container_ids()
            .into_iter()
            .map(|id| {
                let target: Arc<dyn ReadinessTarget> =
                    Arc::new(ContainerTarget::new(Arc::clone(&dyn_engine), id, "x"));
                (target, vec![WaitStrategy::ports(vec![80])])
            })
            .collect();
        let err = wait_all(&ReadinessWaiter::new(Duration::from_secs(1)), failing, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Multiple(ref errors) if errors.len() == 3));
    }
}
