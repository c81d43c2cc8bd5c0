//! Build steps across simulated restarts, driven against the in-memory engine.

use dev_services::docker::labels::{DEV_SERVICE_FEATURE_LABEL, DEV_SERVICE_LABEL};
use dev_services::docker::{ContainerPort, ContainerSummary};
use dev_services::testing::StubEngine;
use dev_services::{
    run_build_steps, BuildContext, Config, DevServicesConfigSource, Parser, Registry,
    ServiceOutcome,
};
use std::collections::HashMap;
use std::sync::Arc;

fn config(yaml: &str) -> Config {
    Parser::new().parse_config(yaml).expect("valid config")
}

fn redis(image: &str) -> Config {
    config(&format!(
        r#"
application: shop
timeout: 5s
services:
  redis:
    image: {}
    container_port: 6379
"#,
        image
    ))
}

struct Harness {
    _root: tempfile::TempDir,
    registry: Arc<Registry>,
    engine: Arc<StubEngine>,
}

impl Harness {
    fn new() -> Self {
        Self {
            _root: tempfile::tempdir().expect("Failed to create temp dir"),
            registry: Arc::new(Registry::new()),
            engine: Arc::new(StubEngine::new()),
        }
    }

    fn ctx(&self, config: &Config) -> BuildContext {
        BuildContext::new(
            config,
            self._root.path(),
            Arc::clone(&self.registry),
            self.engine.clone(),
        )
    }

    /// One restart of the application.
    async fn build(&self, config: &Config) -> dev_services::BuildReport {
        run_build_steps(&self.ctx(config), config).await
    }
}

#[tokio::test]
async fn first_build_starts_and_publishes_connection_config() {
    let h = Harness::new();
    let report = h.build(&redis("redis:7")).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert!(matches!(report.services["redis"], ServiceOutcome::Started { .. }));
    assert_eq!(h.engine.started(), 1);

    let config = report.config();
    let url = &config["redis.url"];
    assert!(url.starts_with("redis://localhost:"), "{}", url);
    assert_eq!(config["redis.host"], "localhost");
    assert!(config.contains_key("redis.container-id"));

    let source = DevServicesConfigSource::new(Arc::clone(&h.registry));
    assert_eq!(source.get_value("redis.url").as_deref(), Some(url.as_str()));
}

#[tokio::test]
async fn unchanged_config_reuses_the_container() {
    let h = Harness::new();
    let cfg = redis("redis:7");
    let first = h.build(&cfg).await;
    let second = h.build(&cfg).await;

    assert!(matches!(second.services["redis"], ServiceOutcome::Reused(_)));
    assert_eq!(h.engine.started(), 1);
    assert_eq!(h.engine.stopped(), 0);
    assert_eq!(h.registry.snapshot().len(), 1);
    assert_eq!(first.config()["redis.url"], second.config()["redis.url"]);
}

#[tokio::test]
async fn changed_config_replaces_the_container() {
    let h = Harness::new();
    h.build(&redis("redis:7")).await;
    let report = h.build(&redis("redis:7.2")).await;

    match &report.services["redis"] {
        ServiceOutcome::Started { evicted, .. } => assert_eq!(*evicted, 1),
        other => panic!("expected a new start, got {:?}", other),
    }
    assert_eq!(h.engine.started(), 2);
    assert_eq!(h.engine.stopped(), 1);

    let snapshot = h.registry.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.entries[0].config["image"], "redis:7.2");
}

#[tokio::test]
async fn test_and_development_runs_keep_separate_services() {
    let h = Harness::new();
    let dev = redis("redis:7");
    let mut test = redis("redis:7");
    test.launch_mode = dev_services::LaunchMode::Test;

    h.build(&dev).await;
    h.build(&test).await;

    assert_eq!(h.engine.started(), 2);
    assert_eq!(h.engine.stopped(), 0);
    assert_eq!(h.registry.snapshot().len(), 2);
}

#[tokio::test]
async fn shared_container_is_discovered_and_never_stopped() {
    let h = Harness::new();
    h.engine.add_external(ContainerSummary {
        id: "other-app-redis".to_string(),
        image: "redis:7".to_string(),
        labels: HashMap::from([(DEV_SERVICE_LABEL.to_string(), "redis".to_string())]),
        ports: vec![ContainerPort {
            private: 6379,
            public: Some(40001),
        }],
        state: "running".to_string(),
        ..Default::default()
    });

    let report = h.build(&redis("redis:7")).await;
    assert!(matches!(report.services["redis"], ServiceOutcome::Discovered(_)));
    assert_eq!(report.config()["redis.url"], "redis://localhost:40001");
    assert_eq!(h.engine.started(), 0);

    h.registry.close_all().await.unwrap();
    assert_eq!(h.engine.stopped(), 0);
    assert!(h.engine.is_container_running("other-app-redis"));
}

#[tokio::test]
async fn unshared_services_start_their_own_container() {
    let h = Harness::new();
    h.engine.add_external(ContainerSummary {
        id: "other-app-redis".to_string(),
        image: "redis:7".to_string(),
        labels: HashMap::from([(DEV_SERVICE_LABEL.to_string(), "redis".to_string())]),
        ports: vec![ContainerPort {
            private: 6379,
            public: Some(40001),
        }],
        ..Default::default()
    });
    let cfg = config(
        r#"
services:
  redis:
    image: redis:7
    container_port: 6379
    shared: false
"#,
    );

    let report = h.build(&cfg).await;
    let Some(service) = report.services["redis"].service() else {
        panic!("redis was skipped");
    };
    assert!(matches!(report.services["redis"], ServiceOutcome::Started { .. }));

    let id = service.container_id().expect("started container has an id");
    let labels = h.engine.labels_of(&id).expect("container exists");
    assert_eq!(labels[DEV_SERVICE_FEATURE_LABEL], "redis");
    assert!(!labels.contains_key(DEV_SERVICE_LABEL));
}

#[tokio::test]
async fn unavailable_engine_and_explicit_connection_skip() {
    let h = Harness::new();
    let cfg = config(
        r#"
services:
  redis:
    image: redis:7
    container_port: 6379
  postgres:
    image: postgres:16
    container_port: 5432
    connection: postgres://db.internal:5432/shop
"#,
    );

    let report = h.build(&cfg).await;
    assert!(matches!(report.services["postgres"], ServiceOutcome::Skipped { .. }));
    assert!(matches!(report.services["redis"], ServiceOutcome::Started { .. }));

    h.engine.set_available(false);
    let mut changed = cfg.clone();
    if let Some(redis) = changed.services.get_mut("redis") {
        redis.image = "redis:7.2".to_string();
    }
    let report = h.build(&changed).await;
    assert!(matches!(report.services["redis"], ServiceOutcome::Skipped { .. }));
    assert_eq!(h.engine.started(), 1);
}

#[tokio::test]
async fn one_failing_service_does_not_stop_the_others() {
    let h = Harness::new();
    let cfg = config(
        r#"
services:
  broken:
    image: broken:1
    container_port: 1234
"#,
    );
    h.engine.fail_starts(true);
    let report = h.build(&cfg).await;
    assert!(!report.is_success());
    assert_eq!(report.failures[0].0, "broken");
    assert!(h.registry.is_empty());

    h.engine.fail_starts(false);
    let report = h.build(&redis("redis:7")).await;
    assert!(report.is_success());
}

#[tokio::test]
async fn exited_container_reports_its_output() {
    let h = Harness::new();
    h.engine.exit_on_start("FATAL: bad configuration");

    let report = h.build(&redis("redis:7")).await;
    let (name, error) = &report.failures[0];
    assert_eq!(name, "redis");
    let hint = error.suggestion().unwrap_or_default();
    assert!(hint.contains("FATAL: bad configuration"), "{}", hint);
    assert_eq!(h.engine.stopped(), 1);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn disabled_config_does_nothing() {
    let h = Harness::new();
    let mut cfg = redis("redis:7");
    cfg.enabled = false;
    let report = h.build(&cfg).await;
    assert!(report.services.is_empty());
    assert!(report.compose.is_none());
    assert_eq!(h.engine.started(), 0);
}

#[tokio::test]
async fn close_all_releases_every_owned_container() {
    let h = Harness::new();
    let cfg = config(
        r#"
services:
  redis:
    image: redis:7
    container_port: 6379
  kafka:
    image: apache/kafka:3.7.0
    container_port: 9092
    url_scheme: PLAINTEXT
    config_key: kafka.bootstrap.servers
"#,
    );
    let report = h.build(&cfg).await;
    assert!(report.is_success(), "{:?}", report.failures);
    assert!(report.config()["kafka.bootstrap.servers"].starts_with("PLAINTEXT://"));

    h.registry.close_all().await.unwrap();
    assert_eq!(h.engine.stopped(), 2);
    assert!(h.registry.is_empty());
    assert!(DevServicesConfigSource::new(Arc::clone(&h.registry))
        .property_names()
        .is_empty());
}
