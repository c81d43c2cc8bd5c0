use dev_services::compose::coordinator::{IGNORE_LABEL, WAIT_FOR_PORTS_TIMEOUT_LABEL};
use dev_services::compose::{discover_compose_files, plan, ComposeFiles, WaitStrategy};
use dev_services::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("Failed to write compose file");
    path
}

#[test]
fn later_file_replaces_a_service_entirely() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let a = write(
        dir.path(),
        "compose.yml",
        r#"
services:
  db:
    image: postgres:15
    ports: ["5432"]
    labels:
      team: data
  cache:
    image: redis:7
"#,
    );
    let b = write(
        dir.path(),
        "compose.override.yml",
        r#"
services:
  db:
    image: postgres:16
"#,
    );

    let model = ComposeFiles::parse(&[a, b]).unwrap();
    let db = model.service("db").unwrap();
    assert_eq!(db.images.iter().collect::<Vec<_>>(), vec!["postgres:16"]);
    // No field of the earlier definition survives.
    assert!(db.ports.is_empty());
    assert!(db.label("team").is_none());

    assert_eq!(
        model.service_names().into_iter().collect::<Vec<_>>(),
        vec!["cache", "db"]
    );
    assert!(model.dependency_images().contains("redis:7"));
}

#[test]
fn container_name_is_rejected_with_service_and_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file = write(
        dir.path(),
        "docker-compose.yml",
        r#"
services:
  db:
    image: postgres:16
    container_name: my-db
"#,
    );

    let err = ComposeFiles::parse(&[file.clone()]).unwrap_err();
    match &err {
        Error::ContainerNameOverride { service, file: f } => {
            assert_eq!(service, "db");
            assert_eq!(f, &file.display().to_string());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.suggestion().unwrap().contains("container_name"));
}

#[test]
fn malformed_yaml_names_the_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file = write(dir.path(), "compose.yaml", "services: [unclosed");

    let err = ComposeFiles::parse(&[file]).unwrap_err();
    assert!(matches!(err, Error::ComposeFile { .. }), "{:?}", err);
    assert!(err.to_string().contains("compose.yaml"));
}

#[test]
fn discovery_matches_compose_file_names_only() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    for name in [
        "docker-compose.yml",
        "compose-dev.yaml",
        "compose.yml",
        "docker-compose.override.yaml",
        "my-compose.yml",
        "compose.json",
        "notes.txt",
    ] {
        write(dir.path(), name, "services: {}\n");
    }
    fs::create_dir(dir.path().join("compose.d.yml")).unwrap();

    let found: Vec<String> = discover_compose_files(dir.path())
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        found,
        vec![
            "compose-dev.yaml",
            "compose.yml",
            "docker-compose.override.yaml",
            "docker-compose.yml",
        ]
    );
}

#[test]
fn build_context_resolves_dockerfile_images() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::create_dir(dir.path().join("app")).unwrap();
    fs::write(
        dir.path().join("app/Dockerfile"),
        "FROM maven:3.9 AS build\nRUN mvn package\nFROM eclipse-temurin:21\nCOPY --from=build /app.jar /\n",
    )
    .unwrap();
    let file = write(
        dir.path(),
        "compose.yml",
        r#"
services:
  app:
    build: ./app
"#,
    );

    let model = ComposeFiles::parse(&[file]).unwrap();
    let app = model.service("app").unwrap();
    assert!(app.images.contains("maven:3.9"));
    assert!(app.images.contains("eclipse-temurin:21"));
    assert!(!app.images.contains("build"));
}

#[test]
fn plan_applies_profiles_labels_and_health_checks() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file = write(
        dir.path(),
        "compose.yml",
        &format!(
            r#"
services:
  db:
    image: postgres:16
    ports: ["5432:5432"]
    healthcheck:
      test: ["CMD", "pg_isready"]
  search:
    image: opensearch:2
    ports: ["9200"]
    labels:
      {timeout}: 90s
  tools:
    image: busybox
    labels:
      {ignore}: "true"
  debug:
    image: adminer
    profiles: [debug]
"#,
            timeout = WAIT_FOR_PORTS_TIMEOUT_LABEL,
            ignore = IGNORE_LABEL
        ),
    );
    let model = ComposeFiles::parse(&[file]).unwrap();

    let p = plan(&model, &[]);
    assert_eq!(p.service_names(), vec!["db", "search"]);
    assert_eq!(p.ignored, vec!["tools"]);
    assert_eq!(p.inactive, vec!["debug"]);
    assert_eq!(p.strategies("db"), Some(&[WaitStrategy::HealthCheck][..]));
    assert_eq!(
        p.strategies("search"),
        Some(
            &[WaitStrategy::Ports {
                ports: vec![9200],
                timeout: Some(Duration::from_secs(90)),
            }][..]
        )
    );

    let with_debug = plan(&model, &["debug".to_string()]);
    assert!(with_debug.service_names().contains(&"debug".to_string()));
    assert!(with_debug.inactive.is_empty());
}
