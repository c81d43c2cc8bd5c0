use crate::output::UserOutput;
use dev_services::docker::labels::{
    COMPOSE_PROJECT_LABEL, COMPOSE_SERVICE_LABEL, DEV_SERVICE_FEATURE_LABEL, DEV_SERVICE_LABEL,
};
use dev_services::docker::ContainerSummary;
use dev_services::{ContainerEngine, DockerClient, Error};

/// Compose projects started by dev services carry this prefix.
const PROJECT_PREFIX: &str = "devservices-";

fn is_dev_service(container: &ContainerSummary) -> bool {
    container.label(DEV_SERVICE_LABEL).is_some()
        || container.label(DEV_SERVICE_FEATURE_LABEL).is_some()
        || container
            .label(COMPOSE_PROJECT_LABEL)
            .is_some_and(|p| p.starts_with(PROJECT_PREFIX))
}

fn display_name(container: &ContainerSummary) -> String {
    if let Some(service) = container.label(DEV_SERVICE_LABEL) {
        return service.to_string();
    }
    if let (Some(project), Some(service)) = (
        container.label(COMPOSE_PROJECT_LABEL),
        container.label(COMPOSE_SERVICE_LABEL),
    ) {
        return format!("{}/{}", project, service);
    }
    container
        .label(DEV_SERVICE_FEATURE_LABEL)
        .map(str::to_string)
        .or_else(|| container.names.first().cloned())
        .unwrap_or_else(|| container.id.clone())
}

pub async fn run_ps(json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let client = DockerClient::new();
    if !client.is_available().await {
        return Err(Error::EngineUnavailable.into());
    }

    let containers: Vec<ContainerSummary> = client
        .list_containers()
        .await
        .map_err(Error::from)?
        .into_iter()
        .filter(is_dev_service)
        .collect();

    if json {
        out.status(&serde_json::to_string_pretty(&containers)?);
        return Ok(());
    }

    if containers.is_empty() {
        out.status("No dev-service containers running");
        return Ok(());
    }

    out.status(&format!("{:<14} {:<36} {:<30} PORTS", "CONTAINER", "SERVICE", "IMAGE"));
    for container in &containers {
        let ports: Vec<String> = container
            .ports
            .iter()
            .map(|p| match p.public {
                Some(public) => format!("{}->{}", public, p.private),
                None => p.private.to_string(),
            })
            .collect();
        let short_id: String = container.id.chars().take(12).collect();
        out.status(&format!(
            "{:<14} {:<36} {:<30} {}",
            short_id,
            display_name(container),
            container.image,
            ports.join(", ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn container(labels: &[(&str, &str)]) -> ContainerSummary {
        ContainerSummary {
            id: "0123456789abcdef".to_string(),
            image: "redis:7".to_string(),
            names: vec!["quirky_name".to_string()],
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        }
    }

    #[test]
    fn recognises_dev_service_containers() {
        assert!(is_dev_service(&container(&[(DEV_SERVICE_LABEL, "redis")])));
        assert!(is_dev_service(&container(&[(
            COMPOSE_PROJECT_LABEL,
            "devservices-shop-0000abcd"
        )])));
        assert!(!is_dev_service(&container(&[(COMPOSE_PROJECT_LABEL, "other")])));
        assert!(!is_dev_service(&container(&[])));
    }

    #[test]
    fn names_prefer_the_shared_label() {
        assert_eq!(
            display_name(&container(&[
                (DEV_SERVICE_LABEL, "redis"),
                (DEV_SERVICE_FEATURE_LABEL, "cache")
            ])),
            "redis"
        );
        assert_eq!(
            display_name(&container(&[
                (COMPOSE_PROJECT_LABEL, "devservices-shop-0000abcd"),
                (COMPOSE_SERVICE_LABEL, "db")
            ])),
            "devservices-shop-0000abcd/db"
        );
        assert_eq!(
            display_name(&container(&[(DEV_SERVICE_FEATURE_LABEL, "cache")])),
            "cache"
        );
    }
}
