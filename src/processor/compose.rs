use super::{BuildContext, ServiceOutcome};
use crate::compose::{
    discover_compose_files, plan, project_name_for, ComposeFiles, ComposeProject, ReadinessWaiter,
};
use crate::config::ComposeConfig;
use crate::error::Result;
use crate::service::{DevService, StartableService};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry feature of the compose project service.
pub const COMPOSE_FEATURE: &str = "compose";

/// Build step for the compose project.
///
/// Returns `None` when compose is disabled or no compose file exists,
/// otherwise the project name and what happened to the project.
pub async fn start_compose(
    ctx: &BuildContext,
    config: &ComposeConfig,
) -> Result<Option<(String, ServiceOutcome)>> {
    if !config.enabled {
        tracing::debug!("Compose dev services are disabled");
        return Ok(None);
    }
    let files = if config.files.is_empty() {
        discover_compose_files(&ctx.project_root)?
    } else {
        config.resolved_files(&ctx.project_root)
    };
    if files.is_empty() {
        tracing::debug!("No compose files in {}", ctx.project_root.display());
        return Ok(None);
    }

    let project_name = config
        .project_name
        .clone()
        .unwrap_or_else(|| project_name_for(&ctx.application, &ctx.project_root));

    if !ctx.engine.is_available().await {
        tracing::warn!(
            "Docker isn't working, compose project '{}' will not be started",
            project_name
        );
        return Ok(Some((
            project_name,
            ServiceOutcome::skipped("container engine unavailable"),
        )));
    }

    let model = ComposeFiles::parse(&files)?;
    for note in model.notes() {
        tracing::info!("{}", note);
    }
    let plan = plan(&model, &config.profiles);
    tracing::debug!(
        "Compose project '{}' runs [{}], ignores [{}]",
        project_name,
        plan.service_names().join(", "),
        plan.ignored.join(", ")
    );

    let mut identifying = config.identifying_config(&files);
    identifying.insert("project".to_string(), project_name.clone());
    let key = ctx.key(COMPOSE_FEATURE, identifying);

    let project = ComposeProject::new(
        Arc::clone(&ctx.engine),
        project_name.clone(),
        files,
        ctx.project_root.clone(),
        config,
        plan,
    )
    .with_readiness(ReadinessWaiter::new(ctx.timeout), ctx.cancel.clone());

    let static_config = BTreeMap::from([(
        "compose.project".to_string(),
        project_name.clone(),
    )]);
    let service = Arc::new(
        StartableService::new(
            COMPOSE_FEATURE,
            key,
            Arc::new(project),
            static_config,
            Arc::clone(&ctx.registry),
        )
        .with_description(format!("compose project {}", project_name)),
    );
    let outcome = service.start().await?;
    let handle: Arc<dyn DevService> = service;
    Ok(Some((project_name, ServiceOutcome::from_start(outcome, handle))))
}
