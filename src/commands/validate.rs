use crate::output::UserOutput;
use dev_services::compose::{discover_compose_files, plan, ComposeFiles, WaitStrategy};
use dev_services::Config;
use std::path::Path;

pub fn run_validate(
    config: &Config,
    config_path: &Path,
    work_dir: &Path,
    profiles: &[String],
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    out.status(&format!("Validating {}...", config_path.display()));
    config.validate()?;
    out.success("Configuration is valid");
    out.blank();

    out.status(&format!(
        "Application: {} ({})",
        config.application_name(work_dir),
        config.launch_mode
    ));
    out.status(&format!("Startup timeout: {:?}", config.startup_timeout()));
    if !config.enabled {
        out.warning("Dev services are disabled");
    }

    out.blank();
    out.status(&format!("Services: {}", config.services.len()));
    for (name, service) in &config.services {
        let mut flags = Vec::new();
        if !service.enabled {
            flags.push("disabled");
        }
        if service.shared {
            flags.push("shared");
        }
        if service.connection.is_some() {
            flags.push("connection configured");
        }
        out.status(&format!(
            "  - {} ({} :{}) {}",
            name,
            service.image,
            service.container_port,
            flags.join(", ")
        ));
    }

    let compose = &config.compose;
    if !compose.enabled {
        out.blank();
        out.status("Compose: disabled");
        return Ok(());
    }
    let files = if compose.files.is_empty() {
        discover_compose_files(work_dir)?
    } else {
        compose.resolved_files(work_dir)
    };
    if files.is_empty() {
        out.blank();
        out.status("Compose: no compose files found");
        return Ok(());
    }

    // Profiles from the command line replace the configured ones.
    let profiles = if profiles.is_empty() {
        compose.profiles.as_slice()
    } else {
        profiles
    };

    let model = ComposeFiles::parse(&files)?;
    out.blank();
    out.status("Compose files:");
    for file in model.files() {
        out.status(&format!("  - {}", file.display()));
    }
    for note in model.notes() {
        out.warning(&format!("  note: {}", note));
    }

    let plan = plan(&model, profiles);
    out.blank();
    out.status(&format!("Compose services: {}", plan.services.len()));
    for service in &plan.services {
        let images = model
            .service(&service.name)
            .map(|d| d.images.iter().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        out.status(&format!("  - {} [{}]", service.name, images));
        for strategy in &service.strategies {
            out.status(&format!("      waits for {}", describe_strategy(strategy)));
        }
    }
    if !plan.ignored.is_empty() {
        out.status(&format!("Ignored: {}", plan.ignored.join(", ")));
    }
    if !plan.inactive.is_empty() {
        out.status(&format!("Inactive profiles: {}", plan.inactive.join(", ")));
    }

    Ok(())
}

fn describe_strategy(strategy: &WaitStrategy) -> String {
    match strategy {
        WaitStrategy::HealthCheck => "health check".to_string(),
        WaitStrategy::LogMessage { message, times } => {
            format!("log '{}' {} time(s)", message, times)
        }
        WaitStrategy::Ports { ports, timeout } => {
            let ports: Vec<String> = ports.iter().map(u16::to_string).collect();
            match timeout {
                Some(t) => format!("ports [{}] within {:?}", ports.join(", "), t),
                None => format!("ports [{}]", ports.join(", ")),
            }
        }
    }
}
