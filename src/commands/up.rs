use crate::output::UserOutput;
use dev_services::{
    run_build_steps, BuildContext, BuildReport, Config, ContainerEngine, DockerClient,
    Parser as ConfigParser, Registry, ServiceOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct UpOptions {
    pub json: bool,
    pub once: bool,
    pub config_path: PathBuf,
}

enum Trigger {
    Reload,
    Shutdown,
}

pub async fn run_up(
    mut config: Config,
    work_dir: PathBuf,
    opts: UpOptions,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let registry = Registry::global();
    let engine: Arc<dyn ContainerEngine> = Arc::new(DockerClient::new());
    let shutdown = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel::<Trigger>(4);

    if !opts.once {
        spawn_signal_listener(tx.clone(), shutdown.clone());
        spawn_stdin_listener(tx);
    }

    let mut generation = 1;
    loop {
        let ctx = BuildContext::new(&config, &work_dir, Arc::clone(&registry), Arc::clone(&engine))
            .with_cancel(shutdown.child_token());
        let report = run_build_steps(&ctx, &config).await;
        print_report(generation, &report, &registry, opts.json, out)?;

        if opts.once {
            let failed = report.failures.len();
            close_all(&registry, out).await;
            if failed > 0 {
                anyhow::bail!("{} dev service(s) failed to start", failed);
            }
            return Ok(());
        }

        out.status("Press Enter or send SIGHUP to reload, Ctrl+C to stop");
        match rx.recv().await {
            Some(Trigger::Reload) => {
                generation += 1;
                out.status("Reloading dev services...");
                match ConfigParser::new().load_config(&opts.config_path) {
                    Ok(reloaded) => config = reloaded,
                    Err(e) => {
                        out.warning(&format!(
                            "Keeping the previous configuration: {}",
                            e.with_suggestion()
                        ));
                    }
                }
            }
            Some(Trigger::Shutdown) | None => break,
        }
    }

    close_all(&registry, out).await;
    Ok(())
}

async fn close_all(registry: &Registry, out: &dyn UserOutput) {
    out.status("Stopping dev services...");
    match registry.close_all().await {
        Ok(()) => out.success("Dev services stopped"),
        Err(e) => out.error(&format!("Failed to stop dev services: {}", e.with_suggestion())),
    }
}

fn print_report(
    generation: u32,
    report: &BuildReport,
    registry: &Registry,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    if json {
        use serde_json::json;

        let mut services = serde_json::Map::new();
        if let Some((project, outcome)) = &report.compose {
            services.insert(format!("compose:{}", project), json!(outcome.kind()));
        }
        for (name, outcome) in &report.services {
            services.insert(name.clone(), json!(outcome.kind()));
        }
        let failures: serde_json::Map<_, _> = report
            .failures
            .iter()
            .map(|(name, e)| (name.clone(), json!(e.to_string())))
            .collect();
        let doc = json!({
            "generation": generation,
            "services": services,
            "failures": failures,
            "config": report.config(),
            "registry": registry.snapshot(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    out.blank();
    out.status(&format!("Dev services (build {}):", generation));
    out.status(&format!("{:-<50}", ""));
    if report.compose.is_none() && report.services.is_empty() && report.failures.is_empty() {
        out.status("  No dev services configured");
    }
    if let Some((project, outcome)) = &report.compose {
        out.status(&format!("  {} {}", outcome_icon(outcome), describe(project, outcome)));
    }
    for (name, outcome) in &report.services {
        out.status(&format!("  {} {}", outcome_icon(outcome), describe(name, outcome)));
    }
    for (name, e) in &report.failures {
        out.error(&format!("  x {:<24} {}", name, e.with_suggestion()));
    }

    let config = report.config();
    if !config.is_empty() {
        out.blank();
        out.status("Configuration:");
        for (key, value) in &config {
            out.status(&format!("  {}={}", key, value));
        }
    }
    out.blank();
    Ok(())
}

fn outcome_icon(outcome: &ServiceOutcome) -> &'static str {
    match outcome {
        ServiceOutcome::Started { .. } => "+",
        ServiceOutcome::Reused(_) => "=",
        ServiceOutcome::Discovered(_) => "~",
        ServiceOutcome::Skipped { .. } => "o",
    }
}

fn describe(name: &str, outcome: &ServiceOutcome) -> String {
    match outcome {
        ServiceOutcome::Skipped { reason } => format!("{:<24} skipped ({})", name, reason),
        ServiceOutcome::Started { evicted, .. } if *evicted > 0 => {
            format!("{:<24} started, replaced {} previous", name, evicted)
        }
        other => {
            let detail = other
                .service()
                .and_then(|s| s.description().map(str::to_string))
                .unwrap_or_default();
            format!("{:<24} {:<10} {}", name, other.kind(), detail)
        }
    }
}

fn spawn_signal_listener(tx: mpsc::Sender<Trigger>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("Failed to create SIGHUP handler: {}", e);
                None
            }
        };

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    // In-flight readiness waits stop at once.
                    shutdown.cancel();
                    tx.send(Trigger::Shutdown).await.ok();
                    return;
                }
                _ = async {
                    if let Some(ref mut s) = sighup {
                        s.recv().await
                    } else {
                        std::future::pending::<Option<()>>().await
                    }
                } => {
                    if tx.send(Trigger::Reload).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
}

fn spawn_stdin_listener(tx: mpsc::Sender<Trigger>) {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            if tx.send(Trigger::Reload).await.is_err() {
                return;
            }
        }
        tracing::debug!("stdin closed, reload only on SIGHUP");
    });
}
