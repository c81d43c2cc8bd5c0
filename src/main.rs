mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use dev_services::{Error as DevError, Parser as ConfigParser};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(dev_error) = e.downcast_ref::<DevError>() {
            eprintln!("Error: {}", dev_error);
            if let Some(suggestion) = dev_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    // ── Commands that need NO config ─────────────────────────────────
    if let Commands::Ps { json } = &cli.command {
        return commands::run_ps(*json, &output::CliOutput).await;
    }

    // ── Load config ─────────────────────────────────────────────────
    let parser = ConfigParser::new();
    let config_path = if let Some(path) = cli.config.clone() {
        path
    } else {
        parser.find_config_file()?
    };
    let config = parser.load_config(&config_path)?;
    let work_dir = resolve_work_dir(cli.workdir, &config_path)?;

    match cli.command {
        Commands::Up { json, mode, once } => {
            let mut config = config;
            if let Some(mode) = mode {
                config.launch_mode = mode.parse().map_err(anyhow::Error::msg)?;
            }
            let opts = commands::UpOptions {
                json,
                once,
                config_path,
            };
            if json {
                commands::run_up(config, work_dir, opts, &output::StderrOutput).await?;
            } else {
                commands::run_up(config, work_dir, opts, &output::CliOutput).await?;
            }
        }
        Commands::Validate { profile } => {
            commands::run_validate(&config, &config_path, &work_dir, &profile, &output::CliOutput)?;
        }
        Commands::Ps { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}

/// Resolve the work directory from CLI `--workdir` or the config file's parent directory.
fn resolve_work_dir(
    workdir: Option<std::path::PathBuf>,
    config_path: &std::path::Path,
) -> anyhow::Result<std::path::PathBuf> {
    if let Some(workdir) = workdir {
        return Ok(workdir);
    }
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        _ => Ok(std::env::current_dir()?),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
