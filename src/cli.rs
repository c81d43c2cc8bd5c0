use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "devsvc")]
#[command(about = "Dev Services - Backing-service containers reused across restarts")]
pub struct Cli {
    /// Config file path (defaults to devservices.yaml, searched upwards)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Working directory (defaults to the config file's directory)
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start dev services and keep them until interrupted
    Up {
        /// Print the published configuration as JSON
        #[arg(long)]
        json: bool,

        /// Launch mode used for the registry identity (development, test)
        #[arg(long, value_name = "MODE")]
        mode: Option<String>,

        /// Exit after the first build instead of waiting for reloads
        #[arg(long)]
        once: bool,
    },
    /// Validate the configuration and the compose files it uses
    Validate {
        /// Compose profiles to activate (can be repeated)
        #[arg(short, long)]
        profile: Vec<String>,
    },
    /// List dev-service containers known to the engine
    Ps {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
