//! # Dev Services
//!
//! On-demand backing-service containers (databases, brokers, caches) for local
//! development and testing, reused across application restarts.
//!
//! ## Features
//!
//! - **Cross-restart registry**: running services are keyed by application
//!   identity and identifying configuration, so a restart with the same
//!   configuration reuses the container and a changed configuration replaces it
//! - **Startable services**: a start/reuse/evict state machine around any
//!   start action, with lazily evaluated connection properties
//! - **Shared containers**: containers labelled by another application are
//!   discovered and connected to, never stopped
//! - **Compose projects**: compose files are merged, filtered by profile and
//!   label, brought up through the compose CLI and waited for concurrently
//! - **Config source**: live connection properties exposed as plain settings
//!
//! ## Quick Start
//!
//! ```no_run
//! use dev_services::{BuildContext, DockerClient, Parser, Registry};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), dev_services::Error> {
//! let parser = Parser::new();
//! let config = parser.load_config(parser.find_config_file()?)?;
//!
//! let ctx = BuildContext::new(&config, ".", Registry::global(), Arc::new(DockerClient::new()));
//! let report = dev_services::run_build_steps(&ctx, &config).await;
//! for (key, value) in report.config() {
//!     println!("{}={}", key, value);
//! }
//!
//! Registry::global().close_all().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - The registry is shared through `Arc` and locks one bucket per identity
//! - Readiness waits run concurrently up to a permit limit and stop on
//!   cancellation or when the container exits
//! - A service's release action runs at most once, even when closed from
//!   several tasks

pub mod compose;
pub mod config;
pub mod docker;
pub mod error;
pub mod lock_order;
pub mod processor;
pub mod registry;
pub mod service;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::{Config, Parser};
pub use docker::{ContainerEngine, DockerClient};
pub use error::{Error, Result};
pub use processor::{run_build_steps, BuildContext, BuildReport, ServiceOutcome};
pub use registry::{AppIdentity, LaunchMode, Registry, ServiceConfig};
pub use service::{DevService, DevServicesConfigSource, StartableService};
