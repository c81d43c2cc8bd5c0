//! Compose deployments.
//!
//! - [`ComposeFiles`]: the merged model of one or more compose files
//! - [`plan`]: which services run and what each one waits for
//! - [`ReadinessWaiter`]: concurrent, cancellable readiness polling
//! - [`ComposeProject`]: `compose up` / `compose down` through the CLI

pub mod coordinator;
pub mod definition;
pub mod dockerfile;
pub mod file;
pub mod files;
pub mod project;
pub mod wait;

pub use coordinator::{plan, strategies_for, wait_all, ComposePlan, ServicePlan};
pub use definition::ComposeServiceDefinition;
pub use dockerfile::images_from_dockerfile;
pub use file::ParsedComposeFile;
pub use files::{canonical_image_name, discover_compose_files, ComposeFiles};
pub use project::{project_name_for, ComposeCommand, ComposeProject};
pub use wait::{ContainerTarget, ReadinessTarget, ReadinessWaiter, WaitStrategy};
