//! Container labels written and read by dev services.

/// Marks a container as a shared dev service; the value is the service name
/// other applications use to find it.
pub const DEV_SERVICE_LABEL: &str = "devservices.service";

/// Names the feature (e.g. `redis`) that launched the container.
pub const DEV_SERVICE_FEATURE_LABEL: &str = "devservices.feature";

/// Set by compose on every container it creates.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Set by compose to the service name inside the project.
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
