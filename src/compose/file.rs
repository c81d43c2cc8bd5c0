use super::definition::{scalar, ComposeServiceDefinition};
use super::dockerfile::images_from_dockerfile;
use crate::error::{Error, Result};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// One parsed compose document.
#[derive(Debug, Clone, Default)]
pub struct ParsedComposeFile {
    path: PathBuf,
    services: BTreeMap<String, ComposeServiceDefinition>,
    notes: Vec<String>,
}

impl ParsedComposeFile {
    pub fn parse(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::ComposeFile {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_str(&content, path)
    }

    /// Parse `content` as if read from `path`. Build contexts resolve
    /// against the directory of `path`.
    pub fn from_str(content: &str, path: &Path) -> Result<Self> {
        let file = path.display().to_string();
        let document: Value = serde_yaml::from_str(content).map_err(|e| Error::ComposeFile {
            file: file.clone(),
            reason: e.to_string(),
        })?;

        let mut parsed = ParsedComposeFile {
            path: path.to_path_buf(),
            ..Default::default()
        };
        let root = match document {
            Value::Null => return Ok(parsed),
            Value::Mapping(root) => root,
            _ => {
                return Err(Error::ComposeFile {
                    file,
                    reason: "top level is not a mapping".to_string(),
                })
            }
        };

        let services = match (root.get("services"), root.contains_key("version")) {
            (Some(Value::Mapping(services)), _) => services.clone(),
            (Some(_), _) => {
                parsed.note("'services' is not a mapping, no services read");
                return Ok(parsed);
            }
            (None, true) => {
                parsed.note("'version' given without a 'services' section, no services read");
                return Ok(parsed);
            }
            // Legacy format: the whole document is the service map
            (None, false) => root,
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        for (name, definition) in &services {
            let Some(name) = scalar(name) else {
                continue;
            };
            if name.starts_with("x-") {
                continue;
            }
            let Value::Mapping(definition) = definition else {
                parsed.note(format!("service '{}' is not a mapping, skipped", name));
                continue;
            };
            if definition.contains_key("container_name") {
                return Err(Error::ContainerNameOverride { service: name, file });
            }

            let mut def = ComposeServiceDefinition::from_mapping(&name, definition);
            if let Some(dockerfile) = dockerfile_path(base_dir, definition) {
                if let Ok(content) = std::fs::read_to_string(&dockerfile) {
                    tracing::debug!(
                        "Reading base images of '{}' from {}",
                        name,
                        dockerfile.display()
                    );
                    let images = images_from_dockerfile(&content);
                    if !images.is_empty() {
                        def.images = images.into_iter().collect::<BTreeSet<_>>();
                    }
                }
            }
            parsed.services.insert(name, def);
        }
        Ok(parsed)
    }

    fn note(&mut self, note: impl Into<String>) {
        let note = format!("{}: {}", self.path.display(), note.into());
        tracing::debug!("{}", note);
        self.notes.push(note);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn services(&self) -> &BTreeMap<String, ComposeServiceDefinition> {
        &self.services
    }

    pub fn into_services(self) -> BTreeMap<String, ComposeServiceDefinition> {
        self.services
    }

    /// Things that were skipped while parsing.
    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

/// Dockerfile named by a service's `build` entry.
fn dockerfile_path(base_dir: &Path, definition: &Mapping) -> Option<PathBuf> {
    match definition.get("build")? {
        Value::String(context) => Some(base_dir.join(context).join("Dockerfile")),
        Value::Mapping(build) => {
            let context = build.get("context").and_then(scalar).unwrap_or_else(|| ".".to_string());
            let dockerfile = build
                .get("dockerfile")
                .and_then(scalar)
                .unwrap_or_else(|| "Dockerfile".to_string());
            Some(base_dir.join(context).join(dockerfile))
        }
        _ => None,
    }
}
