use super::definition::ComposeServiceDefinition;
use super::file::ParsedComposeFile;
use crate::error::Result;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn compose_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(docker-compose|compose).*\.(yml|yaml)$")
            .expect("static regex for compose file names is valid")
    })
}

/// Compose files in `root` (not recursive), sorted by name.
pub fn discover_compose_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if compose_file_pattern().is_match(&name.to_string_lossy()) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// `image` with the implicit `:latest` tag made explicit.
pub fn canonical_image_name(image: &str) -> String {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if image.contains('@') || last_segment.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}

/// Several compose files merged into one deployment.
///
/// Files are applied in order; a service defined again in a later file
/// replaces the earlier definition entirely.
#[derive(Debug, Clone, Default)]
pub struct ComposeFiles {
    files: Vec<PathBuf>,
    services: BTreeMap<String, ComposeServiceDefinition>,
    notes: Vec<String>,
}

impl ComposeFiles {
    pub fn parse(files: &[PathBuf]) -> Result<Self> {
        let parsed = files
            .iter()
            .map(|f| ParsedComposeFile::parse(f))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::merge(parsed))
    }

    pub fn merge(parsed: impl IntoIterator<Item = ParsedComposeFile>) -> Self {
        let mut merged = ComposeFiles::default();
        for file in parsed {
            merged.files.push(file.path().to_path_buf());
            merged.notes.extend(file.notes().iter().cloned());
            merged.services.extend(file.into_services());
        }
        merged
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn services(&self) -> &BTreeMap<String, ComposeServiceDefinition> {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ComposeServiceDefinition> {
        self.services.get(name)
    }

    pub fn service_names(&self) -> BTreeSet<String> {
        self.services.keys().cloned().collect()
    }

    /// Every image the deployment runs, in canonical form.
    pub fn dependency_images(&self) -> BTreeSet<String> {
        self.services
            .values()
            .flat_map(|s| s.images.iter())
            .map(|i| canonical_image_name(i))
            .collect()
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
