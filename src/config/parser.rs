use super::Config;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// File names tried in each directory, in order.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["devservices.yaml", "devservices.yml"];

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find the config file starting from the current directory.
    pub fn find_config_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_config_in_dir(&current_dir)
    }

    /// Look in `dir`, then in each parent.
    pub fn find_config_in_dir(dir: &Path) -> Result<PathBuf> {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        match dir.parent() {
            Some(parent) => Self::find_config_in_dir(parent),
            None => Err(Error::Config(
                "Could not find devservices.yaml in current directory or any parent".to_string(),
            )),
        }
    }

    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        self.parse_config(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parse and validate a YAML document. An empty document is the default
    /// configuration.
    pub fn parse_config(&self, content: &str) -> Result<Config> {
        let config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoveImages;
    use crate::registry::LaunchMode;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn parses_a_full_config() {
        let yaml = r#"
application: shop
launch_mode: test
timeout: 45s
services:
  redis:
    image: redis:7
    container_port: 6379
    env:
      REDIS_ARGS: "--save ''"
  mq:
    enabled: false
    image: rabbitmq:3
    container_port: 5672
compose:
  files: [compose.yml]
  profiles: [full]
  remove_images: all
  remove_volumes: true
  stop_timeout: 10s
"#;
        let config = Parser::new().parse_config(yaml).unwrap();
        assert_eq!(config.application.as_deref(), Some("shop"));
        assert_eq!(config.launch_mode, LaunchMode::Test);
        assert_eq!(config.startup_timeout(), Duration::from_secs(45));
        assert_eq!(config.services.len(), 2);
        assert!(!config.services["mq"].enabled);
        assert_eq!(config.compose.remove_images, RemoveImages::All);
        assert_eq!(config.compose.stop_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn empty_file_is_default() {
        let config = Parser::new().parse_config("\n").unwrap();
        assert!(config.services.is_empty());
        assert!(config.enabled);
    }

    #[test]
    fn unknown_launch_mode_is_an_error() {
        let err = Parser::new().parse_config("launch_mode: staging\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn found_in_a_parent_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("devservices.yml"), "enabled: true\n").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = Parser::find_config_in_dir(&nested).unwrap();
        assert_eq!(found, dir.path().join("devservices.yml"));
    }
}
