//! Configuration file parsing for heapwalk.toml.

use heapwalk_gc::HeapConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file names, searched in this order
const CONFIG_NAMES: &[&str] = &["heapwalk.toml", ".heapwalk.toml"];

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Heap sizing
    #[serde(default)]
    pub heap: HeapSection,

    /// Demo population and query settings
    #[serde(default)]
    pub demo: DemoSection,
}

/// `[heap]` table.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HeapSection {
    /// Allocated bytes that trigger a collection
    pub gc_threshold: usize,

    /// Handle table capacity
    pub max_handles: usize,
}

impl Default for HeapSection {
    fn default() -> Self {
        let defaults = HeapConfig::default();
        Self {
            gc_threshold: defaults.gc_threshold,
            max_handles: defaults.max_handles,
        }
    }
}

impl HeapSection {
    pub fn heap_config(&self) -> HeapConfig {
        HeapConfig {
            gc_threshold: self.gc_threshold,
            max_handles: self.max_handles,
        }
    }
}

/// `[demo]` table.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DemoSection {
    /// Rooted `App` instances
    pub instances: usize,

    /// Rooted `DerivedApp` instances
    pub derived: usize,

    /// Unrooted `App` instances left for the collector
    pub garbage: usize,

    /// Maximum instances returned; unbounded when absent
    pub limit: Option<usize>,

    /// Collect before walking
    pub collect_first: bool,
}

impl Default for DemoSection {
    fn default() -> Self {
        Self {
            instances: 10,
            derived: 0,
            garbage: 5,
            limit: None,
            collect_first: true,
        }
    }
}

/// Errors loading a config file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Load configuration from `path`, or from the nearest config file above the
/// working directory. No file means the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| find_config_file(&cwd)),
    };

    match config_path {
        Some(path) => parse_config_file(&path),
        None => Ok(Config::default()),
    }
}

fn parse_config_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Search `start` and its parents for a config file.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.heap.heap_config(), HeapConfig::default());
        assert_eq!(config.demo.instances, 10);
        assert_eq!(config.demo.limit, None);
        assert!(config.demo.collect_first);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[heap]
max_handles = 128

[demo]
instances = 25
derived = 4
limit = 7
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.heap.max_handles, 128);
        assert_eq!(config.heap.gc_threshold, HeapConfig::default().gc_threshold);
        assert_eq!(config.demo.instances, 25);
        assert_eq!(config.demo.derived, 4);
        assert_eq!(config.demo.garbage, 5);
        assert_eq!(config.demo.limit, Some(7));
    }

    #[test]
    fn test_find_config_in_parent() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join("heapwalk.toml"), "[demo]\ninstances = 3\n").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, root.path().join("heapwalk.toml"));

        let config = load_config(Some(&found)).unwrap();
        assert_eq!(config.demo.instances, 3);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let err = load_config(Some(&root.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("heapwalk.toml");
        std::fs::write(&path, "[demo]\ninstances = \"many\"\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("heapwalk.toml"));
    }
}
