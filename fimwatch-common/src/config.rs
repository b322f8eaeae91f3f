use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::layout::KernelLayout;

/// Per-core queue depth when neither the file nor the command line sets one.
pub const DEFAULT_QUEUE_DEPTH: usize = 4096;

/// Configuration loaded from JSON file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub watch: Vec<WatchEntry>,
    /// Path prefixes never installed as rules.
    pub excludes: Vec<PathBuf>,
    /// Process name prefixes whose events are discarded.
    pub ignore_processes: Vec<String>,
    pub follow_links: bool,
    pub strict_device: bool,
    pub queue_depth: Option<usize>,
    pub layout: LayoutConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub recursive: bool,
}

impl WatchEntry {
    pub fn new<P: Into<PathBuf>>(path: P, recursive: bool) -> Self {
        Self {
            path: path.into(),
            recursive,
        }
    }
}

/// Offsets for the running kernel. Any field left out keeps its default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// `/proc/version` of the kernel the offsets were taken from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    #[serde(flatten)]
    pub offsets: KernelLayout,
}

impl FileConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|err| err.in_file(path))
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }
}

impl LayoutConfig {
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json {
        path: Option<PathBuf>,
        source: serde_json::Error,
    },
}

impl ConfigError {
    fn in_file(self, file: &Path) -> Self {
        match self {
            ConfigError::Json { source, .. } => ConfigError::Json {
                path: Some(file.to_path_buf()),
                source,
            },
            io => io,
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            ConfigError::Json {
                path: Some(path),
                source,
            } => write!(f, "bad config {}: {}", path.display(), source),
            ConfigError::Json { path: None, source } => write!(f, "bad config: {}", source),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Json { source, .. } => Some(source),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(source: serde_json::Error) -> Self {
        ConfigError::Json { path: None, source }
    }
}
