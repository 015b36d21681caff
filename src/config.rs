//! Configuration settings for guest binary analysis

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use std::path::Path;

/// Configuration for image loading and stack unwinding
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// The stack unwinding settings
    #[serde(default)]
    pub unwind: Unwind,

    /// The image loading settings
    #[serde(default)]
    pub loader: Loader,
}

/// Configuration settings specific to stack unwinding
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Unwind {
    /// Maximum number of frames recorded per backtrace
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
}

/// Configuration settings specific to image loading
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Loader {
    /// Command invoked against an image path to list its dynamic
    /// dependencies (`name => path (address)` lines on stdout)
    #[serde(default = "default_dependency_resolver")]
    pub dependency_resolver: String,
}

/// Default maximum number of frames walked per backtrace
fn default_max_frames() -> usize {
    256
}

/// Default dynamic linker query command
fn default_dependency_resolver() -> String {
    String::from("ldd")
}

impl Default for Unwind {
    fn default() -> Self {
        Self {
            max_frames: default_max_frames(),
        }
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            dependency_resolver: default_dependency_resolver(),
        }
    }
}

impl Config {
    /// Read a [`Config`] from the TOML file at `path`
    ///
    /// # Errors
    ///
    /// * Failed to read or parse the file
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = toml::from_str(&data)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(config)
    }
}
