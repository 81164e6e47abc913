//! Environment descriptor reader.
//!
//! A repository declares its environment in `environment.json`:
//!
//! ```json
//! {"config": {"buildpack": "PythonBuildPack", "template": "x.tpl", "environment": ["KEY=VALUE"]}}
//! ```
//!
//! [`EnvironmentDescriptor`] is the typed view of the `config` object and
//! [`RepoContext`] bundles it with the repository layout the build plan
//! composer needs.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, instrument};

pub mod repo;
pub use repo::{RepoContext, VariantSettings};

/// Conventional descriptor file name inside the binder directory.
pub const DESCRIPTOR_FILE: &str = "environment.json";

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Descriptor file not found: {path}")]
    NotFound { path: String },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("Descriptor parsing failed: {message}")]
    Parse { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EnvironmentDescriptor {
    #[serde(rename = "buildpack", default)]
    pub variant_id: Option<String>,
    #[serde(rename = "template", default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub environment: Vec<String>,
}

#[derive(Deserialize)]
struct DescriptorFile {
    config: EnvironmentDescriptor,
}

impl EnvironmentDescriptor {
    #[instrument]
    pub fn from_path(path: &Path) -> Result<Self, DescriptorError> {
        if !path.exists() {
            return Err(DescriptorError::NotFound {
                path: path.to_string_lossy().to_string(),
            });
        }

        let content = fs::read_to_string(path).map_err(|e| DescriptorError::Io {
            message: format!("Failed to read descriptor {}: {}", path.display(), e),
        })?;

        let descriptor = content.parse::<Self>()?;
        debug!(
            variant = ?descriptor.variant_id,
            template = ?descriptor.template_id,
            "Loaded environment descriptor"
        );
        Ok(descriptor)
    }

    /// Fold the `KEY=VALUE` list into a map. Later entries win on key
    /// collision; an entry without `=` maps to an empty value.
    pub fn environment_map(&self) -> BTreeMap<String, String> {
        self.environment
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (entry.clone(), String::new()),
            })
            .collect()
    }
}

impl FromStr for EnvironmentDescriptor {
    type Err = DescriptorError;

    fn from_str(json: &str) -> Result<Self, Self::Err> {
        serde_json::from_str::<DescriptorFile>(json)
            .map(|file| file.config)
            .map_err(|e| DescriptorError::Parse {
                message: e.to_string(),
            })
    }
}
