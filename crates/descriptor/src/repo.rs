use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{EnvironmentDescriptor, DESCRIPTOR_FILE};

/// Directories searched for build files, in precedence order.
const BINDER_DIRS: &[&str] = &[".wholetale", "binder"];

/// Settings fixed once a variant has been selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantSettings {
    pub r_snapshot_date: Option<NaiveDate>,
}

/// Everything the composer may look at for one build invocation.
///
/// The descriptor is read exactly once, in [`RepoContext::load`]. A missing
/// or malformed descriptor is recorded as `None` so that detection fails
/// closed instead of erroring.
#[derive(Debug, Clone)]
pub struct RepoContext {
    root: PathBuf,
    binder_dir: Option<String>,
    support_dir: PathBuf,
    descriptor: Option<EnvironmentDescriptor>,
    environment: BTreeMap<String, String>,
    settings: VariantSettings,
}

impl RepoContext {
    pub fn load(root: impl Into<PathBuf>, support_dir: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let binder_dir = find_binder_dir(&root);
        let descriptor_path = match &binder_dir {
            Some(dir) => root.join(dir).join(DESCRIPTOR_FILE),
            None => root.join(DESCRIPTOR_FILE),
        };

        let descriptor = match EnvironmentDescriptor::from_path(&descriptor_path) {
            Ok(descriptor) => Some(descriptor),
            Err(err) => {
                debug!(path = %descriptor_path.display(), error = %err, "No usable descriptor");
                None
            }
        };

        Self::assemble(root, binder_dir, support_dir.into(), descriptor)
    }

    /// Build a context around an already parsed descriptor.
    pub fn with_descriptor(
        root: impl Into<PathBuf>,
        support_dir: impl Into<PathBuf>,
        descriptor: Option<EnvironmentDescriptor>,
    ) -> Self {
        let root = root.into();
        let binder_dir = find_binder_dir(&root);
        Self::assemble(root, binder_dir, support_dir.into(), descriptor)
    }

    fn assemble(
        root: PathBuf,
        binder_dir: Option<String>,
        support_dir: PathBuf,
        descriptor: Option<EnvironmentDescriptor>,
    ) -> Self {
        let environment = descriptor
            .as_ref()
            .map(EnvironmentDescriptor::environment_map)
            .unwrap_or_default();

        Self {
            root,
            binder_dir,
            support_dir,
            descriptor,
            environment,
            settings: VariantSettings::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn descriptor(&self) -> Option<&EnvironmentDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn env_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.environment
            .get(key)
            .map(String::as_str)
            .unwrap_or(default)
    }

    pub fn has_binder_dir(&self) -> bool {
        self.binder_dir.is_some()
    }

    /// Repository-relative location of a build file, as referenced from
    /// scripts running inside `${REPO_DIR}`.
    pub fn binder_path(&self, name: &str) -> String {
        match &self.binder_dir {
            Some(dir) => format!("{}/{}", dir, name),
            None => name.to_string(),
        }
    }

    pub fn host_path(&self, name: &str) -> PathBuf {
        self.root.join(self.binder_path(name))
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.host_path(name).is_file()
    }

    pub fn read_file(&self, name: &str) -> io::Result<Option<String>> {
        let path = self.host_path(name);
        if !path.is_file() {
            return Ok(None);
        }
        fs::read_to_string(path).map(Some)
    }

    /// Host path of a helper file shipped alongside the builder.
    pub fn support_file(&self, relative: &str) -> PathBuf {
        self.support_dir.join(relative)
    }

    pub fn settings(&self) -> &VariantSettings {
        &self.settings
    }

    pub fn with_settings(mut self, settings: VariantSettings) -> Self {
        self.settings = settings;
        self
    }
}

fn find_binder_dir(root: &Path) -> Option<String> {
    BINDER_DIRS
        .iter()
        .find(|dir| root.join(dir).is_dir())
        .map(|dir| dir.to_string())
}
