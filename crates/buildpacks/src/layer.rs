//! Capability records and the merge that chains them.
//!
//! Every variant contributes one [`Layer`]. The composed plan of a variant is
//! `Layer::merge(composed(parent), local(variant))`, so inherited content
//! always precedes local additions and override precedence lives in a single
//! function instead of being spread across a class hierarchy.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::privilege::Instruction;

/// Host-to-container file mapping keyed by container destination.
///
/// Inserting a destination that is already mapped replaces its source, so
/// the mapping applied last wins on collision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileManifest {
    by_destination: BTreeMap<String, PathBuf>,
}

impl FileManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: impl Into<PathBuf>, destination: impl Into<String>) {
        self.by_destination.insert(destination.into(), source.into());
    }

    pub fn with(mut self, source: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        self.insert(source, destination);
        self
    }

    /// Apply `later` on top of `self`; `later` wins on shared destinations.
    pub fn extend(&mut self, later: FileManifest) {
        self.by_destination.extend(later.by_destination);
    }

    pub fn source_for(&self, destination: &str) -> Option<&Path> {
        self.by_destination.get(destination).map(PathBuf::as_path)
    }

    pub fn contains_destination(&self, destination: &str) -> bool {
        self.by_destination.contains_key(destination)
    }

    pub fn len(&self) -> usize {
        self.by_destination.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_destination.is_empty()
    }

    /// Entries ordered by host source path, for deterministic archives.
    pub fn sorted_by_source(&self) -> Vec<(&Path, &str)> {
        let mut entries: Vec<(&Path, &str)> = self
            .by_destination
            .iter()
            .map(|(destination, source)| (source.as_path(), destination.as_str()))
            .collect();
        entries.sort();
        entries
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layer {
    pub base_image: Option<String>,
    pub build_args: Vec<String>,
    pub base_packages: BTreeSet<String>,
    pub build_env: Vec<(String, String)>,
    pub path: Vec<String>,
    pub files: FileManifest,
    pub build_scripts: Vec<Instruction>,
    pub preassemble_files: FileManifest,
    pub preassemble_scripts: Vec<Instruction>,
    pub env: Vec<(String, String)>,
    pub assemble_scripts: Vec<Instruction>,
    pub labels: BTreeMap<String, String>,
    pub start_script: Option<String>,
    pub appendix: Option<String>,
}

impl Layer {
    /// Combine an inherited layer with a variant's local contribution.
    ///
    /// Lists concatenate as `parent ++ local`, sets union, file manifests
    /// and labels are applied with `local` last, and scalar overrides take
    /// the local value when one is set.
    pub fn merge(parent: Layer, local: Layer) -> Layer {
        let Layer {
            base_image,
            mut build_args,
            mut base_packages,
            mut build_env,
            mut path,
            mut files,
            mut build_scripts,
            mut preassemble_files,
            mut preassemble_scripts,
            mut env,
            mut assemble_scripts,
            mut labels,
            start_script,
            appendix,
        } = parent;

        build_args.extend(local.build_args);
        base_packages.extend(local.base_packages);
        build_env.extend(local.build_env);
        path.extend(local.path);
        files.extend(local.files);
        build_scripts.extend(local.build_scripts);
        preassemble_files.extend(local.preassemble_files);
        preassemble_scripts.extend(local.preassemble_scripts);
        env.extend(local.env);
        assemble_scripts.extend(local.assemble_scripts);
        labels.extend(local.labels);

        Layer {
            base_image: local.base_image.or(base_image),
            build_args,
            base_packages,
            build_env,
            path,
            files,
            build_scripts,
            preassemble_files,
            preassemble_scripts,
            env,
            assemble_scripts,
            labels,
            start_script: local.start_script.or(start_script),
            appendix: local.appendix.or(appendix),
        }
    }
}
