use chrono::NaiveDate;
use descriptor::{EnvironmentDescriptor, RepoContext, VariantSettings};
use std::fmt;

use crate::error::ComposeError;
use crate::layer::Layer;

/// Local contribution of one variant.
pub type LayerFn = fn(&RepoContext) -> Result<Layer, ComposeError>;

/// Post-selection hook fixing settings the layer functions read back.
pub type FinalizeFn = fn(&RepoContext, NaiveDate, &mut VariantSettings);

/// Predicate deciding whether a descriptor asks for a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// `config.buildpack` equals the identifier.
    Buildpack(String),
    /// `config.template` equals the identifier.
    Template(String),
    /// Only reachable as a parent or as the registry default.
    Never,
}

impl Detection {
    pub fn matches(&self, descriptor: Option<&EnvironmentDescriptor>) -> bool {
        let Some(descriptor) = descriptor else {
            return false;
        };
        match self {
            Detection::Buildpack(id) => descriptor.variant_id.as_deref() == Some(id.as_str()),
            Detection::Template(id) => descriptor.template_id.as_deref() == Some(id.as_str()),
            Detection::Never => false,
        }
    }
}

#[derive(Clone)]
pub struct Variant {
    name: String,
    detection: Detection,
    parent: Option<Box<Variant>>,
    layer: LayerFn,
    finalize: Option<FinalizeFn>,
}

impl Variant {
    pub fn root(name: impl Into<String>, layer: LayerFn) -> Self {
        Self {
            name: name.into(),
            detection: Detection::Never,
            parent: None,
            layer,
            finalize: None,
        }
    }

    pub fn derive(parent: &Variant, name: impl Into<String>, layer: LayerFn) -> Self {
        Self {
            name: name.into(),
            detection: Detection::Never,
            parent: Some(Box::new(parent.clone())),
            layer,
            finalize: None,
        }
    }

    pub fn detected_by(mut self, detection: Detection) -> Self {
        self.detection = detection;
        self
    }

    pub fn with_finalize(mut self, finalize: FinalizeFn) -> Self {
        self.finalize = Some(finalize);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn detection(&self) -> &Detection {
        &self.detection
    }

    pub fn parent(&self) -> Option<&Variant> {
        self.parent.as_deref()
    }

    /// Derivation chain from the root ancestor down to `self`.
    pub fn chain(&self) -> Vec<&Variant> {
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(variant) = current {
            chain.push(variant);
            current = variant.parent();
        }
        chain.reverse();
        chain
    }

    pub fn matches(&self, descriptor: Option<&EnvironmentDescriptor>) -> bool {
        self.detection.matches(descriptor)
    }

    pub fn local_layer(&self, ctx: &RepoContext) -> Result<Layer, ComposeError> {
        (self.layer)(ctx)
    }

    /// Run every finalize hook along the chain, ancestors first.
    pub fn finalize(&self, ctx: &RepoContext, today: NaiveDate) -> VariantSettings {
        let mut settings = ctx.settings().clone();
        for variant in self.chain() {
            if let Some(hook) = variant.finalize {
                hook(ctx, today, &mut settings);
            }
        }
        settings
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variant")
            .field("name", &self.name)
            .field("detection", &self.detection)
            .field("parent", &self.parent().map(Variant::name))
            .field("finalize", &self.finalize.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty(_: &RepoContext) -> Result<Layer, ComposeError> {
        Ok(Layer::default())
    }

    #[test]
    fn detection_fails_closed_without_descriptor() {
        assert!(!Detection::Buildpack("PythonBuildPack".into()).matches(None));
        assert!(!Detection::Template("rocker-geospatial.tpl".into()).matches(None));
    }

    #[test]
    fn detection_compares_the_right_key() {
        let descriptor = EnvironmentDescriptor {
            variant_id: Some("RBuildPack".into()),
            template_id: Some("rocker-geospatial.tpl".into()),
            environment: vec![],
        };
        assert!(Detection::Buildpack("RBuildPack".into()).matches(Some(&descriptor)));
        assert!(!Detection::Buildpack("rocker-geospatial.tpl".into()).matches(Some(&descriptor)));
        assert!(Detection::Template("rocker-geospatial.tpl".into()).matches(Some(&descriptor)));
        assert!(!Detection::Never.matches(Some(&descriptor)));
    }

    #[test]
    fn chain_runs_root_first() {
        let base = Variant::root("base", empty);
        let mid = Variant::derive(&base, "mid", empty);
        let leaf = Variant::derive(&mid, "leaf", empty);

        let names: Vec<&str> = leaf.chain().iter().map(|v| v.name()).collect();
        assert_eq!(names, vec!["base", "mid", "leaf"]);
    }

    #[test]
    fn finalize_walks_ancestors_before_self() {
        fn set_early(_: &RepoContext, _: NaiveDate, s: &mut VariantSettings) {
            s.r_snapshot_date = NaiveDate::from_ymd_opt(2020, 1, 1);
        }
        fn set_late(_: &RepoContext, today: NaiveDate, s: &mut VariantSettings) {
            assert!(s.r_snapshot_date.is_some());
            s.r_snapshot_date = Some(today);
        }

        let base = Variant::root("base", empty).with_finalize(set_early);
        let leaf = Variant::derive(&base, "leaf", empty).with_finalize(set_late);

        let dir = tempfile::tempdir().unwrap();
        let ctx = RepoContext::with_descriptor(dir.path(), "/support", None);
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        assert_eq!(leaf.finalize(&ctx, today).r_snapshot_date, Some(today));
    }
}
