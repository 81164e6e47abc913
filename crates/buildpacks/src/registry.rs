use chrono::NaiveDate;
use descriptor::RepoContext;
use tracing::{debug, info, instrument};

use crate::catalog::builtin_variants;
use crate::variant::Variant;

/// Ordered variant list plus the fallback used when nothing matches.
#[derive(Debug, Clone)]
pub struct Registry {
    variants: Vec<Variant>,
    default: Variant,
}

/// Outcome of [`Registry::select`].
#[derive(Debug, Clone)]
pub struct Selection<'r> {
    pub variant: &'r Variant,
    pub context: RepoContext,
}

impl Registry {
    pub fn new(variants: Vec<Variant>, default: Variant) -> Self {
        Self { variants, default }
    }

    pub fn builtin() -> Self {
        let (variants, default) = builtin_variants();
        Self::new(variants, default)
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn default_variant(&self) -> &Variant {
        &self.default
    }

    /// First registered variant whose predicate accepts the descriptor.
    pub fn detect(&self, ctx: &RepoContext) -> &Variant {
        let descriptor = ctx.descriptor();
        for variant in &self.variants {
            if variant.matches(descriptor) {
                debug!(variant = variant.name(), "Detection matched");
                return variant;
            }
            debug!(variant = variant.name(), "Detection did not match");
        }
        debug!(variant = self.default.name(), "Falling back to default variant");
        &self.default
    }

    /// Detect, then finalize the chosen variant's settings exactly once.
    #[instrument(skip(self, ctx), fields(root = %ctx.root().display()))]
    pub fn select(&self, ctx: RepoContext, today: NaiveDate) -> Selection<'_> {
        let variant = self.detect(&ctx);
        let settings = variant.finalize(&ctx, today);
        info!(variant = variant.name(), ?settings, "Selected build variant");
        Selection {
            variant,
            context: ctx.with_settings(settings),
        }
    }
}
