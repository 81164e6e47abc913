use descriptor::RepoContext;
use tracing::{debug, instrument};

use crate::error::ComposeError;
use crate::layer::Layer;
use crate::privilege::Instruction;
use crate::variant::Variant;

pub const POST_BUILD_FILE: &str = "postBuild";

/// Composed, ordered build content of one selected variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub variant: String,
    pub layer: Layer,
}

/// Merge every layer along the variant's chain, ancestors first, then
/// append the repository's post-build hook after all assemble steps.
#[instrument(skip_all, fields(variant = variant.name()))]
pub fn compose(variant: &Variant, ctx: &RepoContext) -> Result<BuildPlan, ComposeError> {
    let mut layer = compose_layer(variant, ctx)?;

    if ctx.has_file(POST_BUILD_FILE) {
        let hook = ctx.binder_path(POST_BUILD_FILE);
        debug!(%hook, "Adding post-build hook");
        layer
            .assemble_scripts
            .push(Instruction::build_user(format!("chmod +x {hook} && ./{hook}")));
    }

    debug!(
        build_scripts = layer.build_scripts.len(),
        assemble_scripts = layer.assemble_scripts.len(),
        files = layer.files.len(),
        "Composed build plan"
    );

    Ok(BuildPlan {
        variant: variant.name().to_string(),
        layer,
    })
}

/// `merge(compose_layer(parent), local(variant))`, without the hook.
pub fn compose_layer(variant: &Variant, ctx: &RepoContext) -> Result<Layer, ComposeError> {
    let inherited = match variant.parent() {
        Some(parent) => compose_layer(parent, ctx)?,
        None => Layer::default(),
    };
    Ok(Layer::merge(inherited, variant.local_layer(ctx)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn parent_layer(_: &RepoContext) -> Result<Layer, ComposeError> {
        Ok(Layer {
            assemble_scripts: vec![Instruction::root("apt-get install vim")],
            ..Default::default()
        })
    }

    fn child_layer(_: &RepoContext) -> Result<Layer, ComposeError> {
        Ok(Layer {
            assemble_scripts: vec![Instruction::build_user("pip install -r requirements.txt")],
            ..Default::default()
        })
    }

    #[test]
    fn post_build_hook_runs_last_as_build_user() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("binder")).unwrap();
        fs::write(dir.path().join("binder/postBuild"), "#!/bin/sh\n").unwrap();
        let ctx = RepoContext::with_descriptor(dir.path(), "/support", None);

        let parent = Variant::root("parent", parent_layer);
        let child = Variant::derive(&parent, "child", child_layer);
        let plan = compose(&child, &ctx).unwrap();

        let scripts = &plan.layer.assemble_scripts;
        assert_eq!(scripts.len(), 3);
        assert_eq!(scripts[0].script, "apt-get install vim");
        assert_eq!(scripts[1].script, "pip install -r requirements.txt");
        assert_eq!(
            scripts[2],
            Instruction::build_user("chmod +x binder/postBuild && ./binder/postBuild")
        );
    }

    #[test]
    fn no_hook_without_post_build_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RepoContext::with_descriptor(dir.path(), "/support", None);
        let plan = compose(&Variant::root("parent", parent_layer), &ctx).unwrap();
        assert_eq!(plan.layer.assemble_scripts.len(), 1);
        assert_eq!(plan.variant, "parent");
    }
}
