use anyhow::{Context, Result};
use buildpacks::{compose, render, BuildManifest, BuildPlan, Registry, Skeleton};
use chrono::NaiveDate;
use descriptor::RepoContext;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub support_dir: PathBuf,
    pub skeleton: Option<PathBuf>,
    pub today: NaiveDate,
}

pub struct Detected {
    pub variant: String,
    pub chain: Vec<String>,
    pub context: RepoContext,
}

pub struct Prepared {
    pub plan: BuildPlan,
    pub manifest: BuildManifest,
}

fn ensure_repo(repo: &Path) -> Result<()> {
    if !repo.is_dir() {
        anyhow::bail!("Repository directory not found: {}", repo.display());
    }
    Ok(())
}

pub fn detect(repo: &Path, options: &PipelineOptions) -> Result<Detected> {
    ensure_repo(repo)?;
    let registry = Registry::builtin();
    let ctx = RepoContext::load(repo, &options.support_dir);
    let selection = registry.select(ctx, options.today);

    Ok(Detected {
        variant: selection.variant.name().to_string(),
        chain: selection
            .variant
            .chain()
            .iter()
            .map(|v| v.name().to_string())
            .collect(),
        context: selection.context,
    })
}

pub fn prepare(repo: &Path, options: &PipelineOptions) -> Result<Prepared> {
    ensure_repo(repo)?;
    let registry = Registry::builtin();
    let ctx = RepoContext::load(repo, &options.support_dir);
    let selection = registry.select(ctx, options.today);

    let plan = compose(selection.variant, &selection.context)
        .with_context(|| format!("Failed to compose build plan for {}", repo.display()))?;

    let skeleton = match &options.skeleton {
        Some(path) => Skeleton::from_path(path)
            .with_context(|| format!("Failed to load skeleton {}", path.display()))?,
        None => Skeleton::default(),
    };
    let manifest = render(&plan, &skeleton).context("Failed to render build manifest")?;

    info!(
        variant = %plan.variant,
        bytes = manifest.as_str().len(),
        "Rendered build manifest"
    );
    Ok(Prepared { plan, manifest })
}

/// Build arguments the plan declares but the caller did not supply.
pub fn missing_build_args<'p>(
    plan: &'p BuildPlan,
    supplied: &[(String, String)],
) -> Vec<&'p str> {
    let mut seen = BTreeSet::new();
    let missing: Vec<&str> = plan
        .layer
        .build_args
        .iter()
        .map(String::as_str)
        .filter(|name| !supplied.iter().any(|(key, _)| key == name))
        .filter(|name| seen.insert(*name))
        .collect();
    if !missing.is_empty() {
        warn!(?missing, "Declared build arguments were not supplied");
    }
    missing
}

pub fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
