use anyhow::{Context, Result};
use capsules_docker_build::{
    pack_context, BuildContext, BuildRequest, ContainerLimits, DockerBuildEngine,
};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::json;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

mod pipeline;

use pipeline::PipelineOptions;

#[derive(Parser)]
#[command(name = "stackctl", version)]
struct Cli {
    /// Directory holding helper files copied into images
    #[arg(
        long,
        global = true,
        env = "STACKBUILD_SUPPORT_DIR",
        default_value = "support"
    )]
    support_dir: PathBuf,
    /// Dockerfile skeleton replacing the built-in one
    #[arg(long, global = true, env = "STACKBUILD_SKELETON")]
    skeleton: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the variant selected for a repository
    Detect {
        #[arg(value_name = "REPO")]
        repo: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Render the Dockerfile for a repository
    Render {
        #[arg(value_name = "REPO")]
        repo: PathBuf,
        /// Write to FILE instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Render, pack and build an image with the configured builder
    Build {
        #[arg(value_name = "REPO")]
        repo: PathBuf,
        #[arg(long, short = 't')]
        tag: Option<String>,
        #[arg(long = "build-arg", value_name = "KEY=VALUE", value_parser = pipeline::parse_key_val)]
        build_args: Vec<(String, String)>,
        #[arg(long = "cache-from", value_name = "IMAGE")]
        cache_from: Vec<String>,
        #[arg(long)]
        memory: Option<String>,
        /// Print build events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Print version and exit
    Version,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let options = PipelineOptions {
        support_dir: cli.support_dir,
        skeleton: cli.skeleton,
        today: chrono::Local::now().date_naive(),
    };

    match cli.cmd {
        Commands::Detect { repo, json } => {
            let detected = pipeline::detect(&repo, &options)?;
            if json {
                let snapshot = detected
                    .context
                    .settings()
                    .r_snapshot_date
                    .map(|d| d.to_string());
                println!(
                    "{}",
                    json!({
                        "variant": detected.variant,
                        "chain": detected.chain,
                        "rSnapshotDate": snapshot,
                    })
                );
            } else {
                println!("{}", detected.variant);
            }
        }
        Commands::Render { repo, out } => {
            let prepared = pipeline::prepare(&repo, &options)?;
            match out {
                Some(path) => std::fs::write(&path, prepared.manifest.as_str())
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => print!("{}", prepared.manifest),
            }
        }
        Commands::Build {
            repo,
            tag,
            build_args,
            cache_from,
            memory,
            json,
        } => {
            let prepared = pipeline::prepare(&repo, &options)?;
            pipeline::missing_build_args(&prepared.plan, &build_args);
            let archive = pack_context(&prepared.manifest, &prepared.plan, &repo)
                .context("Failed to pack build context")?;

            let mut request = BuildRequest::new(BuildContext::Archive(archive));
            request.tag = tag;
            request.build_args = build_args.into_iter().collect();
            request.cache_from = cache_from;
            request.limits = ContainerLimits {
                memory,
                ..Default::default()
            }
            .or(ContainerLimits::from_env());

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            let engine = DockerBuildEngine::from_env();
            let mut stream = engine
                .build(request, cancel.clone())
                .await
                .map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))?;

            let mut failure = None;
            while let Some(event) = stream.next().await {
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                } else if event.is_error() {
                    eprintln!("error: {}", event.text);
                } else {
                    println!("{}", event.text);
                }
                if event.is_error() {
                    failure = Some(event.text);
                }
            }

            if cancel.is_cancelled() {
                anyhow::bail!("Build cancelled");
            }
            if let Some(text) = failure {
                anyhow::bail!("Build failed: {}", text);
            }
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}
