//! Drive one `docker build` invocation and stream its output.
//!
//! [`DockerBuildEngine::build`] materializes the build context, launches the
//! builder as a child process and returns a [`BuildStream`]. A driver task
//! forwards every output line through a bounded channel, so a slow consumer
//! slows the reads. Once the child exits, a non-zero status produces a single
//! terminal [`EventKind::Error`] event carrying the last line read.

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context as TaskContext, Poll};
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub mod config;
pub mod context;

pub use config::{ContainerLimits, EngineConfig};
pub use context::{pack_context, ContextError};

const WORKSPACE_PREFIX: &str = "stackbuild-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Stream,
    Error,
}

/// One element of the build output sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEvent {
    pub kind: EventKind,
    pub text: String,
}

impl BuildEvent {
    pub fn stream(text: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Stream,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            text: text.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == EventKind::Error
    }
}

/// File tree handed to the builder.
#[derive(Debug, Clone)]
pub enum BuildContext {
    Directory(PathBuf),
    /// Tar archive bytes, optionally gzip-compressed.
    Archive(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context: BuildContext,
    pub tag: Option<String>,
    pub dockerfile: Option<String>,
    pub build_args: BTreeMap<String, String>,
    pub cache_from: Vec<String>,
    pub limits: ContainerLimits,
    pub labels: BTreeMap<String, String>,
    pub force_rm: bool,
    pub rm: bool,
    /// Directory the builder runs in; relative context paths resolve here.
    pub working_dir: Option<PathBuf>,
}

impl BuildRequest {
    pub fn new(context: BuildContext) -> Self {
        Self {
            context,
            tag: None,
            dockerfile: None,
            build_args: BTreeMap::new(),
            cache_from: Vec::new(),
            limits: ContainerLimits::default(),
            labels: BTreeMap::new(),
            force_rm: true,
            rm: true,
            working_dir: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to create build workspace: {source}")]
    Workspace {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to extract build context archive: {message}")]
    Extraction { message: String },

    #[error("Failed to launch builder {builder}: {source}")]
    Launch {
        builder: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Workspace { .. } => "DOCKER_BUILD_WORKSPACE_ERROR",
            EngineError::Extraction { .. } => "DOCKER_BUILD_EXTRACTION_FAILED",
            EngineError::Launch { .. } => "DOCKER_BUILD_LAUNCH_FAILED",
        }
    }
}

/// Lazily produced build output. Dropping it cancels the build.
#[derive(Debug)]
pub struct BuildStream {
    events: mpsc::Receiver<BuildEvent>,
    context_dir: PathBuf,
}

impl BuildStream {
    /// Directory passed to the builder as its context argument.
    pub fn context_dir(&self) -> &Path {
        &self.context_dir
    }
}

impl Stream for BuildStream {
    type Item = BuildEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DockerBuildEngine {
    config: EngineConfig,
}

impl DockerBuildEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[instrument(skip(self, request, cancel), fields(builder = %self.config.builder_bin, tag = ?request.tag))]
    pub async fn build(
        &self,
        mut request: BuildRequest,
        cancel: CancellationToken,
    ) -> Result<BuildStream, EngineError> {
        let (context_dir, workspace) =
            materialize(&mut request.context, self.config.workspace_root.as_deref()).await?;

        let args = build_command_args(&request, &context_dir);
        let mut command = Command::new(&self.config.builder_bin);
        command
            .args(&args)
            .env("DOCKER_BUILDKIT", "1")
            .env("PROGRESS_NO_TRUNC", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.working_dir {
            command.current_dir(dir);
        }

        debug!(?args, "Launching builder");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                close_workspace(workspace);
                return Err(EngineError::Launch {
                    builder: self.config.builder_bin.clone(),
                    source,
                });
            }
        };
        info!(pid = ?child.id(), context = %context_dir.display(), "Builder started");

        let capacity = self.config.channel_capacity.max(1);
        let (line_tx, line_rx) = mpsc::channel(capacity);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx));
        }

        let (event_tx, event_rx) = mpsc::channel(capacity);
        tokio::spawn(drive(child, line_rx, event_tx, cancel, workspace));

        Ok(BuildStream {
            events: event_rx,
            context_dir,
        })
    }
}

/// Builder arguments, excluding the binary itself.
pub fn build_command_args(request: &BuildRequest, context_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "--progress".to_string(),
        "plain".to_string(),
    ];

    if let Some(tag) = &request.tag {
        args.extend(["--tag".to_string(), tag.clone()]);
    }
    if let Some(dockerfile) = &request.dockerfile {
        args.extend(["-f".to_string(), dockerfile.clone()]);
    }
    for (key, value) in &request.build_args {
        args.extend(["--build-arg".to_string(), format!("{key}={value}")]);
    }
    if request.force_rm {
        args.push("--force-rm".to_string());
    }
    if request.rm {
        args.push("--rm".to_string());
    }

    let limits = &request.limits;
    for (flag, value) in [
        ("--memory", &limits.memory),
        ("--memory-swap", &limits.memory_swap),
        ("--cpu-shares", &limits.cpu_shares),
        ("--cpuset-cpus", &limits.cpuset_cpus),
    ] {
        if let Some(value) = value {
            args.extend([flag.to_string(), value.clone()]);
        }
    }

    for source in &request.cache_from {
        args.extend(["--cache-from".to_string(), source.clone()]);
    }
    for (key, value) in &request.labels {
        args.extend(["--label".to_string(), format!("{key}={value}")]);
    }

    args.push(context_dir.to_string_lossy().to_string());
    args
}

/// Archive bytes are moved out of `context`, leaving it empty.
async fn materialize(
    context: &mut BuildContext,
    root: Option<&Path>,
) -> Result<(PathBuf, Option<TempDir>), EngineError> {
    match context {
        BuildContext::Directory(path) => Ok((path.clone(), None)),
        BuildContext::Archive(bytes) => {
            let mut builder = tempfile::Builder::new();
            builder.prefix(WORKSPACE_PREFIX);
            let workspace = match root {
                Some(root) => builder.tempdir_in(root),
                None => builder.tempdir(),
            }
            .map_err(|source| EngineError::Workspace { source })?;
            let dest = workspace.path().to_path_buf();
            let bytes = std::mem::take(bytes);

            let extracted = tokio::task::spawn_blocking(move || {
                context::extract_archive(&bytes, &dest)
            })
            .await;

            match extracted {
                Ok(Ok(())) => {
                    debug!(dir = %workspace.path().display(), "Extracted build context");
                    Ok((workspace.path().to_path_buf(), Some(workspace)))
                }
                Ok(Err(err)) => Err(EngineError::Extraction {
                    message: err.to_string(),
                }),
                Err(join_err) => Err(EngineError::Extraction {
                    message: join_err.to_string(),
                }),
            }
        }
    }
}

async fn forward_lines<R>(reader: R, lines: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if lines.send(line).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(error = %err, "Builder output read failed");
                break;
            }
        }
    }
}

enum Outcome {
    Drained,
    Cancelled,
    Abandoned,
}

async fn drive(
    mut child: Child,
    mut lines: mpsc::Receiver<String>,
    events: mpsc::Sender<BuildEvent>,
    cancel: CancellationToken,
    workspace: Option<TempDir>,
) {
    let mut last_line: Option<String> = None;

    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Outcome::Cancelled,
            _ = events.closed() => break Outcome::Abandoned,
            line = lines.recv() => {
                let Some(line) = line else {
                    break Outcome::Drained;
                };
                last_line = Some(line.clone());
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Outcome::Cancelled,
                    sent = events.send(BuildEvent::stream(line)) => {
                        if sent.is_err() {
                            break Outcome::Abandoned;
                        }
                    }
                }
            }
        }
    };

    match outcome {
        Outcome::Drained => {
            let status = child.wait().await;
            close_workspace(workspace);
            match status {
                Ok(status) if status.success() => {
                    info!("Builder finished successfully");
                }
                Ok(status) => {
                    warn!(code = ?status.code(), "Builder exited with failure");
                    let text = last_line.unwrap_or_else(|| exit_description(status));
                    let _ = events.send(BuildEvent::error(text)).await;
                }
                Err(err) => {
                    warn!(error = %err, "Failed to collect builder exit status");
                    let text = last_line.unwrap_or_else(|| err.to_string());
                    let _ = events.send(BuildEvent::error(text)).await;
                }
            }
        }
        Outcome::Cancelled => stop(child, lines, workspace, "cancelled").await,
        Outcome::Abandoned => stop(child, lines, workspace, "stream dropped").await,
    }
}

async fn stop(
    mut child: Child,
    lines: mpsc::Receiver<String>,
    workspace: Option<TempDir>,
    reason: &'static str,
) {
    warn!(reason, "Stopping builder");
    drop(lines);
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "Builder already exited");
    }
    let _ = child.wait().await;
    close_workspace(workspace);
}

fn exit_description(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("builder exited with status {code}"),
        None => "builder terminated by signal".to_string(),
    }
}

fn close_workspace(workspace: Option<TempDir>) {
    if let Some(workspace) = workspace {
        let path = workspace.path().to_path_buf();
        if let Err(err) = workspace.close() {
            warn!(dir = %path.display(), error = %err, "Failed to remove build workspace");
        }
    }
}
