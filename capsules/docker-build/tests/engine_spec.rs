#![cfg(unix)]

use capsules_docker_build::{
    BuildContext, BuildEvent, BuildRequest, DockerBuildEngine, EngineConfig, EngineError,
    EventKind,
};
use futures_util::StreamExt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Engine whose "builder" is `sh`, running the `build` script found in the
/// request's working directory with the usual builder arguments.
fn fake_builder(script: &str) -> (DockerBuildEngine, TempDir) {
    let workdir = TempDir::new().unwrap();
    fs::write(workdir.path().join("build"), script).unwrap();
    let engine = DockerBuildEngine::new(EngineConfig {
        builder_bin: "sh".to_string(),
        channel_capacity: 4,
        workspace_root: None,
    });
    (engine, workdir)
}

fn request_in(workdir: &Path, context: BuildContext) -> BuildRequest {
    let mut request = BuildRequest::new(context);
    request.working_dir = Some(workdir.to_path_buf());
    request.tag = Some("stackbuild/test:latest".to_string());
    request
}

fn archive_with(name: &str, contents: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, name, contents.as_bytes())
        .unwrap();
    builder.into_inner().unwrap()
}

async fn collect(stream: capsules_docker_build::BuildStream) -> Vec<BuildEvent> {
    tokio::time::timeout(Duration::from_secs(20), stream.collect::<Vec<_>>())
        .await
        .expect("build stream did not finish")
}

#[tokio::test]
async fn successful_build_yields_no_error_events() {
    let (engine, workdir) = fake_builder(
        "echo \"step 1\"\necho \"step 2\" >&2\necho \"buildkit=$DOCKER_BUILDKIT notrunc=$PROGRESS_NO_TRUNC\"\nexit 0\n",
    );
    let context = TempDir::new().unwrap();
    let request = request_in(
        workdir.path(),
        BuildContext::Directory(context.path().to_path_buf()),
    );

    let stream = engine.build(request, CancellationToken::new()).await.unwrap();
    assert_eq!(stream.context_dir(), context.path());
    let events = collect(stream).await;

    assert!(events.iter().all(|e| e.kind == EventKind::Stream));
    let texts: Vec<&str> = events.iter().map(|e| e.text.as_str()).collect();
    assert!(texts.contains(&"step 1"));
    assert!(texts.contains(&"step 2"));
    assert!(texts.contains(&"buildkit=1 notrunc=1"));
}

#[tokio::test]
async fn failing_build_ends_with_error_and_removes_workspace() {
    let (engine, workdir) = fake_builder(
        "for last; do :; done\ncat \"$last/hello.txt\"\necho \"error: step failed\"\nexit 1\n",
    );
    let request = request_in(
        workdir.path(),
        BuildContext::Archive(archive_with("hello.txt", "hello from context\n")),
    );

    let stream = engine.build(request, CancellationToken::new()).await.unwrap();
    let context_dir = stream.context_dir().to_path_buf();
    assert!(context_dir.exists());

    let events = collect(stream).await;

    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::Stream && e.text == "hello from context"));
    let last = events.last().unwrap();
    assert_eq!(last, &BuildEvent::error("error: step failed"));
    assert_eq!(events.iter().filter(|e| e.is_error()).count(), 1);
    assert!(!context_dir.exists());
}

#[tokio::test]
async fn successful_archive_build_removes_workspace() {
    let (engine, workdir) = fake_builder("echo done\n");
    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    std::io::Write::write_all(&mut gz, &archive_with("Dockerfile", "FROM scratch\n")).unwrap();
    let request = request_in(workdir.path(), BuildContext::Archive(gz.finish().unwrap()));

    let stream = engine.build(request, CancellationToken::new()).await.unwrap();
    let context_dir = stream.context_dir().to_path_buf();
    assert!(context_dir.join("Dockerfile").exists());

    let events = collect(stream).await;
    assert_eq!(events, vec![BuildEvent::stream("done")]);
    assert!(!context_dir.exists());
}

#[tokio::test]
async fn cancellation_stops_builder_without_terminal_event() {
    let (engine, workdir) = fake_builder("echo started\nexec sleep 30\n");
    let request = request_in(
        workdir.path(),
        BuildContext::Archive(archive_with("a.txt", "a")),
    );
    let cancel = CancellationToken::new();

    let mut stream = engine.build(request, cancel.clone()).await.unwrap();
    let context_dir = stream.context_dir().to_path_buf();

    let first = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .unwrap();
    assert_eq!(first, Some(BuildEvent::stream("started")));

    cancel.cancel();
    let rest = collect(stream).await;
    assert!(rest.iter().all(|e| !e.is_error()));
    assert!(!context_dir.exists());
}

#[tokio::test]
async fn missing_builder_is_a_launch_failure() {
    let engine = DockerBuildEngine::new(EngineConfig {
        builder_bin: "/nonexistent/stackbuild-docker".to_string(),
        channel_capacity: 4,
        workspace_root: None,
    });
    let context = TempDir::new().unwrap();
    let request = BuildRequest::new(BuildContext::Directory(context.path().to_path_buf()));

    let err = engine
        .build(request, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Launch { .. }));
    assert_eq!(err.code(), "DOCKER_BUILD_LAUNCH_FAILED");
}

#[tokio::test]
async fn launch_failure_removes_extracted_workspace() {
    let root = TempDir::new().unwrap();
    let engine = DockerBuildEngine::new(EngineConfig {
        builder_bin: "/nonexistent/stackbuild-docker".to_string(),
        channel_capacity: 4,
        workspace_root: Some(root.path().to_path_buf()),
    });
    let request = BuildRequest::new(BuildContext::Archive(archive_with("a.txt", "a")));

    let err = engine
        .build(request, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Launch { .. }));
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}

fn process_alive(pid: &str) -> bool {
    std::process::Command::new("kill")
        .args(["-0", pid])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn dropping_stream_kills_builder_and_removes_workspace() {
    let (engine, workdir) = fake_builder("echo $$ > pid\necho started\nexec sleep 30\n");
    let request = request_in(
        workdir.path(),
        BuildContext::Archive(archive_with("a.txt", "a")),
    );

    let mut stream = engine
        .build(request, CancellationToken::new())
        .await
        .unwrap();
    let context_dir = stream.context_dir().to_path_buf();

    let first = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .unwrap();
    assert_eq!(first, Some(BuildEvent::stream("started")));
    let pid = fs::read_to_string(workdir.path().join("pid")).unwrap();
    let pid = pid.trim().to_string();
    assert!(process_alive(&pid));

    drop(stream);

    let stopped = tokio::time::timeout(Duration::from_secs(10), async {
        while context_dir.exists() || process_alive(&pid) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(stopped.is_ok(), "builder or workspace outlived the stream");
}

#[tokio::test]
async fn malformed_archive_fails_before_launch() {
    let (engine, workdir) = fake_builder("touch launched\n");
    let request = request_in(workdir.path(), BuildContext::Archive(vec![b'A'; 1024]));

    let err = engine
        .build(request, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Extraction { .. }));
    assert!(!workdir.path().join("launched").exists());
}
