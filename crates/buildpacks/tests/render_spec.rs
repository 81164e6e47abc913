use buildpacks::{
    compose, render, BuildPlan, FileManifest, Instruction, Layer, Registry, Skeleton,
};
use chrono::NaiveDate;
use descriptor::RepoContext;
use std::fs;
use tempfile::TempDir;

fn plan(layer: Layer) -> BuildPlan {
    BuildPlan {
        variant: "custom".to_string(),
        layer: Layer {
            base_image: Some("buildpack-deps:bionic".to_string()),
            ..layer
        },
    }
}

fn user_markers(manifest: &str) -> Vec<&str> {
    manifest.lines().filter(|l| l.starts_with("USER ")).collect()
}

#[test]
fn privilege_switches_render_three_markers() {
    let plan = plan(Layer {
        assemble_scripts: vec![
            Instruction::root("a"),
            Instruction::root("b"),
            Instruction::build_user("c"),
            Instruction::root("d"),
        ],
        ..Default::default()
    });
    let skeleton = Skeleton::new("{{ .assemble_script_directives }}\n");

    let manifest = render(&plan, &skeleton).unwrap();
    assert_eq!(
        manifest.as_str(),
        "USER root\nRUN a\nRUN b\nUSER ${NB_USER}\nRUN c\nUSER root\nRUN d\n"
    );
    assert_eq!(
        user_markers(manifest.as_str()),
        vec!["USER root", "USER ${NB_USER}", "USER root"]
    );
}

#[test]
fn sections_follow_skeleton_order() {
    let mut layer = Layer {
        build_args: vec!["LICENSE_KEY".into()],
        build_env: vec![("APP_PORT".into(), "8888".into())],
        path: vec!["/opt/tool/bin".into()],
        files: FileManifest::new().with("/support/tool.sh", "/usr/local/bin/tool.sh"),
        build_scripts: vec![Instruction::root("install-tool")],
        env: vec![("MODE".into(), "batch".into())],
        assemble_scripts: vec![Instruction::build_user("configure-tool")],
        start_script: Some("/start.sh".into()),
        appendix: Some("RUN echo appendix".into()),
        ..Default::default()
    };
    layer.base_packages.insert("curl".into());
    layer.labels.insert("maintainer".into(), "tools".into());

    let manifest = render(&plan(layer), &Skeleton::default()).unwrap();
    let text = manifest.as_str();

    let order = [
        "FROM buildpack-deps:bionic",
        "ARG LICENSE_KEY",
        "       curl \\",
        "ENV APP_PORT=8888",
        "ENV PATH /opt/tool/bin:${PATH}",
        "COPY build_script_files/support-tool.sh-",
        "RUN install-tool",
        "COPY src/ ${REPO_DIR}",
        "ENV MODE=batch",
        "RUN configure-tool",
        "LABEL maintainer=\"tools\"",
        "ENTRYPOINT [\"/start.sh\"]",
        "USER ${NB_USER}",
        "RUN echo appendix",
    ];
    let mut cursor = 0;
    for needle in order {
        let found = text[cursor..]
            .find(needle)
            .unwrap_or_else(|| panic!("{needle:?} missing or out of order in:\n{text}"));
        cursor += found + needle.len();
    }
    assert!(!text.contains("{{"));
    assert!(!text.contains("HEALTHCHECK"));
}

#[test]
fn file_copies_are_sorted_by_source() {
    let layer = Layer {
        files: FileManifest::new()
            .with("/support/zeta.py", "/a.py")
            .with("/support/alpha.py", "/z.py"),
        ..Default::default()
    };
    let manifest = render(&plan(layer), &Skeleton::new("{{ .build_script_files }}\n")).unwrap();
    let lines: Vec<&str> = manifest.as_str().lines().collect();

    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("COPY build_script_files/support-alpha.py-"));
    assert!(lines[0].ends_with(" /z.py"));
    assert!(lines[1].starts_with("COPY build_script_files/support-zeta.py-"));
}

#[test]
fn unknown_placeholder_fails_render() {
    let skeleton = Skeleton::new("FROM {{ .base_image }}\n{{ .volumes }}\n");
    assert!(render(&plan(Layer::default()), &skeleton).is_err());
}

#[test]
fn rendering_is_byte_identical_across_calls() {
    let repo = TempDir::new().unwrap();
    fs::create_dir(repo.path().join(".wholetale")).unwrap();
    fs::write(
        repo.path().join(".wholetale/environment.json"),
        r#"{"config": {"buildpack": "RBuildPack"}}"#,
    )
    .unwrap();
    fs::write(repo.path().join(".wholetale/apt.txt"), "libgdal-dev\n").unwrap();
    fs::write(repo.path().join(".wholetale/install.R"), "install.packages('sf')\n").unwrap();

    let registry = Registry::builtin();
    let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
    let skeleton = Skeleton::default();

    let first = {
        let selection = registry.select(RepoContext::load(repo.path(), "/support"), today);
        let plan = compose(selection.variant, &selection.context).unwrap();
        render(&plan, &skeleton).unwrap()
    };
    let second = {
        let selection = registry.select(RepoContext::load(repo.path(), "/support"), today);
        let plan = compose(selection.variant, &selection.context).unwrap();
        render(&plan, &skeleton).unwrap()
    };

    assert_eq!(first, second);
    let text = first.as_str();
    assert!(text.contains("HEALTHCHECK"));
    assert!(text.contains("RUN Rscript .wholetale/install.R"));
    assert!(text.contains("ENV R_SNAPSHOT_DATE=2026-09-30"));
}
