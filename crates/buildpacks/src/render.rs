//! Pure rendering of a [`BuildPlan`] into manifest text.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::catalog::HEALTHCHECK_DEST;
use crate::compose::BuildPlan;
use crate::error::RenderError;
use crate::layer::FileManifest;
use crate::packages::is_valid_package;
use crate::privilege::{Instruction, Privilege};
use crate::skeleton::{Piece, Skeleton, SkeletonLine};

/// Directory inside the build context holding copied helper files.
pub const BUILD_SCRIPT_DIR: &str = "build_script_files";

const CONTEXT_HASH_LEN: usize = 8;

/// Rendered manifest text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildManifest(String);

impl BuildManifest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for BuildManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name a host file gets inside the build context.
///
/// The readable prefix is the escaped host path; the hash suffix keeps two
/// paths that escape to the same text apart.
pub fn context_file_name(source: &Path) -> String {
    let raw = source.to_string_lossy();
    let escaped: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '-' })
        .collect();
    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    format!(
        "{}/{}-{}",
        BUILD_SCRIPT_DIR,
        escaped.trim_matches('-'),
        &digest[..CONTEXT_HASH_LEN]
    )
}

/// Strip surrounding blank lines and the common leading indentation.
pub fn dedent(script: &str) -> String {
    let lines: Vec<&str> = script.lines().collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    let (Some(first), Some(last)) = (first, last) else {
        return String::new();
    };
    let body = &lines[first..=last];

    let indent = body
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    body.iter()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// `USER`/`RUN` lines for an instruction block. A marker opens the block
/// and is repeated whenever the privilege differs from the previous step.
pub fn script_directives(instructions: &[Instruction]) -> Vec<String> {
    let mut directives = Vec::new();
    let mut current: Option<Privilege> = None;
    for instruction in instructions {
        if current != Some(instruction.privilege) {
            directives.push(format!("USER {}", instruction.privilege));
            current = Some(instruction.privilege);
        }
        directives.push(format!("RUN {}", dedent(&instruction.script)));
    }
    directives
}

fn env_lines(comment: &str, pairs: &[(String, String)]) -> Vec<String> {
    if pairs.is_empty() {
        return Vec::new();
    }
    std::iter::once(comment.to_string())
        .chain(pairs.iter().map(|(k, v)| format!("ENV {k}={v}")))
        .collect()
}

fn package_block(plan: &BuildPlan) -> Result<Vec<String>, RenderError> {
    let packages = &plan.layer.base_packages;
    if packages.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(bad) = packages.iter().find(|p| !is_valid_package(p)) {
        return Err(RenderError::InvalidPackage {
            package: bad.clone(),
        });
    }

    let mut lines = vec![
        "USER root".to_string(),
        "RUN apt-get -qq update && \\".to_string(),
        "    apt-get -qq install --yes --no-install-recommends \\".to_string(),
    ];
    lines.extend(packages.iter().map(|p| format!("       {p} \\")));
    lines.extend(
        [
            "    > /dev/null && \\",
            "    apt-get -qq purge && \\",
            "    apt-get -qq clean && \\",
            "    rm -rf /var/lib/apt/lists/*",
        ]
        .map(String::from),
    );
    Ok(lines)
}

fn file_copies(files: &FileManifest) -> Vec<String> {
    files
        .sorted_by_source()
        .into_iter()
        .map(|(source, destination)| format!("COPY {} {}", context_file_name(source), destination))
        .collect()
}

fn preassemble_copies(files: &FileManifest) -> Vec<String> {
    files
        .sorted_by_source()
        .into_iter()
        .map(|(source, destination)| {
            format!(
                "COPY --chown=${{NB_USER}}:${{NB_USER}} src/{} ${{REPO_DIR}}/{}",
                source.display(),
                destination
            )
        })
        .collect()
}

fn sections(plan: &BuildPlan) -> Result<BTreeMap<&'static str, Vec<String>>, RenderError> {
    let layer = &plan.layer;
    let mut sections = BTreeMap::new();

    sections.insert(
        "build_args",
        layer.build_args.iter().map(|a| format!("ARG {a}")).collect(),
    );
    sections.insert("base_packages", package_block(plan)?);
    sections.insert(
        "build_env",
        env_lines("# Environment variables required for build", &layer.build_env),
    );
    sections.insert(
        "path",
        if layer.path.is_empty() {
            Vec::new()
        } else {
            vec![format!("ENV PATH {}:${{PATH}}", layer.path.join(":"))]
        },
    );
    sections.insert("build_script_files", file_copies(&layer.files));
    sections.insert(
        "build_script_directives",
        script_directives(&layer.build_scripts),
    );
    sections.insert(
        "preassemble_script_files",
        preassemble_copies(&layer.preassemble_files),
    );
    sections.insert(
        "preassemble_script_directives",
        script_directives(&layer.preassemble_scripts),
    );
    sections.insert("env", env_lines("# The rest of the environment", &layer.env));
    sections.insert(
        "assemble_script_directives",
        script_directives(&layer.assemble_scripts),
    );
    sections.insert(
        "labels",
        layer
            .labels
            .iter()
            .map(|(k, v)| format!("LABEL {}=\"{}\"", k, v.replace('"', "\\\"")))
            .collect(),
    );
    sections.insert(
        "start_script",
        match &layer.start_script {
            Some(script) => vec![
                "USER root".to_string(),
                format!("RUN chmod +x \"{script}\""),
                format!("ENTRYPOINT [\"{script}\"]"),
            ],
            None => Vec::new(),
        },
    );
    sections.insert(
        "healthcheck",
        if layer.files.contains_destination(HEALTHCHECK_DEST) {
            vec![format!(
                "HEALTHCHECK --interval=5s --timeout=15s --start-period=5s CMD python3 {HEALTHCHECK_DEST} 8888"
            )]
        } else {
            Vec::new()
        },
    );
    sections.insert(
        "appendix",
        match &layer.appendix {
            Some(text) => vec!["# Appendix:".to_string(), dedent(text)],
            None => Vec::new(),
        },
    );

    Ok(sections)
}

fn scalar<'p>(plan: &'p BuildPlan, name: &str) -> Result<&'p str, RenderError> {
    let value = match name {
        "base_image" => plan.layer.base_image.as_deref(),
        _ => None,
    };
    value.ok_or_else(|| RenderError::MissingValue {
        name: name.to_string(),
    })
}

/// Render `plan` into `skeleton`. Empty sections drop their placeholder
/// line and runs of blank lines collapse to one.
pub fn render(plan: &BuildPlan, skeleton: &Skeleton) -> Result<BuildManifest, RenderError> {
    let sections = sections(plan)?;
    let mut out: Vec<String> = Vec::new();

    for line in skeleton.parse()? {
        match line {
            SkeletonLine::Section(name) => {
                if let Some(lines) = sections.get(name.as_str()) {
                    out.extend(lines.iter().cloned());
                }
            }
            SkeletonLine::Text(pieces) => {
                let mut text = String::new();
                for piece in pieces {
                    match piece {
                        Piece::Literal(literal) => text.push_str(&literal),
                        Piece::Scalar(name) => text.push_str(scalar(plan, &name)?),
                    }
                }
                out.push(text);
            }
        }
    }

    let mut manifest = String::new();
    let mut previous_blank = true;
    for line in out {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        manifest.push_str(if blank { "" } else { &line });
        manifest.push('\n');
        previous_blank = blank;
    }
    while manifest.ends_with("\n\n") {
        manifest.pop();
    }

    Ok(BuildManifest(manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Layer;

    fn plan(layer: Layer) -> BuildPlan {
        BuildPlan {
            variant: "test".to_string(),
            layer,
        }
    }

    #[test]
    fn dedent_strips_common_indent_and_blank_edges() {
        let script = "\n        apt-get update && \\\n            apt-get install vim\n        ";
        assert_eq!(dedent(script), "apt-get update && \\\n    apt-get install vim");
        assert_eq!(dedent("\n   \n"), "");
    }

    #[test]
    fn privilege_markers_group_consecutive_steps() {
        let directives = script_directives(&[
            Instruction::root("a"),
            Instruction::root("b"),
            Instruction::build_user("c"),
            Instruction::root("d"),
        ]);
        assert_eq!(
            directives,
            vec![
                "USER root",
                "RUN a",
                "RUN b",
                "USER ${NB_USER}",
                "RUN c",
                "USER root",
                "RUN d"
            ]
        );
    }

    #[test]
    fn context_file_names_are_stable_and_distinct() {
        let a = context_file_name(Path::new("/support/base/healthcheck.py"));
        let b = context_file_name(Path::new("/support/base-healthcheck.py"));
        assert!(a.starts_with("build_script_files/support-base-healthcheck.py-"));
        assert_eq!(a, context_file_name(Path::new("/support/base/healthcheck.py")));
        assert_ne!(a, b);
    }

    #[test]
    fn missing_base_image_is_an_error() {
        let err = render(&plan(Layer::default()), &Skeleton::default()).unwrap_err();
        assert_eq!(
            err,
            RenderError::MissingValue {
                name: "base_image".into()
            }
        );
    }

    #[test]
    fn empty_sections_leave_no_trace() {
        let manifest = render(
            &plan(Layer {
                base_image: Some("scratch".into()),
                ..Default::default()
            }),
            &Skeleton::new("FROM {{ .base_image }}\n\n{{ .env }}\n\n{{ .labels }}\n\nUSER x\n"),
        )
        .unwrap();
        assert_eq!(manifest.as_str(), "FROM scratch\n\nUSER x\n");
    }

    #[test]
    fn invalid_base_package_fails_render() {
        let mut layer = Layer {
            base_image: Some("scratch".into()),
            ..Default::default()
        };
        layer.base_packages.insert("vim; id".into());
        let err = render(&plan(layer), &Skeleton::default()).unwrap_err();
        assert!(matches!(err, RenderError::InvalidPackage { .. }));
    }
}
