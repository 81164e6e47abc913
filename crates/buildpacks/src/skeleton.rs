//! Manifest skeleton with `{{ .name }}` placeholders.
//!
//! A placeholder alone on its line stands for a whole section and is
//! replaced by zero or more lines. A placeholder embedded in other text must
//! name a scalar value such as the base image.

use std::fs;
use std::path::Path;
use tracing::{debug, instrument};

use crate::error::RenderError;

/// Section placeholders in the order the built-in skeleton lists them.
pub const SECTIONS: &[&str] = &[
    "build_args",
    "base_packages",
    "build_env",
    "path",
    "build_script_files",
    "build_script_directives",
    "preassemble_script_files",
    "preassemble_script_directives",
    "env",
    "assemble_script_directives",
    "labels",
    "start_script",
    "healthcheck",
    "appendix",
];

pub const SCALARS: &[&str] = &["base_image"];

const DEFAULT_SKELETON: &str = r#"FROM {{ .base_image }}

# Set up user
ARG NB_USER
ARG NB_UID
ENV USER ${NB_USER}
ENV HOME /home/${NB_USER}
{{ .build_args }}

{{ .base_packages }}

EXPOSE 8888

{{ .build_env }}
{{ .path }}

{{ .build_script_files }}

{{ .build_script_directives }}

# Allow target path repo is cloned to be configurable
ARG REPO_DIR=${HOME}
ENV REPO_DIR ${REPO_DIR}
WORKDIR ${REPO_DIR}

ENV PATH ${HOME}/.local/bin:${REPO_DIR}/.local/bin:${PATH}

{{ .preassemble_script_files }}
{{ .preassemble_script_directives }}

USER root
COPY src/ ${REPO_DIR}
RUN chown -R ${NB_USER}:${NB_USER} ${REPO_DIR}

{{ .env }}

{{ .assemble_script_directives }}

{{ .labels }}

{{ .start_script }}

# Containers always run as non-root
USER ${NB_USER}

{{ .healthcheck }}

{{ .appendix }}
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Piece {
    Literal(String),
    Scalar(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SkeletonLine {
    Text(Vec<Piece>),
    Section(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skeleton {
    text: String,
}

impl Default for Skeleton {
    fn default() -> Self {
        Self {
            text: DEFAULT_SKELETON.to_string(),
        }
    }
}

impl Skeleton {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Load a custom skeleton, rejecting unknown placeholders up front.
    #[instrument]
    pub fn from_path(path: &Path) -> Result<Self, RenderError> {
        let text = fs::read_to_string(path).map_err(|e| RenderError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let skeleton = Self::new(text);
        let lines = skeleton.parse()?;
        debug!(lines = lines.len(), "Loaded custom skeleton");
        Ok(skeleton)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub(crate) fn parse(&self) -> Result<Vec<SkeletonLine>, RenderError> {
        self.text
            .lines()
            .enumerate()
            .map(|(index, line)| parse_line(line, index + 1))
            .collect()
    }
}

fn parse_line(line: &str, number: usize) -> Result<SkeletonLine, RenderError> {
    let mut pieces = Vec::new();
    let mut rest = line;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or(RenderError::MalformedPlaceholder { line: number })?;
        let name = placeholder_name(&after[..end], number)?;

        if !rest[..start].is_empty() {
            pieces.push(Piece::Literal(rest[..start].to_string()));
        }
        pieces.push(Piece::Scalar(name));
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest.to_string()));
    }

    // A lone placeholder on its own line may name a section.
    let is_alone = pieces.iter().all(|piece| match piece {
        Piece::Scalar(_) => true,
        Piece::Literal(text) => text.trim().is_empty(),
    }) && pieces.iter().filter(|p| matches!(p, Piece::Scalar(_))).count() == 1;

    for piece in &pieces {
        let Piece::Scalar(name) = piece else {
            continue;
        };
        if is_alone && SECTIONS.contains(&name.as_str()) {
            return Ok(SkeletonLine::Section(name.clone()));
        }
        if !SCALARS.contains(&name.as_str()) {
            return Err(RenderError::UnknownPlaceholder {
                name: name.clone(),
                line: number,
            });
        }
    }

    Ok(SkeletonLine::Text(pieces))
}

fn placeholder_name(inner: &str, line: usize) -> Result<String, RenderError> {
    let name = inner.trim();
    match name.strip_prefix('.') {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(RenderError::UnknownPlaceholder {
            name: name.to_string(),
            line,
        }),
    }
}
