use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Invalid package name '{package}' in {source_file}")]
    InvalidPackage {
        package: String,
        source_file: String,
    },

    #[error("Invalid value '{value}' for {key}")]
    InvalidSetting { key: String, value: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RenderError {
    #[error("Unknown placeholder '{name}' on skeleton line {line}")]
    UnknownPlaceholder { name: String, line: usize },

    #[error("Placeholder '{name}' has no value in this plan")]
    MissingValue { name: String },

    #[error("Unterminated placeholder on skeleton line {line}")]
    MalformedPlaceholder { line: usize },

    #[error("Invalid base package name '{package}'")]
    InvalidPackage { package: String },

    #[error("Failed to load skeleton {path}: {message}")]
    Load { path: String, message: String },
}
