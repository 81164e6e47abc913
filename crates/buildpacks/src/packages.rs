//! Untrusted package-list handling.
//!
//! Tokens read from repository files end up interpolated into shell
//! commands, so every token is checked against a strict whitelist before it
//! reaches a script.

use descriptor::RepoContext;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::ComposeError;
use crate::privilege::Instruction;

pub const APT_FILE: &str = "apt.txt";

static PACKAGE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9.+-]+$").expect("valid package regex"));

static SETTING_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid setting regex"));

pub fn is_valid_package(token: &str) -> bool {
    PACKAGE_TOKEN.is_match(token)
}

pub fn validate_package(token: &str, source_file: &str) -> Result<(), ComposeError> {
    if is_valid_package(token) {
        Ok(())
    } else {
        Err(ComposeError::InvalidPackage {
            package: token.to_string(),
            source_file: source_file.to_string(),
        })
    }
}

/// Check a descriptor-supplied value that is spliced into a script, such as
/// a product version.
pub fn validate_setting<'a>(key: &str, value: &'a str) -> Result<&'a str, ComposeError> {
    if SETTING_TOKEN.is_match(value) {
        Ok(value)
    } else {
        Err(ComposeError::InvalidSetting {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// Meaningful lines of a list file: text after `#` dropped, blanks skipped.
pub fn list_entries(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|entry| !entry.is_empty())
}

pub fn parse_package_list(text: &str, source_file: &str) -> Result<Vec<String>, ComposeError> {
    list_entries(text)
        .map(|token| {
            validate_package(token, source_file)?;
            Ok(token.to_string())
        })
        .collect()
}

/// OS-package install step for `apt.txt`, if the file lists anything.
pub fn apt_assemble_instruction(ctx: &RepoContext) -> Result<Option<Instruction>, ComposeError> {
    let Some(text) = ctx
        .read_file(APT_FILE)
        .map_err(|source| ComposeError::Io {
            path: ctx.host_path(APT_FILE),
            source,
        })?
    else {
        return Ok(None);
    };

    let packages = parse_package_list(&text, &ctx.binder_path(APT_FILE))?;
    if packages.is_empty() {
        debug!("apt.txt lists no packages");
        return Ok(None);
    }

    Ok(Some(Instruction::root(format!(
        r#"
        apt-get -qq update && \
        apt-get install --yes --no-install-recommends {} && \
        apt-get -qq purge && \
        apt-get -qq clean && \
        rm -rf /var/lib/apt/lists/*
        "#,
        packages.join(" ")
    ))))
}
