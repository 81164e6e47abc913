//! Build context archives.

use buildpacks::render::context_file_name;
use buildpacks::{BuildManifest, BuildPlan};
use flate2::read::GzDecoder;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};
use thiserror::Error;
use tracing::{debug, instrument};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Build file {path} could not be added: {source}")]
    MissingFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Repository {path} could not be archived: {source}")]
    Repository {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write build context archive: {0}")]
    Archive(#[from] io::Error),
}

/// Tar archive with `Dockerfile`, every helper file under its context
/// name and the repository under `src/`.
#[instrument(skip(manifest, plan), fields(variant = %plan.variant))]
pub fn pack_context(
    manifest: &BuildManifest,
    plan: &BuildPlan,
    repo_root: &Path,
) -> Result<Vec<u8>, ContextError> {
    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let dockerfile = manifest.as_str().as_bytes();
    let mut header = Header::new_gnu();
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, "Dockerfile", dockerfile)?;

    for (source, _) in plan.layer.files.sorted_by_source() {
        builder
            .append_path_with_name(source, context_file_name(source))
            .map_err(|source_err| ContextError::MissingFile {
                path: source.to_path_buf(),
                source: source_err,
            })?;
    }

    builder
        .append_dir_all("src", repo_root)
        .map_err(|source| ContextError::Repository {
            path: repo_root.to_path_buf(),
            source,
        })?;

    let bytes = builder.into_inner()?;
    debug!(bytes = bytes.len(), files = plan.layer.files.len(), "Packed build context");
    Ok(bytes)
}

pub(crate) fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Unpack a plain or gzip tar archive into `dest`.
pub(crate) fn extract_archive(bytes: &[u8], dest: &Path) -> io::Result<()> {
    let reader: Box<dyn Read + '_> = if is_gzip(bytes) {
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(Cursor::new(bytes))
    };
    Archive::new(reader).unpack(dest)
}
