use std::path::{Path, PathBuf};

use ardat_format::ContentEncoding;

use crate::error::{Error, Result};

/// An archive written inside its own source would be picked up by a later run over the same tree.
fn inside(archive: &Path, source: &Path) -> bool {
    let source = match source.canonicalize() {
        Ok(source) => source,
        Err(_) => return false,
    };
    let parent = archive
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parent
        .canonicalize()
        .map(|p| p.starts_with(&source))
        .unwrap_or(false)
}

pub fn run(
    archive: PathBuf,
    source: PathBuf,
    encodings: &[ContentEncoding],
    pool: Option<&rayon::ThreadPool>,
) -> Result<()> {
    if inside(&archive, &source) {
        return Err(Error::ArchiveInsideSource { path: archive });
    }

    ardat_format::archive_encoded(&source, &archive, encodings, pool)
        .map_err(|source| Error::CreateArchive {
            path: archive.clone(),
            source,
        })?;

    tracing::info!(archive = %archive.display(), "created archive");
    Ok(())
}
