use std::path::PathBuf;

use crate::error::{Error, Result};

pub fn run(archive: PathBuf, output: Option<PathBuf>, pool: Option<&rayon::ThreadPool>) -> Result<()> {
    let output = output.unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&output).map_err(|source| Error::CreateDirectory {
        path: output.clone(),
        source,
    })?;

    ardat_format::extract_with_pool(&archive, &output, pool).map_err(|source| Error::Extract {
        path: archive.clone(),
        source,
    })?;

    tracing::info!(archive = %archive.display(), output = %output.display(), "extracted archive");
    Ok(())
}
