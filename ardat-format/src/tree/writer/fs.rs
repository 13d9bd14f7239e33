use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::{copy_content, TreeWriter};
use crate::channel::ChannelFactory;
use crate::entity::ArchiveEntity;
use crate::error::{Error, Result};
use crate::fs::apply_properties;
use crate::meta::Metadata;

/// Materializes a tree under an existing directory.
///
/// File attributes are applied as soon as the file is written. Directory attributes wait for
/// [`finish`](TreeWriter::finish), deepest first, since creating children would disturb the
/// timestamps and a read-only mode would forbid it.
#[derive(Debug)]
pub struct FsTreeWriter {
    destination: PathBuf,
    factory: ChannelFactory,
    strict_attributes: bool,
    deferred: Mutex<Vec<(usize, PathBuf, Metadata)>>,
}

impl FsTreeWriter {
    pub fn new<P: AsRef<Path>>(destination: P) -> FsTreeWriter {
        FsTreeWriter {
            destination: destination.as_ref().to_path_buf(),
            factory: ChannelFactory::new(),
            strict_attributes: false,
            deferred: Mutex::new(Vec::new()),
        }
    }

    pub fn with_factory(mut self, factory: ChannelFactory) -> FsTreeWriter {
        self.factory = factory;
        self
    }

    /// Fail on attributes that can't be applied, instead of logging them.
    pub fn strict_attributes(mut self, strict: bool) -> FsTreeWriter {
        self.strict_attributes = strict;
        self
    }

    fn apply(&self, path: &Path, properties: &Metadata) -> Result<()> {
        match apply_properties(path, properties) {
            Err(e) if !self.strict_attributes => {
                tracing::warn!(path = %path.display(), error = %e, "could not restore attributes");
                Ok(())
            }
            result => result,
        }
    }
}

impl TreeWriter for FsTreeWriter {
    fn begin(&mut self, order: &[ArchiveEntity]) -> Result<()> {
        let meta = std::fs::metadata(&self.destination)?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory(self.destination.display().to_string()));
        }
        self.deferred
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        tracing::debug!(destination = %self.destination.display(), entities = order.len(), "extracting");
        Ok(())
    }

    fn write_archive_entity(&self, entity: &ArchiveEntity) -> Result<()> {
        let relative = entity.relative_path();
        let target = self.destination.join(relative.to_path_buf());

        if entity.is_directory() {
            std::fs::create_dir(&target)?;
            self.deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((relative.depth(), target, entity.metadata()));
            return Ok(());
        }

        let mut out = self.factory.create(&target)?;
        let copied = copy_content(entity, None, |chunk| out.write(chunk).map(|_| ()))?;
        out.flush()?;
        out.close();
        tracing::debug!(path = %relative, bytes = copied, "extracted file");

        self.apply(&target, &entity.metadata())
    }

    fn finish(&mut self) -> Result<()> {
        let mut deferred = std::mem::take(
            self.deferred
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        deferred.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, path, properties) in &deferred {
            self.apply(path, properties)?;
        }
        Ok(())
    }
}
