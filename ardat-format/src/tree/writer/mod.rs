mod archive;
mod fs;

use rayon::prelude::*;

pub use self::archive::ArchiveTreeWriter;
pub use self::fs::FsTreeWriter;
use super::TreeRoot;
use crate::entity::ArchiveEntity;
use crate::error::Result;

const COPY_BUFFER: usize = 64 * 1024;

/// Serializes an entity tree to some destination.
///
/// [`begin`](TreeWriter::begin) sees the whole traversal order up front, so writers that need a
/// layout can compute it before any entity is written. `write_archive_entity` takes `&self` and may
/// be called from several threads at once for entities whose parents were already written.
pub trait TreeWriter: Sync {
    fn begin(&mut self, order: &[ArchiveEntity]) -> Result<()>;

    fn write_archive_entity(&self, entity: &ArchiveEntity) -> Result<()>;

    fn finish(&mut self) -> Result<()>;

    /// Writes the tree in depth-first pre-order on the calling thread.
    fn write(&mut self, tree: &TreeRoot) -> Result<()> {
        let order = tree.depth_first()?;
        self.begin(&order)?;
        for entity in &order {
            self.write_archive_entity(entity)
                .map_err(|e| e.within(entity.relative_path()))?;
        }
        self.finish()?;

        tracing::info!(entities = order.len(), "wrote tree");
        Ok(())
    }

    /// Writes each entity before its children, dispatching siblings onto `pool`. Nothing new is
    /// dispatched once an entity has failed.
    fn write_with_pool(&mut self, tree: &TreeRoot, pool: &rayon::ThreadPool) -> Result<()> {
        let order = tree.depth_first()?;
        self.begin(&order)?;

        let root = tree.root()?;
        let writer: &Self = &*self;
        pool.install(|| write_subtree(writer, root))?;
        self.finish()?;

        tracing::info!(entities = order.len(), threads = pool.current_num_threads(), "wrote tree");
        Ok(())
    }
}

fn write_subtree<W: TreeWriter + ?Sized>(writer: &W, entity: &ArchiveEntity) -> Result<()> {
    writer
        .write_archive_entity(entity)
        .map_err(|e| e.within(entity.relative_path()))?;
    entity
        .children()
        .par_iter()
        .try_for_each(|child| write_subtree(writer, child))
}

/// Streams the content of a file entity into `sink` from its first byte, up to `limit` bytes if
/// given. The content view is released afterwards whatever the outcome.
pub(crate) fn copy_content<F>(entity: &ArchiveEntity, limit: Option<u64>, mut sink: F) -> Result<u64>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let result: Result<u64> = (|| {
        entity.open()?;
        entity.rewind()?;

        let mut buf = vec![0u8; COPY_BUFFER];
        let mut copied = 0u64;
        loop {
            let want = match limit {
                Some(limit) if copied >= limit => break,
                Some(limit) => std::cmp::min(buf.len() as u64, limit - copied) as usize,
                None => buf.len(),
            };
            let n = entity.get_content(&mut buf[..want])?;
            if n == 0 {
                if let Some(limit) = limit {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("content ended after {} of {} bytes", copied, limit),
                    )
                    .into());
                }
                break;
            }
            sink(&buf[..n])?;
            copied += n as u64;
        }
        Ok(copied)
    })();

    entity.release_content();
    result
}
