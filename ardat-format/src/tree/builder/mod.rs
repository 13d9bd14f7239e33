mod archive;
mod fs;

use std::collections::VecDeque;

pub use self::archive::ArchiveTreeBuilder;
pub use self::fs::FsTreeBuilder;
use super::TreeRoot;
use crate::entity::ArchiveEntity;
use crate::error::Result;

/// Reconstructs an entity tree from some source.
///
/// Implementors provide the root and, for any directory entity, its children. [`build`] drives the
/// walk.
///
/// [`build`]: TreeBuilder::build
pub trait TreeBuilder {
    fn root(&mut self) -> Result<ArchiveEntity>;

    fn children(&mut self, entity: &ArchiveEntity) -> Result<Vec<ArchiveEntity>>;

    /// Walks the source breadth-first, linking every entity to its parent.
    ///
    /// On failure the partial tree is closed and dropped, and the error carries the relative path
    /// of the entity being expanded.
    fn build(&mut self) -> Result<TreeRoot> {
        let root = self.root()?;
        let mut queue = VecDeque::from([root.clone()]);
        let mut count = 0usize;

        while let Some(entity) = queue.pop_front() {
            count += 1;
            if !entity.is_directory() {
                continue;
            }

            let linked = self.children(&entity).and_then(|children| {
                entity.add_children(children.clone())?;
                Ok(children)
            });
            match linked {
                Ok(children) => queue.extend(children),
                Err(e) => {
                    root.close();
                    return Err(e.within(entity.relative_path()));
                }
            }
        }

        tracing::info!(root = %root.name(), entities = count, "built tree");
        let tree = TreeRoot::new();
        tree.set(root)?;
        Ok(tree)
    }
}
