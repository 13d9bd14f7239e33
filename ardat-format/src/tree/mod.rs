//! Entity trees, and the builders and writers that move them between the filesystem and archives.

pub mod builder;
pub mod writer;

use std::sync::OnceLock;

use crate::entity::ArchiveEntity;
use crate::error::{Error, Result};

pub use self::builder::{ArchiveTreeBuilder, FsTreeBuilder, TreeBuilder};
pub use self::writer::{ArchiveTreeWriter, FsTreeWriter, TreeWriter};

/// Holds the root of a built tree. The root can be assigned once.
#[derive(Debug, Default)]
pub struct TreeRoot {
    root: OnceLock<ArchiveEntity>,
}

impl TreeRoot {
    pub fn new() -> TreeRoot {
        TreeRoot::default()
    }

    pub fn set(&self, root: ArchiveEntity) -> Result<()> {
        self.root.set(root).map_err(|_| Error::RootAlreadySet)
    }

    #[inline(always)]
    pub fn get(&self) -> Option<&ArchiveEntity> {
        self.root.get()
    }

    pub fn root(&self) -> Result<&ArchiveEntity> {
        self.get().ok_or(Error::EmptyTree)
    }

    /// Every entity, parents before children and children in stored order.
    pub fn depth_first(&self) -> Result<Vec<ArchiveEntity>> {
        Ok(depth_first(self.root()?))
    }

    /// Finds the entity at a `/`-separated relative path, starting with the root's name.
    pub fn find(&self, path: &str) -> Option<ArchiveEntity> {
        let mut components = path.split('/');
        let root = self.get()?;
        if components.next()? != root.name() {
            return None;
        }

        let mut current = root.clone();
        for name in components {
            current = current.children().into_iter().find(|c| c.name() == name)?;
        }
        Some(current)
    }

    /// Releases every content view held by the tree.
    pub fn close(&self) {
        if let Some(root) = self.get() {
            root.close();
        }
    }
}

pub(crate) fn depth_first(root: &ArchiveEntity) -> Vec<ArchiveEntity> {
    let mut order = Vec::new();
    let mut pending = vec![root.clone()];
    while let Some(entity) = pending.pop() {
        pending.extend(entity.children().into_iter().rev());
        order.push(entity);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Metadata;

    fn dir(name: &str) -> ArchiveEntity {
        ArchiveEntity::directory(name, Metadata::default()).unwrap()
    }

    #[test]
    fn root_is_set_once() {
        let tree = TreeRoot::new();
        assert!(matches!(tree.root(), Err(Error::EmptyTree)));
        tree.set(dir("a")).unwrap();
        assert!(matches!(tree.set(dir("b")), Err(Error::RootAlreadySet)));
        assert_eq!(tree.root().unwrap().name(), "a");
    }

    #[test]
    fn pre_order() {
        let a = dir("a");
        let b = dir("b");
        let c = dir("c");
        let d = dir("d");
        b.add_children(vec![d]).unwrap();
        a.add_children(vec![b, c]).unwrap();

        let tree = TreeRoot::new();
        tree.set(a).unwrap();
        let names: Vec<_> = tree
            .depth_first()
            .unwrap()
            .iter()
            .map(|e| e.relative_path().to_string())
            .collect();
        assert_eq!(names, ["a", "a/b", "a/b/d", "a/c"]);
        assert_eq!(tree.find("a/b/d").unwrap().name(), "d");
        assert!(tree.find("a/x").is_none());
        assert!(tree.find("b").is_none());
    }
}
