//! The in-memory entity tree shared by builders and writers.

mod content;
mod encoding;
mod factory;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

pub use self::content::ContentSource;
pub use self::encoding::{ContentEncoding, ENCODING_KEY};
pub use self::factory::ArchiveEntityFactory;
use crate::error::{Error, Result};
use crate::meta::{ArchiveEntityProperty, Metadata};
use crate::path::{validate_component, ArchivePath, PATH_ARCHIVE_SEP};

#[derive(Debug)]
enum EntityKind {
    File(Mutex<ContentSource>),
    Directory(RwLock<Vec<ArchiveEntity>>),
}

#[derive(Debug)]
struct EntityNode {
    name: String,
    parent: Mutex<Weak<EntityNode>>,
    properties: RwLock<Vec<ArchiveEntityProperty>>,
    kind: EntityKind,
}

/// A file or directory in an archive tree.
///
/// This is a cheap handle: clones refer to the same node. A directory owns its children; each
/// child only holds a weak reference back to its parent, so dropping the root drops the tree.
#[derive(Debug, Clone)]
pub struct ArchiveEntity(Arc<EntityNode>);

impl PartialEq for ArchiveEntity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ArchiveEntity {}

impl ArchiveEntity {
    pub fn file<S: Into<String>>(name: S, properties: Metadata, content: ContentSource) -> Result<ArchiveEntity> {
        ArchiveEntity::new(name.into(), properties, EntityKind::File(Mutex::new(content)))
    }

    pub fn directory<S: Into<String>>(name: S, properties: Metadata) -> Result<ArchiveEntity> {
        ArchiveEntity::new(
            name.into(),
            properties,
            EntityKind::Directory(RwLock::new(Vec::new())),
        )
    }

    fn new(name: String, properties: Metadata, kind: EntityKind) -> Result<ArchiveEntity> {
        validate_component(&name).map_err(|_| Error::InvalidName(name.clone()))?;
        Ok(ArchiveEntity(Arc::new(EntityNode {
            name,
            parent: Mutex::new(Weak::new()),
            properties: RwLock::new(properties.properties().to_vec()),
            kind,
        })))
    }

    /// Identity of the node, stable while any handle to it is alive.
    #[inline(always)]
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<ArchiveEntity> {
        lock(&self.0.parent).upgrade().map(ArchiveEntity)
    }

    /// Names from the root down to this entity.
    pub fn relative_path(&self) -> ArchivePath {
        let mut names = vec![self.name().to_string()];
        let mut current = self.parent();
        while let Some(entity) = current {
            names.push(entity.name().to_string());
            current = entity.parent();
        }
        names.reverse();
        ArchivePath(names.join(PATH_ARCHIVE_SEP))
    }

    /// Children in stored order. Files have none.
    pub fn children(&self) -> Vec<ArchiveEntity> {
        match &self.0.kind {
            EntityKind::Directory(children) => read(children).clone(),
            EntityKind::File(_) => Vec::new(),
        }
    }

    pub fn properties(&self) -> Vec<ArchiveEntityProperty> {
        read(&self.0.properties).clone()
    }

    pub fn get_property(&self, key: &str) -> Option<String> {
        read(&self.0.properties)
            .iter()
            .find(|p| p.key() == key)
            .map(|p| p.value().to_string())
    }

    /// Sets `key`, replacing the value in place when the key is already present.
    pub fn set_property<K: Into<String>, V: Into<String>>(&self, key: K, value: V) -> Result<()> {
        let key = key.into();
        let value = value.into();
        let property = ArchiveEntityProperty::new(key.clone(), value.clone())
            .map_err(|_| Error::InvalidProperty { key, value })?;

        let mut properties = write(&self.0.properties);
        match properties.iter_mut().find(|p| p.key() == property.key()) {
            Some(existing) => *existing = property,
            None => properties.push(property),
        }
        Ok(())
    }

    pub fn metadata(&self) -> Metadata {
        Metadata::from_properties(read(&self.0.properties).clone())
    }

    /// Attaches `entities` to this directory, in order.
    ///
    /// The batch is validated as a whole before anything is attached: names must be unique among
    /// the siblings, no entity may already have a parent, and none may be this entity or one of its
    /// ancestors.
    pub fn add_children(&self, entities: Vec<ArchiveEntity>) -> Result<()> {
        let mut children = match &self.0.kind {
            EntityKind::Directory(children) => write(children),
            EntityKind::File(_) => return Err(Error::NotADirectory(self.name().to_string())),
        };

        let mut names: std::collections::HashSet<&str> =
            children.iter().map(ArchiveEntity::name).collect();
        for entity in &entities {
            if !names.insert(entity.name()) {
                return Err(Error::DuplicateEntity(entity.name().to_string()));
            }
        }

        let mut ancestor = Some(self.clone());
        while let Some(current) = ancestor {
            if let Some(entity) = entities.iter().find(|e| **e == current) {
                return Err(Error::InvalidHierarchy(entity.name().to_string()));
            }
            ancestor = current.parent();
        }

        // Lock in address order so two racing batches can't deadlock on each other.
        let mut ordered: Vec<&ArchiveEntity> = entities.iter().collect();
        ordered.sort_by_key(|e| e.id());
        let mut parents: Vec<MutexGuard<'_, Weak<EntityNode>>> =
            ordered.iter().map(|e| lock(&e.0.parent)).collect();
        if let Some(index) = parents.iter().position(|p| p.strong_count() > 0) {
            return Err(Error::InvalidHierarchy(ordered[index].name().to_string()));
        }

        for parent in parents.iter_mut() {
            **parent = Arc::downgrade(&self.0);
        }
        drop(parents);
        children.extend(entities);
        Ok(())
    }

    /// Detaches `entity` from this directory. Returns whether it was a child.
    pub fn remove_child(&self, entity: &ArchiveEntity) -> bool {
        let mut children = match &self.0.kind {
            EntityKind::Directory(children) => write(children),
            EntityKind::File(_) => return false,
        };

        match children.iter().position(|c| c == entity) {
            Some(index) => {
                let child = children.remove(index);
                *lock(&child.0.parent) = Weak::new();
                true
            }
            None => false,
        }
    }

    #[inline(always)]
    pub fn is_file(&self) -> bool {
        matches!(self.0.kind, EntityKind::File(_))
    }

    #[inline(always)]
    pub fn is_directory(&self) -> bool {
        matches!(self.0.kind, EntityKind::Directory(_))
    }

    pub fn is_leaf(&self) -> bool {
        match &self.0.kind {
            EntityKind::File(_) => true,
            EntityKind::Directory(children) => read(children).is_empty(),
        }
    }

    pub fn is_opened(&self) -> bool {
        match &self.0.kind {
            EntityKind::File(content) => lock(content).is_opened(),
            EntityKind::Directory(_) => false,
        }
    }

    fn with_content<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ContentSource) -> Result<T>,
    {
        match &self.0.kind {
            EntityKind::File(content) => f(&mut lock(content)),
            EntityKind::Directory(_) => Err(Error::NotAFile(self.name().to_string())),
        }
    }

    /// Number of content bytes. Unbound filesystem content is measured on disk.
    pub fn content_size(&self) -> Result<u64> {
        self.with_content(|content| content.size())
    }

    /// Binds the content view if it isn't bound already.
    pub fn open(&self) -> Result<()> {
        self.with_content(ContentSource::open)
    }

    /// Reads content from the current position of the bound view.
    pub fn get_content(&self, buf: &mut [u8]) -> Result<usize> {
        self.with_content(|content| content.read(buf))
    }

    pub fn rewind(&self) -> Result<()> {
        self.with_content(ContentSource::rewind)
    }

    /// Closes the content view, keeping its location so it can be opened again.
    pub fn release_content(&self) {
        if let EntityKind::File(content) = &self.0.kind {
            lock(content).release();
        }
    }

    /// Releases the content of this entity and its whole subtree.
    pub fn close(&self) {
        let mut pending = vec![self.clone()];
        while let Some(entity) = pending.pop() {
            entity.release_content();
            pending.extend(entity.children());
        }
    }
}

#[inline(always)]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[inline(always)]
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

#[inline(always)]
fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelFactory;

    fn dir(name: &str) -> ArchiveEntity {
        ArchiveEntity::directory(name, Metadata::default()).unwrap()
    }

    fn file(factory: &ChannelFactory, path: &std::path::Path, name: &str) -> ArchiveEntity {
        ArchiveEntity::file(name, Metadata::default(), ContentSource::from_path(factory, path)).unwrap()
    }

    #[test]
    fn parents_follow_children() {
        let root = dir("a");
        let child = dir("c");
        let grandchild = dir("d");
        root.add_children(vec![child.clone()]).unwrap();
        child.add_children(vec![grandchild.clone()]).unwrap();

        assert_eq!(grandchild.parent(), Some(child.clone()));
        assert_eq!(grandchild.relative_path().as_str(), "a/c/d");
        assert!(root.parent().is_none());
        assert!(!root.is_leaf());
        assert!(grandchild.is_leaf());

        assert!(root.remove_child(&child));
        assert!(child.parent().is_none());
        assert!(!root.remove_child(&child));
        assert_eq!(grandchild.relative_path().as_str(), "c/d");
    }

    #[test]
    fn hierarchy_is_acyclic() {
        let root = dir("a");
        let child = dir("b");
        root.add_children(vec![child.clone()]).unwrap();

        assert!(matches!(
            child.add_children(vec![root.clone()]),
            Err(Error::InvalidHierarchy(_))
        ));
        assert!(matches!(
            root.add_children(vec![root.clone()]),
            Err(Error::InvalidHierarchy(_))
        ));

        let other = dir("z");
        assert!(matches!(
            other.add_children(vec![child.clone()]),
            Err(Error::InvalidHierarchy(_))
        ));
        assert_eq!(child.parent(), Some(root));
    }

    #[test]
    fn batches_are_all_or_nothing() {
        let root = dir("a");
        root.add_children(vec![dir("b")]).unwrap();

        let fresh = dir("c");
        assert!(matches!(
            root.add_children(vec![fresh.clone(), dir("b")]),
            Err(Error::DuplicateEntity(_))
        ));
        assert!(fresh.parent().is_none());
        assert!(matches!(
            root.add_children(vec![fresh.clone(), fresh.clone()]),
            Err(Error::DuplicateEntity(_))
        ));
        assert_eq!(root.children().len(), 1);
    }

    #[test]
    fn files_are_leaves() {
        let dir_path = tempfile::TempDir::new().unwrap();
        let path = dir_path.path().join("b.txt");
        std::fs::write(&path, "hi").unwrap();
        let factory = ChannelFactory::new();

        let entity = file(&factory, &path, "b.txt");
        assert!(entity.is_leaf());
        assert!(entity.children().is_empty());
        assert!(matches!(
            entity.add_children(vec![dir("x")]),
            Err(Error::NotADirectory(_))
        ));
        assert!(matches!(
            dir("d").get_content(&mut [0u8; 1]),
            Err(Error::NotAFile(_))
        ));
    }

    #[test]
    fn content_binds_lazily() {
        let dir_path = tempfile::TempDir::new().unwrap();
        let path = dir_path.path().join("b.txt");
        std::fs::write(&path, "hi").unwrap();
        let factory = ChannelFactory::new();

        let entity = file(&factory, &path, "b.txt");
        assert!(!entity.is_opened());
        assert_eq!(entity.content_size().unwrap(), 2);
        assert!(matches!(
            entity.get_content(&mut [0u8; 2]),
            Err(Error::ClosedChannel)
        ));
        assert_eq!(factory.open_descriptors(), 0);

        entity.open().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(entity.get_content(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");
        assert_eq!(entity.get_content(&mut buf).unwrap(), 0);
        entity.rewind().unwrap();
        assert_eq!(entity.get_content(&mut buf).unwrap(), 2);

        entity.release_content();
        assert!(!entity.is_opened());
        assert_eq!(factory.open_descriptors(), 0);
        entity.open().unwrap();
        assert_eq!(entity.get_content(&mut buf).unwrap(), 2);

        let root = dir("a");
        root.add_children(vec![entity.clone()]).unwrap();
        root.close();
        assert!(!entity.is_opened());
    }

    #[test]
    fn properties_keep_order() {
        let entity = dir("a");
        entity.set_property("owner", "bob").unwrap();
        entity.set_property("mode", "644").unwrap();
        entity.set_property("owner", "alice").unwrap();

        let keys: Vec<_> = entity.properties().into_iter().map(|p| p.into_pair()).collect();
        assert_eq!(
            keys,
            [
                ("owner".to_string(), "alice".to_string()),
                ("mode".to_string(), "644".to_string())
            ]
        );
        assert_eq!(entity.get_property("mode").as_deref(), Some("644"));
        assert_eq!(entity.metadata().to_string(), "owner:alice\nmode:644");
        assert!(matches!(
            entity.set_property("bad:key", "v"),
            Err(Error::InvalidProperty { .. })
        ));
    }

    #[test]
    fn names_are_validated() {
        for name in ["", ".", "..", "a/b", "a\nb"] {
            assert!(matches!(
                ArchiveEntity::directory(name, Metadata::default()),
                Err(Error::InvalidName(_))
            ));
        }
    }
}
