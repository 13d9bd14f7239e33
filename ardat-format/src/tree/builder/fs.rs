use std::collections::HashMap;
use std::path::{Path, PathBuf};

use jwalk::{Parallelism, WalkDir};

use super::TreeBuilder;
use crate::channel::ChannelFactory;
use crate::entity::{ArchiveEntity, ArchiveEntityFactory, ContentEncoding};
use crate::error::{Error, Result};
use crate::path::root_name;

/// Builds a tree from a directory (or a single file) on disk.
///
/// Symbolic links and special files are skipped and never followed. File content is bound
/// lazily, so building holds no descriptors open.
#[derive(Debug)]
pub struct FsTreeBuilder {
    path: PathBuf,
    entities: ArchiveEntityFactory,
    locations: HashMap<usize, PathBuf>,
}

impl FsTreeBuilder {
    pub fn new<P: AsRef<Path>>(path: P) -> FsTreeBuilder {
        FsTreeBuilder {
            path: path.as_ref().to_path_buf(),
            entities: ArchiveEntityFactory::default(),
            locations: HashMap::new(),
        }
    }

    pub fn with_factory(mut self, factory: ChannelFactory) -> FsTreeBuilder {
        let encodings = self.entities.encodings().to_vec();
        self.entities = encodings
            .into_iter()
            .fold(ArchiveEntityFactory::new(factory), ArchiveEntityFactory::with_encoding);
        self
    }

    /// Stores file content through `encoding`, on top of encodings added before.
    pub fn with_encoding(mut self, encoding: ContentEncoding) -> FsTreeBuilder {
        self.entities = self.entities.with_encoding(encoding);
        self
    }

    fn location(&self, entity: &ArchiveEntity) -> Result<&Path> {
        self.locations
            .get(&entity.id())
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::InvalidHierarchy(entity.name().to_string()))
    }
}

impl TreeBuilder for FsTreeBuilder {
    fn root(&mut self) -> Result<ArchiveEntity> {
        let path = self.path.canonicalize()?;
        let name = root_name(&path)?;
        let meta = std::fs::metadata(&path)?;

        let root = self
            .entities
            .from_path(&name, &path, &meta)?
            .ok_or_else(|| Error::NotADirectory(name.clone()))?;
        self.locations.insert(root.id(), path);
        Ok(root)
    }

    fn children(&mut self, entity: &ArchiveEntity) -> Result<Vec<ArchiveEntity>> {
        let dir = self.location(entity)?.to_path_buf();
        let walker = WalkDir::new(&dir)
            .parallelism(Parallelism::Serial)
            .sort(true)
            .skip_hidden(false)
            .follow_links(false)
            .min_depth(1)
            .max_depth(1);

        let mut children = Vec::new();
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            let path = entry.path();
            let name = match entry.file_name().to_str() {
                Some(name) => name.to_string(),
                None => {
                    tracing::warn!(path = %path.display(), "skipping entry with a non UTF-8 name");
                    continue;
                }
            };

            let child_path = format!("{}/{}", entity.relative_path(), name);
            let child = std::fs::symlink_metadata(&path)
                .map_err(Error::from)
                .and_then(|meta| self.entities.from_path(&name, &path, &meta))
                .map_err(|e| e.within(child_path))?;

            match child {
                Some(child) => {
                    self.locations.insert(child.id(), path);
                    children.push(child);
                }
                None => {
                    tracing::warn!(path = %path.display(), "skipping link or special file");
                }
            }
        }

        Ok(children)
    }
}
