use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::TreeBuilder;
use crate::channel::{ChannelFactory, SharedChannel};
use crate::entity::{ArchiveEntity, ArchiveEntityFactory};
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::meta::Metadata;
use crate::path::ArchivePath;

/// Builds a tree from an ardat archive.
///
/// The prelude and the record index are read when the root is requested. Every file entity is
/// bound to a view derived from a single view over the archive, so the finished tree holds one
/// descriptor on it.
#[derive(Debug)]
pub struct ArchiveTreeBuilder {
    path: PathBuf,
    entities: ArchiveEntityFactory,
    state: Option<Index>,
    paths: HashMap<usize, ArchivePath>,
}

#[derive(Debug)]
struct Index {
    metadata: Metadata,
    headers: Headers,
    archive: SharedChannel,
}

impl ArchiveTreeBuilder {
    pub fn open<P: AsRef<Path>>(path: P) -> ArchiveTreeBuilder {
        ArchiveTreeBuilder {
            path: path.as_ref().to_path_buf(),
            entities: ArchiveEntityFactory::default(),
            state: None,
            paths: HashMap::new(),
        }
    }

    pub fn with_factory(mut self, factory: ChannelFactory) -> ArchiveTreeBuilder {
        self.entities = ArchiveEntityFactory::new(factory);
        self
    }

    /// The archive prelude, once read.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.state.as_ref().map(|s| &s.metadata)
    }

    /// The record index, once read.
    pub fn headers(&self) -> Option<&Headers> {
        self.state.as_ref().map(|s| &s.headers)
    }

    fn index(&mut self) -> Result<&Index> {
        if self.state.is_none() {
            let channels = self.entities.channels();
            let mut archive = channels.open(&self.path)?;
            let (metadata, headers) = Headers::read_archive(&mut archive)?;

            tracing::debug!(path = %self.path.display(), records = headers.len(), "read archive index");
            self.state = Some(Index {
                metadata,
                headers,
                archive,
            });
        }

        self.state.as_ref().ok_or(Error::EmptyTree)
    }
}

impl TreeBuilder for ArchiveTreeBuilder {
    fn root(&mut self) -> Result<ArchiveEntity> {
        self.index()?;
        let state = self.state.as_ref().ok_or(Error::EmptyTree)?;
        let info = state.headers.root().ok_or(Error::EmptyTree)?;

        let root = self.entities.from_archive(info, &state.archive)?;
        self.paths.insert(root.id(), info.path().clone());
        Ok(root)
    }

    fn children(&mut self, entity: &ArchiveEntity) -> Result<Vec<ArchiveEntity>> {
        let state = self.state.as_ref().ok_or(Error::EmptyTree)?;
        let path = self
            .paths
            .get(&entity.id())
            .cloned()
            .ok_or_else(|| Error::InvalidHierarchy(entity.name().to_string()))?;

        let mut children = Vec::new();
        for info in state.headers.children(&path) {
            let child = self
                .entities
                .from_archive(info, &state.archive)
                .map_err(|e| e.within(info.path()))?;
            self.paths.insert(child.id(), info.path().clone());
            children.push(child);
        }
        Ok(children)
    }
}
