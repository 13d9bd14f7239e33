use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{copy_content, TreeWriter};
use crate::channel::{ChannelFactory, SharedChannel};
use crate::entity::ArchiveEntity;
use crate::error::{Error, Result};
use crate::header::{RecordHeader, RecordKind};
use crate::meta::{Metadata, ENTITIES_KEY, FORMAT_VERSION, ORIGINS_KEY, VERSION_KEY};

#[derive(Debug)]
struct Slot {
    offset: u64,
    header: String,
    size: u64,
}

/// Writes a tree into a new ardat archive.
///
/// The whole layout is fixed in [`begin`](TreeWriter::begin), so every record has its own slot in
/// the file and records can be written in any order, from any thread.
#[derive(Debug)]
pub struct ArchiveTreeWriter {
    path: PathBuf,
    factory: ChannelFactory,
    archive: Option<SharedChannel>,
    layout: HashMap<usize, Slot>,
}

impl ArchiveTreeWriter {
    /// Creates the archive file. Fails if it already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<ArchiveTreeWriter> {
        ArchiveTreeWriter::create_with_factory(path, ChannelFactory::new())
    }

    pub fn create_with_factory<P: AsRef<Path>>(path: P, factory: ChannelFactory) -> Result<ArchiveTreeWriter> {
        let archive = factory.create(path.as_ref())?;
        Ok(ArchiveTreeWriter {
            path: path.as_ref().to_path_buf(),
            factory,
            archive: Some(archive),
            layout: HashMap::new(),
        })
    }

    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn archive(&self) -> Result<&SharedChannel> {
        self.archive.as_ref().ok_or(Error::ClosedChannel)
    }
}

fn record_for(entity: &ArchiveEntity) -> Result<RecordHeader> {
    let (kind, size) = if entity.is_file() {
        (RecordKind::File, entity.content_size()?)
    } else {
        (RecordKind::Directory, 0)
    };

    Ok(RecordHeader {
        path: entity.relative_path(),
        kind,
        children: entity.children().len(),
        size,
        properties: entity.metadata(),
    })
}

impl TreeWriter for ArchiveTreeWriter {
    fn begin(&mut self, order: &[ArchiveEntity]) -> Result<()> {
        let mut prelude = Metadata::builder();
        prelude
            .add_property(VERSION_KEY, FORMAT_VERSION)?
            .add_property(ORIGINS_KEY, std::env::consts::OS)?
            .add_property(ENTITIES_KEY, order.len().to_string())?;
        let prelude = prelude.build().prelude_text();

        let mut offset = prelude.len() as u64;
        self.layout.clear();
        for entity in order {
            let (record, header) = record_for(entity)
                .and_then(|record| record.render_bounded().map(|header| (record, header)))
                .map_err(|e| e.within(entity.relative_path()))?;
            tracing::debug!(path = %record.path, offset, size = record.size, "laid out record");

            let slot = Slot {
                offset,
                size: record.size,
                header,
            };
            offset += slot.header.len() as u64 + slot.size;
            self.layout.insert(entity.id(), slot);
        }

        let archive = self.archive.as_mut().ok_or(Error::ClosedChannel)?;
        archive.write(prelude.as_bytes())?;
        archive.set_size(offset)?;
        Ok(())
    }

    fn write_archive_entity(&self, entity: &ArchiveEntity) -> Result<()> {
        let slot = self
            .layout
            .get(&entity.id())
            .ok_or_else(|| Error::InvalidHierarchy(entity.name().to_string()))?;

        let mut view = self.factory.derive(
            self.archive()?,
            slot.offset,
            slot.header.len() as u64 + slot.size,
        )?;
        view.write(slot.header.as_bytes())?;

        if entity.is_file() {
            copy_content(entity, Some(slot.size), |chunk| view.write(chunk).map(|_| ()))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut archive) = self.archive.take() {
            archive.flush()?;
            archive.close();
        }
        tracing::info!(path = %self.path.display(), records = self.layout.len(), "finished archive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ContentSource;
    use crate::tree::{ArchiveTreeBuilder, TreeBuilder, TreeRoot};

    fn sample(dir: &Path, factory: &ChannelFactory) -> TreeRoot {
        let payload = dir.join("payload");
        std::fs::write(&payload, "hi").unwrap();

        let root = ArchiveEntity::directory("a", Metadata::default()).unwrap();
        let file = ArchiveEntity::file("b.txt", Metadata::default(), ContentSource::from_path(factory, &payload)).unwrap();
        file.set_property("owner", "bob").unwrap();
        let empty = ArchiveEntity::directory("c", Metadata::default()).unwrap();
        root.add_children(vec![file, empty]).unwrap();

        let tree = TreeRoot::new();
        tree.set(root).unwrap();
        tree
    }

    #[test]
    fn writes_exact_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let factory = ChannelFactory::new();
        let tree = sample(dir.path(), &factory);
        let path = dir.path().join("out.ardat");

        ArchiveTreeWriter::create_with_factory(&path, factory.clone())
            .unwrap()
            .write(&tree)
            .unwrap();

        let expected = format!(
            "ardat\n3\nversion:0.1\norigins:{}\nentities:3\n\n\
             path:a\nkind:directory\nchildren:2\nsize:0000000000000000\n\n\
             path:a/b.txt\nkind:file\nchildren:0\nsize:0000000000000002\nowner:bob\n\nhi\
             path:a/c\nkind:directory\nchildren:0\nsize:0000000000000000\n\n",
            std::env::consts::OS
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), expected);
        assert_eq!(factory.open_descriptors(), 0);
    }

    #[test]
    fn refuses_existing_archive() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.ardat");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(ArchiveTreeWriter::create(&path), Err(Error::Io(_))));
    }

    #[test]
    fn pool_output_matches_serial() {
        let dir = tempfile::TempDir::new().unwrap();
        let factory = ChannelFactory::new();
        let tree = sample(dir.path(), &factory);

        let serial = dir.path().join("serial.ardat");
        ArchiveTreeWriter::create(&serial).unwrap().write(&tree).unwrap();

        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let pooled = dir.path().join("pooled.ardat");
        ArchiveTreeWriter::create(&pooled)
            .unwrap()
            .write_with_pool(&tree, &pool)
            .unwrap();

        assert_eq!(std::fs::read(&serial).unwrap(), std::fs::read(&pooled).unwrap());
    }

    #[test]
    fn short_content_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let factory = ChannelFactory::new();
        let payload = dir.path().join("payload");
        std::fs::write(&payload, "hi").unwrap();

        let root = ArchiveEntity::directory("a", Metadata::default()).unwrap();
        let file = ArchiveEntity::file(
            "f",
            Metadata::default(),
            ContentSource::from_range(&factory, &payload, 0, 10),
        )
        .unwrap();
        root.add_children(vec![file]).unwrap();
        let tree = TreeRoot::new();
        tree.set(root).unwrap();

        let err = ArchiveTreeWriter::create(dir.path().join("out.ardat"))
            .unwrap()
            .write(&tree)
            .unwrap_err();
        assert_eq!(err.entity_path(), Some("a/f"));
        assert!(matches!(err.innermost(), Error::Range(_) | Error::Io(_)));
    }

    #[test]
    fn oversized_property_is_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let factory = ChannelFactory::new();
        let tree = sample(dir.path(), &factory);
        tree.find("a/b.txt")
            .unwrap()
            .set_property("comment", "v".repeat(5000))
            .unwrap();

        let path = dir.path().join("out.ardat");
        let err = ArchiveTreeWriter::create_with_factory(&path, factory.clone())
            .unwrap()
            .write(&tree)
            .unwrap_err();
        assert_eq!(err.entity_path(), Some("a/b.txt"));
        assert!(matches!(err.innermost(), Error::HeaderTooLarge(_)));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        tree.find("a/b.txt")
            .unwrap()
            .set_property("comment", "v".repeat(4000))
            .unwrap();
        let path = dir.path().join("fits.ardat");
        ArchiveTreeWriter::create(&path).unwrap().write(&tree).unwrap();
        let rebuilt = ArchiveTreeBuilder::open(&path).build().unwrap();
        let comment = rebuilt.find("a/b.txt").unwrap().get_property("comment").unwrap();
        assert_eq!(comment.len(), 4000);
        rebuilt.close();
    }

    #[test]
    fn archive_builds_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let tree = sample(dir.path(), &ChannelFactory::new());
        let path = dir.path().join("out.ardat");
        ArchiveTreeWriter::create(&path).unwrap().write(&tree).unwrap();

        let factory = ChannelFactory::new();
        let mut builder = ArchiveTreeBuilder::open(&path).with_factory(factory.clone());
        let rebuilt = builder.build().unwrap();
        assert_eq!(builder.metadata().unwrap().get_property("entities"), Some("3"));

        let file = rebuilt.find("a/b.txt").unwrap();
        assert!(file.is_opened());
        assert_eq!(file.get_property("owner").as_deref(), Some("bob"));
        let mut buf = [0u8; 4];
        assert_eq!(file.get_content(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");
        assert!(rebuilt.find("a/c").unwrap().is_leaf());

        drop(builder);
        assert_eq!(factory.open_descriptors(), 1);
        rebuilt.close();
        assert_eq!(factory.open_descriptors(), 0);
    }
}
