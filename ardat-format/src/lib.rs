//! Converts between directory trees on disk and ardat archives.
//!
//! Both directions go through an in-memory tree of [`ArchiveEntity`] values: a [`TreeBuilder`]
//! produces it from a source, a [`TreeWriter`] serializes it to a destination. File content is
//! never loaded into the tree; entities hold views onto shared file descriptors, handed out by a
//! [`ChannelFactory`].

pub mod channel;
pub mod entity;
mod error;
pub mod fs;
pub mod header;
pub mod meta;
pub mod path;
pub mod tree;

use std::path::Path;

pub use channel::{ChannelFactory, SharedChannel};
pub use entity::{ArchiveEntity, ArchiveEntityFactory, ContentEncoding, ContentSource};
pub use error::{Error, RangeError, Result};
pub use header::{ArchEntityInfo, Headers, RecordHeader, RecordKind};
pub use meta::{ArchiveEntityProperty, Metadata, MetadataBuilder};
pub use path::{ArchivePath, ArchivePathError};
pub use tree::{
    ArchiveTreeBuilder, ArchiveTreeWriter, FsTreeBuilder, FsTreeWriter, TreeBuilder, TreeRoot,
    TreeWriter,
};

fn write_tree<W: TreeWriter>(mut writer: W, tree: &TreeRoot, pool: Option<&rayon::ThreadPool>) -> Result<()> {
    let result = match pool {
        Some(pool) => writer.write_with_pool(tree, pool),
        None => writer.write(tree),
    };
    tree.close();
    result
}

/// Archives the file or directory at `source` into a new archive at `archive`.
pub fn archive<P: AsRef<Path>, Q: AsRef<Path>>(source: P, archive: Q) -> Result<()> {
    archive_with_pool(source, archive, None)
}

pub fn archive_with_pool<P: AsRef<Path>, Q: AsRef<Path>>(
    source: P,
    archive: Q,
    pool: Option<&rayon::ThreadPool>,
) -> Result<()> {
    archive_encoded(source, archive, &[], pool)
}

/// Archives `source` with every file's content stored through `encodings`, first listed applied
/// first. Extraction undoes them.
pub fn archive_encoded<P: AsRef<Path>, Q: AsRef<Path>>(
    source: P,
    archive: Q,
    encodings: &[ContentEncoding],
    pool: Option<&rayon::ThreadPool>,
) -> Result<()> {
    let factory = ChannelFactory::new();
    let builder = encodings
        .iter()
        .fold(FsTreeBuilder::new(source), |builder, encoding| builder.with_encoding(*encoding));
    let tree = builder.with_factory(factory.clone()).build()?;
    let writer = ArchiveTreeWriter::create_with_factory(archive, factory)?;
    write_tree(writer, &tree, pool)
}

/// Extracts the archive at `archive` under the existing directory `destination`.
pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(archive: P, destination: Q) -> Result<()> {
    extract_with_pool(archive, destination, None)
}

pub fn extract_with_pool<P: AsRef<Path>, Q: AsRef<Path>>(
    archive: P,
    destination: Q,
    pool: Option<&rayon::ThreadPool>,
) -> Result<()> {
    let factory = ChannelFactory::new();
    let tree = ArchiveTreeBuilder::open(archive)
        .with_factory(factory.clone())
        .build()?;
    let writer = FsTreeWriter::new(destination).with_factory(factory);
    write_tree(writer, &tree, pool)
}

/// Reads the prelude and record index of the archive at `archive` without touching payloads.
pub fn list<P: AsRef<Path>>(archive: P) -> Result<(Metadata, Headers)> {
    let mut channel = ChannelFactory::new().open(archive)?;
    Headers::read_archive(&mut channel)
}
