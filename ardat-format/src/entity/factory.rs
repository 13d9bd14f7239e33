use std::path::Path;

use super::encoding::{ContentEncoding, ENCODING_KEY};
use super::{ArchiveEntity, ContentSource};
use crate::channel::{ChannelFactory, SharedChannel};
use crate::error::Result;
use crate::fs::read_properties;
use crate::header::{ArchEntityInfo, RecordKind};
use crate::meta::{ArchiveEntityProperty, Metadata};

/// Turns archive records and filesystem entries into entities whose content shares the factory's
/// descriptors.
///
/// Files read from disk get the configured encodings stacked over their content and listed in
/// their `encoding` property. Files read from an archive have the encodings their record lists
/// undone, and lose the property.
#[derive(Debug, Clone, Default)]
pub struct ArchiveEntityFactory {
    channels: ChannelFactory,
    encodings: Vec<ContentEncoding>,
}

impl ArchiveEntityFactory {
    pub fn new(channels: ChannelFactory) -> ArchiveEntityFactory {
        ArchiveEntityFactory {
            channels,
            encodings: Vec::new(),
        }
    }

    /// Adds `encoding` on top of those already applied to file content read from disk.
    pub fn with_encoding(mut self, encoding: ContentEncoding) -> ArchiveEntityFactory {
        self.encodings.push(encoding);
        self
    }

    #[inline(always)]
    pub fn encodings(&self) -> &[ContentEncoding] {
        &self.encodings
    }

    #[inline(always)]
    pub fn channels(&self) -> &ChannelFactory {
        &self.channels
    }

    /// Entity for one archive record. Files are bound to a view derived from `archive` over their
    /// payload; the payload itself is not read.
    pub fn from_archive(&self, info: &ArchEntityInfo, archive: &SharedChannel) -> Result<ArchiveEntity> {
        let name = info.path().filename();
        let properties = info.properties().clone();

        match info.kind() {
            RecordKind::Directory => ArchiveEntity::directory(name, properties),
            RecordKind::File => {
                let view = self
                    .channels
                    .derive(archive, info.payload_offset(), info.size())?;
                let mut content = ContentSource::from_channel(&self.channels, view);

                let properties = match properties.get_property(ENCODING_KEY) {
                    Some(list) => {
                        for encoding in ContentEncoding::parse_list(list)?.into_iter().rev() {
                            content = content.decoded(encoding);
                        }
                        let kept = properties
                            .properties()
                            .iter()
                            .filter(|p| p.key() != ENCODING_KEY)
                            .cloned()
                            .collect();
                        Metadata::from_properties(kept)
                    }
                    None => properties,
                };
                ArchiveEntity::file(name, properties, content)
            }
        }
    }

    /// Entity for a directory or regular file on disk, or `None` for anything else. File content
    /// stays unbound until opened.
    pub fn from_path(&self, name: &str, path: &Path, metadata: &std::fs::Metadata) -> Result<Option<ArchiveEntity>> {
        let file_type = metadata.file_type();
        if file_type.is_dir() {
            let properties = read_properties(path, metadata)?;
            ArchiveEntity::directory(name, properties).map(Some)
        } else if file_type.is_file() {
            let mut properties = read_properties(path, metadata)?;
            let mut content = ContentSource::from_path(&self.channels, path);

            if !self.encodings.is_empty() {
                let mut list = None;
                for encoding in &self.encodings {
                    content = content.encoded(*encoding);
                    list = Some(encoding.append_to(list.as_deref()));
                }
                let mut all = properties.properties().to_vec();
                if let Some(list) = list {
                    all.push(ArchiveEntityProperty::new(ENCODING_KEY, list)?);
                }
                properties = Metadata::from_properties(all);
            }
            ArchiveEntity::file(name, properties, content).map(Some)
        } else {
            Ok(None)
        }
    }
}
