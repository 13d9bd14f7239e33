//! Per-record headers and the archive index built from them.

use std::collections::HashMap;
use std::fmt;

use crate::channel::{read_line, SharedChannel};
use crate::error::{Error, Result};
use crate::meta::{ArchiveEntityProperty, Metadata, ENTITIES_KEY, MAX_LINE};
use crate::path::ArchivePath;

/// Upper bound on the size of one record header, terminator included.
pub const MAX_HEADER: u64 = 64 * 1024;

const PATH_KEY: &str = "path";
const KIND_KEY: &str = "kind";
const CHILDREN_KEY: &str = "children";
const SIZE_KEY: &str = "size";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    File,
    Directory,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::File => "file",
            RecordKind::Directory => "directory",
        }
    }

    fn parse(value: &str) -> Result<RecordKind> {
        match value {
            "file" => Ok(RecordKind::File),
            "directory" => Ok(RecordKind::Directory),
            other => Err(Error::corrupted(format!("unknown record kind '{}'", other))),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The header preceding every record's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub path: ArchivePath,
    pub kind: RecordKind,
    pub children: usize,
    pub size: u64,
    pub properties: Metadata,
}

impl RecordHeader {
    /// Parses header lines, stopping at the first empty line if there is one.
    pub fn parse(text: &str) -> Result<RecordHeader> {
        let mut lines = text.split('\n').take_while(|line| !line.is_empty());
        let mut frame = |key: &str| -> Result<String> {
            let line = lines
                .next()
                .ok_or_else(|| Error::corrupted(format!("record header lacks '{}'", key)))?;
            let property = ArchiveEntityProperty::parse(line)?;
            if property.key() != key {
                return Err(Error::corrupted(format!(
                    "expected '{}' in record header, found '{}'",
                    key,
                    property.key()
                )));
            }
            Ok(property.into_pair().1)
        };

        let path = frame(PATH_KEY)?;
        let path = ArchivePath::parse(&path)
            .map_err(|e| Error::corrupted(format!("record path '{}': {}", path, e)))?;
        let kind = RecordKind::parse(&frame(KIND_KEY)?)?;
        let children = frame(CHILDREN_KEY)?
            .parse::<usize>()
            .map_err(|_| Error::corrupted(format!("children count of '{}' is not a number", path)))?;
        let size = frame(SIZE_KEY)?;
        if size.len() != 16 {
            return Err(Error::corrupted(format!("size of '{}' is not 16 hex digits", path)));
        }
        let size = u64::from_str_radix(&size, 16)
            .map_err(|_| Error::corrupted(format!("size of '{}' is not hexadecimal", path)))?;

        if kind == RecordKind::File && children != 0 {
            return Err(Error::corrupted(format!("file '{}' declares children", path)));
        }
        if kind == RecordKind::Directory && size != 0 {
            return Err(Error::corrupted(format!("directory '{}' declares a payload", path)));
        }

        let mut builder = Metadata::builder();
        for line in lines {
            builder.feed_property_line(line)?;
        }

        Ok(RecordHeader {
            path,
            kind,
            children,
            size,
            properties: builder.build(),
        })
    }

    /// Renders the header, failing if a reader would reject it for a line longer than the line
    /// limit or for exceeding [`MAX_HEADER`] in total.
    pub fn render_bounded(&self) -> Result<String> {
        let text = self.render();
        if let Some(line) = text.split('\n').find(|line| line.len() > MAX_LINE) {
            let key = line.split(':').next().unwrap_or_default();
            return Err(Error::HeaderTooLarge(format!(
                "'{}' line of '{}' is {} bytes, at most {} are allowed",
                key,
                self.path,
                line.len(),
                MAX_LINE
            )));
        }
        if text.len() as u64 > MAX_HEADER {
            return Err(Error::HeaderTooLarge(format!(
                "header of '{}' is {} bytes, at most {} are allowed",
                self.path,
                text.len(),
                MAX_HEADER
            )));
        }
        Ok(text)
    }

    /// The header as written to the archive, blank terminator line included.
    pub fn render(&self) -> String {
        let mut text = format!(
            "{}:{}\n{}:{}\n{}:{}\n{}:{:016x}\n",
            PATH_KEY,
            self.path,
            KIND_KEY,
            self.kind,
            CHILDREN_KEY,
            self.children,
            SIZE_KEY,
            self.size
        );
        for property in self.properties.properties() {
            text.push_str(&property.to_string());
            text.push('\n');
        }
        text.push('\n');
        text
    }
}

/// Where one record lives in the archive, with its parsed header.
///
/// Offsets are relative to the start of the channel the index was read from.
#[derive(Debug, Clone)]
pub struct ArchEntityInfo {
    offset: u64,
    header: String,
    record: RecordHeader,
}

impl ArchEntityInfo {
    #[inline(always)]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline(always)]
    pub fn header_text(&self) -> &str {
        &self.header
    }

    #[inline(always)]
    pub fn record(&self) -> &RecordHeader {
        &self.record
    }

    #[inline(always)]
    pub fn path(&self) -> &ArchivePath {
        &self.record.path
    }

    #[inline(always)]
    pub fn kind(&self) -> RecordKind {
        self.record.kind
    }

    #[inline(always)]
    pub fn children(&self) -> usize {
        self.record.children
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.record.size
    }

    #[inline(always)]
    pub fn properties(&self) -> &Metadata {
        &self.record.properties
    }

    #[inline(always)]
    pub fn payload_offset(&self) -> u64 {
        self.offset + self.header.len() as u64
    }
}

/// Index of every record in an archive: path to record, offset to path, and each directory's
/// children in archive order.
#[derive(Debug, Default)]
pub struct Headers {
    records: Vec<ArchEntityInfo>,
    by_path: HashMap<ArchivePath, usize>,
    by_offset: HashMap<u64, usize>,
    hierarchy: HashMap<ArchivePath, Vec<usize>>,
}

impl Headers {
    /// Scans the records from the channel's position to its end. Payloads are skipped, not read.
    pub fn retrieve(channel: &mut SharedChannel) -> Result<Headers> {
        let mut headers = Headers::default();

        while channel.remaining() > 0 {
            let offset = channel.position();
            let header = read_header(channel)?;
            let record = RecordHeader::parse(&header)?;

            if record.size > channel.remaining() {
                return Err(Error::corrupted(format!(
                    "payload of '{}' is truncated: {} bytes declared, {} available",
                    record.path,
                    record.size,
                    channel.remaining()
                )));
            }
            channel.seek(channel.position() + record.size)?;

            tracing::debug!(path = %record.path, offset, size = record.size, "indexed record");
            headers.insert(ArchEntityInfo {
                offset,
                header,
                record,
            })?;
        }

        if headers.records.is_empty() {
            return Err(Error::corrupted("archive holds no records"));
        }

        for info in &headers.records {
            let found = headers.hierarchy.get(info.path()).map_or(0, Vec::len);
            if info.kind() == RecordKind::Directory && found != info.children() {
                return Err(Error::corrupted(format!(
                    "directory '{}' declares {} children but holds {}",
                    info.path(),
                    info.children(),
                    found
                )));
            }
        }

        Ok(headers)
    }

    /// Reads the prelude and the record index of a whole archive, checking the prelude's
    /// declared entity count against the records found.
    pub fn read_archive(channel: &mut SharedChannel) -> Result<(Metadata, Headers)> {
        let metadata = Metadata::read_prelude(channel)?;
        let headers = Headers::retrieve(channel)?;

        if let Some(declared) = metadata.get_property(ENTITIES_KEY) {
            if declared.parse::<usize>().ok() != Some(headers.len()) {
                return Err(Error::corrupted(format!(
                    "prelude declares {} entities, found {}",
                    declared,
                    headers.len()
                )));
            }
        }
        Ok((metadata, headers))
    }

    fn insert(&mut self, info: ArchEntityInfo) -> Result<()> {
        let path = info.path().clone();
        if self.by_path.contains_key(&path) {
            return Err(Error::corrupted(format!("duplicate record '{}'", path)));
        }

        match path.parent() {
            None if !self.records.is_empty() => {
                return Err(Error::corrupted(format!("second root record '{}'", path)));
            }
            None => {}
            Some(_) if self.records.is_empty() => {
                return Err(Error::corrupted(format!(
                    "first record '{}' is not a root",
                    path
                )));
            }
            Some(parent) => {
                let parent_kind = self
                    .info(&parent)
                    .map(ArchEntityInfo::kind)
                    .ok_or_else(|| {
                        Error::corrupted(format!("record '{}' has no parent record", path))
                    })?;
                if parent_kind != RecordKind::Directory {
                    return Err(Error::corrupted(format!(
                        "record '{}' is nested under file '{}'",
                        path, parent
                    )));
                }
                let index = self.records.len();
                self.hierarchy.entry(parent).or_default().push(index);
            }
        }

        let index = self.records.len();
        self.by_path.insert(path, index);
        self.by_offset.insert(info.offset(), index);
        self.records.push(info);
        Ok(())
    }

    pub fn get_file_size(&self, path: &ArchivePath) -> Option<u64> {
        self.info(path).map(ArchEntityInfo::size)
    }

    pub fn get_relative_path(&self, offset: u64) -> Option<&ArchivePath> {
        self.by_offset
            .get(&offset)
            .map(|index| self.records[*index].path())
    }

    pub fn info(&self, path: &ArchivePath) -> Option<&ArchEntityInfo> {
        self.by_path.get(path).map(|index| &self.records[*index])
    }

    pub fn root(&self) -> Option<&ArchEntityInfo> {
        self.records.first()
    }

    pub fn children<'a>(&'a self, path: &ArchivePath) -> impl Iterator<Item = &'a ArchEntityInfo> + 'a {
        self.hierarchy
            .get(path)
            .into_iter()
            .flatten()
            .map(move |index| &self.records[*index])
    }

    /// Records in archive order.
    pub fn iter(&self) -> std::slice::Iter<'_, ArchEntityInfo> {
        self.records.iter()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn read_header(channel: &mut SharedChannel) -> Result<String> {
    let start = channel.position();
    let mut header = String::new();

    loop {
        let line = read_line(channel, MAX_LINE)?.ok_or_else(|| {
            Error::corrupted(format!("record header at {:#x} is truncated", start))
        })?;
        if channel.position() - start > MAX_HEADER {
            return Err(Error::corrupted(format!(
                "record header at {:#x} exceeds {} bytes",
                start, MAX_HEADER
            )));
        }

        header.push_str(&line);
        header.push('\n');
        if line.is_empty() {
            return Ok(header);
        }
    }
}
