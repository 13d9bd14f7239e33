//! Line-based `key:value` property blocks.

use std::fmt;

use unic_ucd::GeneralCategory;

use crate::channel::{read_line, SharedChannel};
use crate::error::{Error, Result};

/// Signature opening every ardat archive.
pub const SIGNATURE: &str = "ardat";

/// Separator between a property key and its value.
pub const KEY_VALUE_SEP: char = ':';

/// Version of the archive layout written by this crate.
pub const FORMAT_VERSION: &str = "0.1";

/// Prelude keys written by the archive writer.
pub const VERSION_KEY: &str = "version";
pub const ORIGINS_KEY: &str = "origins";
pub const ENTITIES_KEY: &str = "entities";

pub(crate) const MAX_LINE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveEntityProperty {
    key: String,
    value: String,
}

impl ArchiveEntityProperty {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Result<Self> {
        let key = key.into();
        let value = value.into();
        validate(&key, &value)?;
        Ok(ArchiveEntityProperty { key, value })
    }

    /// Parses one `key:value` line.
    pub fn parse(line: &str) -> Result<Self> {
        let (key, value) = line
            .split_once(KEY_VALUE_SEP)
            .ok_or_else(|| Error::corrupted(format!("expected a key:value pair, got '{}'", line)))?;
        ArchiveEntityProperty::new(key, value)
    }

    #[inline(always)]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline(always)]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether the `key:value` line stays within the line length readers accept.
    pub fn fits_line(&self) -> bool {
        self.key.len() + KEY_VALUE_SEP.len_utf8() + self.value.len() <= MAX_LINE
    }

    pub fn into_pair(self) -> (String, String) {
        (self.key, self.value)
    }
}

impl fmt::Display for ArchiveEntityProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.key, KEY_VALUE_SEP, self.value)
    }
}

fn validate(key: &str, value: &str) -> Result<()> {
    let bad_key = key.is_empty()
        || key.trim() != key
        || key.contains(KEY_VALUE_SEP)
        || key.chars().any(|c| GeneralCategory::of(c) == GeneralCategory::Control);
    if bad_key {
        return Err(Error::corrupted(format!("invalid property key '{}'", key)));
    }
    if value.contains('\n') || value.contains('\r') {
        return Err(Error::corrupted(format!(
            "property '{}' has a line break in its value",
            key
        )));
    }
    Ok(())
}

/// An immutable, ordered set of properties under the ardat signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    properties: Vec<ArchiveEntityProperty>,
}

impl Metadata {
    pub fn builder() -> MetadataBuilder {
        MetadataBuilder::default()
    }

    /// Wraps properties whose keys are already known to be unique.
    pub(crate) fn from_properties(properties: Vec<ArchiveEntityProperty>) -> Metadata {
        Metadata { properties }
    }

    #[inline(always)]
    pub fn signature(&self) -> &'static str {
        SIGNATURE
    }

    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.key() == key)
            .map(|p| p.value())
    }

    #[inline(always)]
    pub fn properties(&self) -> &[ArchiveEntityProperty] {
        &self.properties
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// The archive prelude: signature, line count, the property lines and a blank terminator.
    pub fn prelude_text(&self) -> String {
        let mut text = format!("{}\n{}\n", SIGNATURE, self.properties.len());
        for property in &self.properties {
            text.push_str(&property.to_string());
            text.push('\n');
        }
        text.push('\n');
        text
    }

    /// Reads a prelude written by [`prelude_text`](Self::prelude_text), leaving the channel
    /// positioned at the first byte after it.
    pub fn read_prelude(channel: &mut SharedChannel) -> Result<Metadata> {
        let mut next = |what: &str| -> Result<String> {
            read_line(channel, MAX_LINE)?
                .ok_or_else(|| Error::corrupted(format!("archive ended before the {}", what)))
        };

        if next("signature")? != SIGNATURE {
            return Err(Error::corrupted("the archive signature doesn't match"));
        }
        let count: usize = next("metadata length")?
            .parse()
            .map_err(|_| Error::corrupted("expected the length of the metadata header"))?;

        let mut builder = Metadata::builder();
        for _ in 0..count {
            builder.feed_property_line(&next("metadata properties")?)?;
        }
        if !next("metadata terminator")?.is_empty() {
            return Err(Error::corrupted("metadata header is longer than declared"));
        }

        Ok(builder.build())
    }
}

impl fmt::Display for Metadata {
    /// Property lines in insertion order, joined by line feeds. This is the exact inverse of
    /// feeding each line to a [`MetadataBuilder`].
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.properties.iter();
        if let Some(first) = iter.next() {
            write!(f, "{}", first)?;
        }
        for property in iter {
            write!(f, "\n{}", property)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MetadataBuilder {
    properties: Vec<ArchiveEntityProperty>,
}

impl MetadataBuilder {
    pub fn feed_property_line(&mut self, line: &str) -> Result<&mut Self> {
        let property = ArchiveEntityProperty::parse(line)?;
        self.push(property)
    }

    pub fn add_property<K: Into<String>, V: Into<String>>(
        &mut self,
        key: K,
        value: V,
    ) -> Result<&mut Self> {
        let property = ArchiveEntityProperty::new(key, value)?;
        self.push(property)
    }

    fn push(&mut self, property: ArchiveEntityProperty) -> Result<&mut Self> {
        if self.properties.iter().any(|p| p.key() == property.key()) {
            return Err(Error::corrupted(format!(
                "duplicate property '{}'",
                property.key()
            )));
        }
        self.properties.push(property);
        Ok(self)
    }

    pub fn build(self) -> Metadata {
        Metadata {
            properties: self.properties,
        }
    }
}
