use std::{
    fmt,
    path::{Path, PathBuf},
};

mod error;

pub use self::error::ArchivePathError;

/// The separator used between components of an `ArchivePath`, as recorded in record headers.
pub const PATH_ARCHIVE_SEP: &str = "/";

/// Relative path of an entity inside an archive, from the root entity's name down.
///
/// Components are never empty, `.` or `..`, and contain neither a separator nor a control
/// character, so a path always fits on one header line and can't escape the extraction
/// directory.
#[derive(Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ArchivePath(pub(crate) String);

/// Checks that `name` can be a single path component.
pub fn validate_component(name: &str) -> std::result::Result<(), ArchivePathError> {
    use unic_ucd::GeneralCategory;

    if name.is_empty() {
        return Err(ArchivePathError::EmptyComponent);
    }
    if name == "." || name == ".." {
        return Err(ArchivePathError::DotComponent(name.to_string()));
    }
    if name.contains(PATH_ARCHIVE_SEP) {
        return Err(ArchivePathError::Separator(name.to_string()));
    }
    if name
        .chars()
        .any(|c| GeneralCategory::of(c) == GeneralCategory::Control)
    {
        return Err(ArchivePathError::ControlCharacter(name.to_string()));
    }
    Ok(())
}

impl ArchivePath {
    /// Parses a `/`-separated path as found in a record header.
    pub fn parse(path: &str) -> std::result::Result<ArchivePath, ArchivePathError> {
        Self::from_components(path.split(PATH_ARCHIVE_SEP))
    }

    pub fn from_components<I, S>(components: I) -> std::result::Result<ArchivePath, ArchivePathError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = vec![];
        for component in components {
            let component = component.as_ref();
            validate_component(component)?;
            out.push(component.to_string());
        }

        if out.is_empty() {
            return Err(ArchivePathError::Empty);
        }

        Ok(ArchivePath(out.join(PATH_ARCHIVE_SEP)))
    }

    /// Platform path of the entity relative to an extraction directory.
    pub fn to_path_buf(&self) -> PathBuf {
        self.iter().collect()
    }

    pub fn parent(&self) -> Option<ArchivePath> {
        self.0
            .rsplit_once(PATH_ARCHIVE_SEP)
            .map(|(parent, _)| ArchivePath(parent.to_string()))
    }

    pub fn filename(&self) -> &str {
        self.0
            .rsplit(PATH_ARCHIVE_SEP)
            .next()
            .unwrap_or(&self.0)
    }

    /// Number of ancestors; the root is at depth 0.
    pub fn depth(&self) -> usize {
        self.0.matches(PATH_ARCHIVE_SEP).count()
    }

    pub fn starts_with(&self, other: &ArchivePath) -> bool {
        self.0 == other.0
            || (self.0.starts_with(&other.0)
                && self.0[other.0.len()..].starts_with(PATH_ARCHIVE_SEP))
    }

    pub fn join(&self, name: &str) -> std::result::Result<ArchivePath, ArchivePathError> {
        validate_component(name)?;
        Ok(ArchivePath(format!("{}{}{}", self.0, PATH_ARCHIVE_SEP, name)))
    }

    pub fn iter(&self) -> std::str::Split<'_, &str> {
        self.0.split(PATH_ARCHIVE_SEP)
    }

    #[inline(always)]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Name for the root entity of a tree built from `path`: its final component once made
/// absolute.
pub fn root_name<P: AsRef<Path>>(path: P) -> std::io::Result<String> {
    let canonical = path.as_ref().canonicalize()?;
    canonical
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("'{}' has no UTF-8 file name", canonical.display()),
            )
        })
}

impl fmt::Display for ArchivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
