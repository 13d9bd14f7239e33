//! Mapping between filesystem attributes and entity properties.
//!
//! Timestamps are stored as milliseconds since the Unix epoch, the unix permission bits in octal,
//! and every `user.*` extended attribute under its name without the namespace.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::entity::ENCODING_KEY;
use crate::error::{Error, Result};
use crate::meta::{ArchiveEntityProperty, Metadata};

pub const MODIFY_TIME: &str = "modify-time";
pub const ACCESS_TIME: &str = "access-time";
pub const UNIX_MODE: &str = "unix.mode";

/// Namespace of the extended attributes carried as plain properties.
pub const XATTR_PREFIX: &str = "user.";

fn millis(time: std::io::Result<SystemTime>) -> Option<String> {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis().to_string())
}

/// Reads the properties of the entry at `path`. Extended attributes that can't be represented as a
/// property line, or whose line would be too long for an archive header, are skipped.
pub fn read_properties(path: &Path, meta: &std::fs::Metadata) -> Result<Metadata> {
    let mut builder = Metadata::builder();

    if let Some(modified) = millis(meta.modified()) {
        builder.add_property(MODIFY_TIME, modified)?;
    }
    if let Some(accessed) = millis(meta.accessed()) {
        builder.add_property(ACCESS_TIME, accessed)?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        builder.add_property(UNIX_MODE, format!("{:o}", meta.permissions().mode() & 0o7777))?;

        let names = match xattr::list(path) {
            Ok(names) => names,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "extended attributes unavailable");
                return Ok(builder.build());
            }
        };
        for name in names {
            let key = match name.to_str().and_then(|n| n.strip_prefix(XATTR_PREFIX)) {
                Some(key) => key.to_string(),
                None => continue,
            };
            let value = match xattr::get(path, &name) {
                Ok(Some(value)) => value,
                _ => continue,
            };
            let property = String::from_utf8(value)
                .ok()
                .and_then(|value| ArchiveEntityProperty::new(key.as_str(), value).ok());
            match property {
                Some(property) if !is_reserved(property.key()) && property.fits_line() => {
                    let (key, value) = property.into_pair();
                    builder.add_property(key, value)?;
                }
                _ => {
                    tracing::debug!(path = %path.display(), key = %key, "skipping extended attribute");
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = path;

    Ok(builder.build())
}

fn is_reserved(key: &str) -> bool {
    key == MODIFY_TIME || key == ACCESS_TIME || key == UNIX_MODE || key == ENCODING_KEY
}

fn parse_millis(key: &str, value: &str) -> Result<SystemTime> {
    value
        .parse::<u64>()
        .map(|ms| UNIX_EPOCH + Duration::from_millis(ms))
        .map_err(|_| Error::InvalidProperty {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Applies `properties` to the entry at `path`: extended attributes first, then timestamps, and
/// the permission bits last so a read-only mode doesn't block the rest.
pub fn apply_properties(path: &Path, properties: &Metadata) -> Result<()> {
    let mut times = std::fs::FileTimes::new();
    let mut has_times = false;
    let mut mode = None;

    for property in properties.properties() {
        match property.key() {
            MODIFY_TIME => {
                times = times.set_modified(parse_millis(property.key(), property.value())?);
                has_times = true;
            }
            ACCESS_TIME => {
                times = times.set_accessed(parse_millis(property.key(), property.value())?);
                has_times = true;
            }
            UNIX_MODE => {
                let bits = u32::from_str_radix(property.value(), 8).map_err(|_| {
                    Error::InvalidProperty {
                        key: property.key().to_string(),
                        value: property.value().to_string(),
                    }
                })?;
                mode = Some(bits);
            }
            #[cfg(unix)]
            key => {
                let name = format!("{}{}", XATTR_PREFIX, key);
                xattr::set(path, name, property.value().as_bytes())?;
            }
            #[cfg(not(unix))]
            key => {
                tracing::debug!(path = %path.display(), key = %key, "no place for property on this platform");
            }
        }
    }

    if has_times {
        std::fs::File::open(path)?.set_times(times)?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(bits) = mode {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(bits))?;
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}
