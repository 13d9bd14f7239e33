use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Archive corrupted: {0}")]
    ArchiveCorrupted(String),

    #[error("Channel is closed.")]
    ClosedChannel,

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Entity is not a directory. Name: '{0}'")]
    NotADirectory(String),

    #[error("Entity is not a file. Name: '{0}'")]
    NotAFile(String),

    #[error("Entity name already taken by a sibling. Name: '{0}'")]
    DuplicateEntity(String),

    #[error("Entity cannot be attached here. Name: '{0}'")]
    InvalidHierarchy(String),

    #[error("Invalid entity name: '{0}'")]
    InvalidName(String),

    #[error("Invalid property value. Key: '{key}', value: '{value}'")]
    InvalidProperty { key: String, value: String },

    #[error("Record header is too large: {0}")]
    HeaderTooLarge(String),

    #[error("Tree root has already been assigned.")]
    RootAlreadySet,

    #[error("Tree has no root.")]
    EmptyTree,

    #[error("Processing entity failed. Path: '{path}'")]
    Entity {
        path: String,
        #[source]
        source: Box<Error>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("Range [{start}, {start}+{size}) lies outside the descriptor extent of {extent} bytes.")]
    OutOfBounds { start: u64, size: u64, extent: u64 },

    #[error("Request of {requested} bytes exceeds the declared size of {limit} bytes.")]
    Exceeded { requested: u64, limit: u64 },
}

impl Error {
    pub(crate) fn corrupted<S: fmt::Display>(msg: S) -> Error {
        Error::ArchiveCorrupted(msg.to_string())
    }

    /// Annotates the error with the path of the entity being processed. Already annotated
    /// errors are left untouched so the innermost path wins.
    pub fn within<S: fmt::Display>(self, path: S) -> Error {
        match self {
            e @ Error::Entity { .. } => e,
            e => Error::Entity {
                path: path.to_string(),
                source: Box::new(e),
            },
        }
    }

    /// The error with any entity annotation stripped.
    pub fn innermost(&self) -> &Error {
        match self {
            Error::Entity { source, .. } => source.innermost(),
            e => e,
        }
    }

    /// The path of the entity the error was raised for, if annotated.
    pub fn entity_path(&self) -> Option<&str> {
        match self {
            Error::Entity { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn as_io_error(&self) -> std::io::Error {
        use std::io::ErrorKind;

        let kind = match self.innermost() {
            Error::Io(e) => e.kind(),
            Error::ArchiveCorrupted(_)
            | Error::InvalidProperty { .. }
            | Error::HeaderTooLarge(_) => ErrorKind::InvalidData,
            Error::Range(_) | Error::InvalidName(_) => ErrorKind::InvalidInput,
            Error::ClosedChannel => ErrorKind::NotConnected,
            Error::DuplicateEntity(_) => ErrorKind::AlreadyExists,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, self.to_string())
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            e => e.as_io_error(),
        }
    }
}
