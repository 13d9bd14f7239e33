/// Why a string can't be used as an [`ArchivePath`](super::ArchivePath) or one of its components.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchivePathError {
    #[error("path has no components")]
    Empty,

    #[error("path has an empty component")]
    EmptyComponent,

    #[error("component '{0}' refers to the current or parent directory")]
    DotComponent(String),

    #[error("component '{0}' contains the path separator")]
    Separator(String),

    #[error("component {0:?} contains a control character")]
    ControlCharacter(String),
}
