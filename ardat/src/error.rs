use std::path::PathBuf;

use miette::Diagnostic;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum Error {
    #[error("Cannot create archive `{}`", .path.display())]
    CreateArchive {
        path: PathBuf,
        #[source]
        source: ardat_format::Error,
    },

    #[error("Cannot extract archive `{}`", .path.display())]
    #[diagnostic(help("Is this a valid .ardat file?"))]
    Extract {
        path: PathBuf,
        #[source]
        source: ardat_format::Error,
    },

    #[error("Cannot list archive `{}`", .path.display())]
    #[diagnostic(help("Is this a valid .ardat file?"))]
    List {
        path: PathBuf,
        #[source]
        source: ardat_format::Error,
    },

    #[error("Cannot create output directory `{}`", .path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot start worker pool")]
    ThreadPool {
        #[source]
        source: rayon::ThreadPoolBuildError,
    },

    #[error("Cowardly refusing to archive `{}` into itself", .path.display())]
    #[diagnostic(help("Write the archive outside the source directory"))]
    ArchiveInsideSource { path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_carry_the_cause_chain() {
        let error = Error::List {
            path: PathBuf::from("a.ardat"),
            source: ardat_format::Error::ArchiveCorrupted("bad signature".into()),
        };
        let report = miette::Report::new(error);
        let causes: Vec<String> = report.chain().map(|e| e.to_string()).collect();
        assert_eq!(
            causes,
            ["Cannot list archive `a.ardat`", "Archive corrupted: bad signature"]
        );
        assert_eq!(
            report.help().map(|h| h.to_string()).as_deref(),
            Some("Is this a valid .ardat file?")
        );
    }
}
