//! Error types for container patching.
//!
//! All fallible functions in this crate return [`Result<T>`], which uses [`Error`]
//! as the error type. `std::io::Error` converts automatically; ZIP errors are
//! split into [`Error::ArchiveFormat`] (the input is not a readable container) and
//! [`Error::Zip`] (writing a new container failed).

use camino::Utf8PathBuf;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while extracting, patching or repacking a container.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem I/O failed (staging, backup, temp output, swap).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The input file could not be opened as a ZIP archive.
    #[error("Not a valid ZIP container: {0}")]
    ArchiveFormat(#[source] zip::result::ZipError),

    /// Writing the repacked ZIP archive failed.
    #[error("ZIP error: {0}")]
    Zip(#[source] zip::result::ZipError),

    /// An entry name would resolve outside of the staging directory.
    #[error("Unsafe entry path in container: {0}")]
    UnsafeEntryPath(String),

    /// A caller supplied an unusable argument (e.g. an empty search pattern).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A path produced by the OS is not valid UTF-8.
    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    /// The backup copy could not be created; nothing was modified.
    #[error("Failed to create backup {path}: {source}")]
    Backup {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::Io(err.into())
    }
}
