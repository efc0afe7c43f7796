//! Error types for archive operations.
//!
//! Every public operation returns [`Result<T>`], an alias for
//! `Result<T, Error>`.  Errors carry the path of the object that caused them
//! wherever one is known.
//!
//! # Error Categories
//!
//! - **Traversal and I/O**: [`Io`], [`Walk`]
//! - **Extended attributes**: [`XattrsChanged`], [`EmptyXattrValue`], [`InvalidXattrName`]
//! - **Payload integrity**: [`SizeMismatch`]
//! - **Entry types**: [`Unrepresentable`], [`UnsupportedEntry`], [`UnsafePath`], [`IdOutOfRange`]
//! - **Codec**: [`Read`], [`Finalize`]
//!
//! [`Io`]: Error::Io
//! [`Walk`]: Error::Walk
//! [`XattrsChanged`]: Error::XattrsChanged
//! [`EmptyXattrValue`]: Error::EmptyXattrValue
//! [`InvalidXattrName`]: Error::InvalidXattrName
//! [`SizeMismatch`]: Error::SizeMismatch
//! [`Unrepresentable`]: Error::Unrepresentable
//! [`UnsupportedEntry`]: Error::UnsupportedEntry
//! [`UnsafePath`]: Error::UnsafePath
//! [`IdOutOfRange`]: Error::IdOutOfRange
//! [`Read`]: Error::Read
//! [`Finalize`]: Error::Finalize

use std::{ffi::OsString, io, path::PathBuf};

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on a specific filesystem object or archive.
    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Directory traversal failed.  The walkdir error names the offending path.
    #[error("traversal failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// The two observations of a two-phase xattr size query disagreed.
    #[error("{path:?}: extended attributes changed during retrieval")]
    XattrsChanged { path: PathBuf },

    /// A listed extended attribute reported a zero-length value.
    #[error("{path:?}: no valid value found for extended attribute {name:?}")]
    EmptyXattrValue { path: PathBuf, name: OsString },

    /// Extended attribute names are carried as PAX keys and must be UTF-8.
    #[error("{path:?}: extended attribute name {name:?} is not valid UTF-8")]
    InvalidXattrName { path: PathBuf, name: OsString },

    /// The number of payload bytes copied differs from the declared size.
    #[error("{path:?}: expected {expected} bytes, copied {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// The filesystem object has no tar representation (e.g. a socket).
    #[error("{path:?}: file type cannot be represented in a tar archive")]
    Unrepresentable { path: PathBuf },

    /// The archive contains an entry type that cannot be restored.
    #[error("{path:?}: unsupported entry type {kind}")]
    UnsupportedEntry { path: PathBuf, kind: String },

    /// The archive records a uid or gid that doesn't fit the platform's id type.
    #[error("{path:?}: owner id {id} out of range")]
    IdOutOfRange { path: PathBuf, id: u64 },

    /// The entry name would resolve outside of the destination directory.
    #[error("{path:?}: entry escapes the destination directory")]
    UnsafePath { path: PathBuf },

    /// The archive stream itself could not be read or decoded.
    #[error("failed to read archive: {0}")]
    Read(#[source] io::Error),

    /// Writing the archive footer or flushing the output failed.
    #[error("failed to finalize archive: {0}")]
    Finalize(#[source] io::Error),
}

/// Attaches a path to a bare `io::Error`.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}

impl<T> IoContext<T> for rustix::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|errno| Error::Io {
            path: path.into(),
            source: errno.into(),
        })
    }
}
