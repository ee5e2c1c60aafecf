//! Error types.
//!
//! Nothing in this crate panics on bad input: every failure kind is a variant here and travels back to the caller as
//! a `Result`.  Whether an event is additionally raised is controlled by the `notify` flags on the cache.
use std::io::Error as IoError;
use std::path::PathBuf;

/// Failure to open a package archive.  An archive which fails to open is never registered.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("not a package archive (bad magic {0:?})")]
    BadMagic([u8; 4]),
    #[error("package header or entry table is truncated")]
    Truncated,
    #[error("entry {index} has a name which is not valid UTF-8")]
    InvalidName { index: u32 },
    #[error("compressed flag has invalid value {0}")]
    InvalidFlag(u8),
    #[error("entry {name} (offset {offset}, size {size}) lies outside the {archive_size} byte archive")]
    EntryOutOfBounds {
        name: String,
        offset: u64,
        size: u32,
        archive_size: u64,
    },
    #[error(transparent)]
    Io(IoError),
}

impl From<IoError> for ArchiveError {
    fn from(e: IoError) -> ArchiveError {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ArchiveError::Truncated
        } else {
            ArchiveError::Io(e)
        }
    }
}

/// Failure reported by a [crate::ResourceLoader] during either phase of a load.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("empty resource name")]
    EmptyName,
    #[error("access denied to {0}")]
    AccessDenied(PathBuf),
    #[error("could not find resource {0}")]
    NotFound(String),
    #[error("request for {0} was denied by a resource router")]
    RouterDenied(String),
    #[error("failed to load resource {name}")]
    ParseFailure {
        name: String,
        #[source]
        source: LoadError,
    },
    #[error("no loader registered for resource type {0}")]
    UnknownType(crate::ResourceType),
    #[error("resource {name} is not of the requested concrete type")]
    TypeMismatch { name: String },
    #[error("registry access is only allowed from the main thread")]
    NotMainThread,
    #[error("background loader has shut down; could not queue {0}")]
    LoaderShutDown(String),
    #[error(transparent)]
    ArchiveCorrupt(#[from] ArchiveError),
    #[error(transparent)]
    Io(#[from] IoError),
}
