//! Unified error types for the engine core.
//!
//! Each component returns its own error enum; `EngineError` is the umbrella
//! used at the request-loop boundary. Workers never let an `Io` escape past
//! the error-policy dialog, so `OpError` carries the user's decision states
//! as well.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Structural path errors. No filesystem access is ever attempted by the
/// operations that return these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Parse or structural rejection.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Relative input without a usable context.
    #[error("incomplete path: {0}")]
    IncompletePath(String),

    /// UNC input named a server but no share.
    #[error("share name missing: {0}")]
    ShareNameMissing(String),

    /// `..` popped past the root.
    #[error("path is invalid: {0}")]
    PathIsInvalid(String),

    /// Composed path exceeds the platform limit.
    #[error("name too long: {0}")]
    NameTooLong(String),

    /// `cut_last_segment` on a root.
    #[error("path has no shorter form")]
    NoShorter,

    /// Mask group could not be parsed.
    #[error("invalid mask: {0}")]
    BadMask(String),
}

/// Errors from path sources: disks, shares, archives, plugin file systems.
#[derive(Debug, Error)]
pub enum FsError {
    /// Filesystem or plugin declined access.
    #[error("path not accessible: {path}")]
    NotAccessible {
        path: String,
        #[source]
        source: Option<io::Error>,
    },

    /// Path resolved to a file whose extension is not a registered archive.
    #[error("not an archive: {0}")]
    NotAnArchive(String),

    /// FS name has no registered provider.
    #[error("no plugin registered for fs name '{0}'")]
    NoSuchPlugin(String),

    /// Provider refused a non-forced close probe.
    #[error("plugin refused to close path: {0}")]
    PluginRefusedClose(String),

    /// Provider failed to produce a listing.
    #[error("listing failed: {0}")]
    Listing(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    pub fn not_accessible(path: impl Into<String>) -> Self {
        FsError::NotAccessible {
            path: path.into(),
            source: None,
        }
    }

    pub fn not_accessible_io(path: impl Into<String>, source: io::Error) -> Self {
        FsError::NotAccessible {
            path: path.into(),
            source: Some(source),
        }
    }
}

/// Disk-cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache workspace error: {0}")]
    Workspace(#[source] io::Error),

    /// `publish` could not move the producer file into the workspace.
    #[error("failed to adopt {path}: {source}")]
    Adopt {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Classification of primitive failures inside a bulk operation, used by the
/// per-operation `ignore_all` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpErrorKind {
    Access,
    Read,
    Write,
    Create,
    Delete,
    Attr,
    NameTooLong,
    Other,
}

/// Terminal states of a bulk-operation worker.
#[derive(Debug, Error)]
pub enum OpError {
    /// User aborted via ESC or Cancel.
    #[error("operation cancelled by user")]
    UserCancel,

    /// Cooperative cancel reached the worker.
    #[error("operation interrupted")]
    Interrupted,

    /// Composed target exceeded the platform limit and the policy did not
    /// skip it.
    #[error("target name too long: {0}")]
    NameTooLong(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl OpError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        OpError::Io {
            path: path.into(),
            source,
        }
    }

    /// Map to the kind consulted by the `ignore_all` policy set.
    pub fn kind(&self) -> OpErrorKind {
        match self {
            OpError::NameTooLong(_) => OpErrorKind::NameTooLong,
            OpError::Io { source, .. } => match source.kind() {
                io::ErrorKind::PermissionDenied => OpErrorKind::Access,
                io::ErrorKind::NotFound => OpErrorKind::Read,
                _ => OpErrorKind::Other,
            },
            _ => OpErrorKind::Other,
        }
    }
}

/// Umbrella error for the engine request loop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Operation(#[from] OpError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
