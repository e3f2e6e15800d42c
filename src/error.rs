use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;
use walkdir::Error as WalkDirError;

use crate::archive;

#[derive(Debug)]
pub enum SyncError {
    IoError(io::Error),
    /// An io error with a description of what was being attempted.
    DescribedIoError(io::Error, String),
    /// A subtree of one replica could not be listed.
    Discovery(String),
    /// A name carries the conflict marker but not the conflict-copy shape.
    MalformedConflictName(String),
    /// A planned action failed to execute.
    Propagation { path: String, reason: String },
    /// The server capabilities could not be queried.
    CapabilityUnavailable(String),
    /// Two entries of one listing share a path.
    DuplicateEntry(String),
    /// A listing entry whose parent directory is not part of the listing.
    OrphanedEntry(String),
    InvalidPath(String),
    /// An action was not attempted because an action it depends on did not succeed.
    DependencyFailed(String),
    DependencyCycle(String),
    /// The path no longer matches the state it was classified with.
    PathModified(String),
    /// Another run holds the lock on this archive.
    AlreadyRunning(PathBuf),
    ArchiveReadError(archive::ReadError),
    ArchiveWriteError(archive::WriteError),
    /// The requested operation was cancelled before it could be completed.
    Cancelled,
    WalkDirError(WalkDirError),
}

impl SyncError {
    /// True for errors that indicate the input trees themselves are inconsistent.
    pub fn is_structural(&self) -> bool {
        match *self {
            SyncError::DuplicateEntry(_) | SyncError::DependencyCycle(_) => true,
            _ => false,
        }
    }
}

impl From<io::Error> for SyncError {
    fn from(e: io::Error) -> Self {
        SyncError::IoError(e)
    }
}

impl From<archive::ReadError> for SyncError {
    fn from(e: archive::ReadError) -> Self {
        SyncError::ArchiveReadError(e)
    }
}

impl From<archive::WriteError> for SyncError {
    fn from(e: archive::WriteError) -> Self {
        SyncError::ArchiveWriteError(e)
    }
}

impl From<WalkDirError> for SyncError {
    fn from(e: WalkDirError) -> Self {
        SyncError::WalkDirError(e)
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SyncError::IoError(ref io) => write!(f, "io error: {}", io),
            SyncError::DescribedIoError(ref io, ref context) => write!(f, "io error: {} ({})", io, context),
            SyncError::Discovery(ref path) => write!(f, "the subtree at {:?} could not be listed", path),
            SyncError::MalformedConflictName(ref path) => write!(f, "{:?} looks like a conflict copy but is not one", path),
            SyncError::Propagation { ref path, ref reason } => write!(f, "failed to propagate {:?}: {}", path, reason),
            SyncError::CapabilityUnavailable(ref reason) => write!(f, "server capabilities unavailable: {}", reason),
            SyncError::DuplicateEntry(ref path) => write!(f, "the listing contains {:?} more than once", path),
            SyncError::OrphanedEntry(ref path) => write!(f, "the parent directory of {:?} is not part of the listing", path),
            SyncError::InvalidPath(ref path) => write!(f, "the path {:?} is invalid (hint: paths must be relative, slash separated and without empty, '.' or '..' components)", path),
            SyncError::DependencyFailed(ref path) => write!(f, "an action that {:?} depends on did not succeed", path),
            SyncError::DependencyCycle(ref path) => write!(f, "the actions for {:?} depend on each other", path),
            SyncError::PathModified(ref path) => write!(f, "the file/directory at {:?} was modified by another application", path),
            SyncError::AlreadyRunning(ref path) => write!(f, "another sync run holds the archive at {:?}", path),
            SyncError::ArchiveReadError(ref e) => write!(f, "archive read error: {:?}", e),
            SyncError::ArchiveWriteError(ref e) => write!(f, "archive write error: {:?}", e),
            SyncError::Cancelled => write!(f, "operation cancelled"),
            SyncError::WalkDirError(ref e) => write!(f, "walk dir error: {:?}", e),
        }
    }
}

impl Error for SyncError {}

/// Attaches a description to an io error.
pub trait DescribeIoError<T> {
    fn describe<F: FnOnce() -> String>(self, describe: F) -> Result<T, SyncError>;
}

impl<T> DescribeIoError<T> for io::Result<T> {
    fn describe<F: FnOnce() -> String>(self, describe: F) -> Result<T, SyncError> {
        self.map_err(|e| SyncError::DescribedIoError(e, describe()))
    }
}
