use serde::{Deserialize, Serialize};
use std::fmt;

/// A comparable content identity token (a hash, an etag or similar).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Fingerprint(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Mirrors the state of a path on one replica.
pub enum EntryState {
    Empty,
    Directory,
    File { fingerprint: Fingerprint, size: u64 },
}

impl EntryState {
    pub fn file<S: Into<String>>(fingerprint: S, size: u64) -> Self {
        EntryState::File {
            fingerprint: Fingerprint::new(fingerprint),
            size,
        }
    }

    /// Returns true if the entries are equal in type but not necessarily in content.
    pub fn equal_ty(a: &EntryState, b: &EntryState) -> bool {
        a.kind() == b.kind()
    }

    pub fn kind(&self) -> Option<EntryKind> {
        match *self {
            EntryState::Empty => None,
            EntryState::Directory => Some(EntryKind::Directory),
            EntryState::File { .. } => Some(EntryKind::File),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind() == Some(EntryKind::File)
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == Some(EntryKind::Directory)
    }

    /// Returns true if the entry is present (ie: it is not empty)
    pub fn entry_exists(&self) -> bool {
        *self != EntryState::Empty
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match *self {
            EntryState::File { ref fingerprint, .. } => Some(fingerprint),
            _ => None,
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            EntryState::Empty => write!(f, "<absent>"),
            EntryState::Directory => write!(f, "<directory>"),
            EntryState::File { ref fingerprint, size } => write!(f, "{} ({} bytes)", fingerprint, size),
        }
    }
}

/// The state of a path as of the last run in which both replicas agreed on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub path: String,
    pub state: EntryState,
}

impl BaselineEntry {
    pub fn new<S: Into<String>>(path: S, state: EntryState) -> Self {
        BaselineEntry {
            path: path.into(),
            state,
        }
    }
}
