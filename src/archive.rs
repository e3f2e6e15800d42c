//! The baseline: what each path looked like the last time both replicas agreed.
//!
//! `Baseline` is the in-memory view used by a run. `BaselineStore` is the
//! persistence collaborator; `Archive` is a file backed store keeping one
//! file per directory.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::iter::FromIterator;
use std::path::{Path, PathBuf};

use crate::error::{DescribeIoError, SyncError};
use crate::state::{BaselineEntry, EntryState};
use crate::util::{hash_single, parent_path, FnvHashMap};

const ARCHIVE_VERSION: u32 = 1;
const LOCK_FILE: &str = "lock";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    entries: FnvHashMap<String, EntryState>,
}

impl Baseline {
    pub fn new() -> Self {
        Baseline::default()
    }

    /// The recorded state, `None` if the path has never been seen in sync.
    pub fn get(&self, path: &str) -> Option<&EntryState> {
        self.entries.get(path)
    }

    pub fn insert<S: Into<String>>(&mut self, path: S, state: EntryState) {
        let path = path.into();
        if state.entry_exists() {
            self.entries.insert(path, state);
        } else {
            self.entries.remove(&path);
        }
    }

    pub fn remove(&mut self, path: &str) -> Option<EntryState> {
        self.entries.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|path| path.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = BaselineEntry> + '_ {
        self.entries
            .iter()
            .map(|(path, state)| BaselineEntry::new(path.clone(), state.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<BaselineEntry> for Baseline {
    fn from_iter<I: IntoIterator<Item = BaselineEntry>>(iter: I) -> Self {
        let mut baseline = Baseline::new();
        for entry in iter {
            baseline.insert(entry.path, entry.state);
        }
        baseline
    }
}

/// Persists the baseline between runs.
///
/// `record` and `forget` are called once per confirmed action, so a run that
/// is interrupted leaves every completed path recorded.
pub trait BaselineStore {
    fn load(&mut self) -> Result<Baseline, SyncError>;

    fn record(&mut self, entry: &BaselineEntry) -> Result<(), SyncError>;

    fn forget(&mut self, path: &str) -> Result<(), SyncError>;
}

impl BaselineStore for Baseline {
    fn load(&mut self) -> Result<Baseline, SyncError> {
        Ok(self.clone())
    }

    fn record(&mut self, entry: &BaselineEntry) -> Result<(), SyncError> {
        self.insert(entry.path.clone(), entry.state.clone());
        Ok(())
    }

    fn forget(&mut self, path: &str) -> Result<(), SyncError> {
        self.remove(path);
        Ok(())
    }
}

/// A baseline store on disk.
///
/// Entries are grouped by parent directory, one file per directory, named by
/// the hash of the directory path. Holding an `Archive` holds an exclusive
/// lock on it.
#[derive(Debug)]
pub struct Archive {
    directory: PathBuf,
    lock: File,
}

impl Archive {
    pub fn open(directory: PathBuf) -> Result<Self, SyncError> {
        if !directory.exists() {
            fs::create_dir_all(&directory).describe(|| format!("creating archive directory {:?}", directory))?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(directory.join(LOCK_FILE))?;
        if let Err(e) = lock.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(SyncError::AlreadyRunning(directory));
            }
            return Err(e.into());
        }
        debug!("Opened archive {:?}", directory);
        Ok(Archive { directory, lock })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn file_for_directory(&self, directory: &str) -> PathBuf {
        self.directory.join(hash_single(directory).to_string())
    }

    fn read_file(path: &Path) -> Result<Vec<BaselineEntry>, ReadError> {
        let mut file = File::open(path)?;
        match read_entries(&mut file) {
            Err(ReadError::InvalidVersion(version)) => {
                info!("Archive file {:?} using outdated version ({})", path, version);
                Ok(Vec::new())
            }
            result => result,
        }
    }

    fn entries_for_directory(&self, directory: &str) -> Result<Vec<BaselineEntry>, ReadError> {
        let archive_file = self.file_for_directory(directory);
        if archive_file.exists() {
            Archive::read_file(&archive_file)
        } else {
            Ok(Vec::new())
        }
    }

    fn write_entries_for_directory(&self, directory: &str, entries: &[BaselineEntry]) -> Result<(), WriteError> {
        let archive_file = self.file_for_directory(directory);

        if entries.is_empty() {
            if archive_file.exists() {
                debug!("Removing archive file {:?} (all entries gone)", archive_file);
                fs::remove_file(archive_file)?;
            }
            return Ok(());
        }

        trace!("Writing archive file {:?}", archive_file);
        let temporary = archive_file.with_extension("tmp");
        {
            let mut file = File::create(&temporary)?;
            write_entries(&mut file, entries)?;
            file.sync_all()?;
        }
        fs::rename(temporary, archive_file)?;
        Ok(())
    }

    fn update<F>(&mut self, path: &str, update: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut Vec<BaselineEntry>),
    {
        let directory = parent_path(path).unwrap_or("");
        let mut entries = self.entries_for_directory(directory)?;
        update(&mut entries);
        self.write_entries_for_directory(directory, &entries)?;
        Ok(())
    }
}

impl BaselineStore for Archive {
    fn load(&mut self) -> Result<Baseline, SyncError> {
        let mut baseline = Baseline::new();
        for item in fs::read_dir(&self.directory)? {
            let item = item?;
            let path = item.path();
            let is_archive_file = item.file_type()?.is_file()
                && path.extension().is_none()
                && item.file_name() != LOCK_FILE;
            if !is_archive_file {
                continue;
            }
            for entry in Archive::read_file(&path)? {
                baseline.insert(entry.path, entry.state);
            }
        }
        info!("Loaded {} baseline entries from {:?}", baseline.len(), self.directory);
        Ok(baseline)
    }

    fn record(&mut self, entry: &BaselineEntry) -> Result<(), SyncError> {
        if !entry.state.entry_exists() {
            return self.forget(&entry.path);
        }
        self.update(&entry.path, |entries| {
            match entries.iter_mut().find(|existing| existing.path == entry.path) {
                Some(existing) => existing.state = entry.state.clone(),
                None => entries.push(entry.clone()),
            }
        })
    }

    fn forget(&mut self, path: &str) -> Result<(), SyncError> {
        self.update(path, |entries| entries.retain(|existing| existing.path != path))
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            warn!("Failed to unlock archive {:?}: {}", self.directory, e);
        }
    }
}

#[derive(Debug)]
pub enum ReadError {
    InvalidVersion(u32),
    IoError(io::Error),
    DeserializeError(bincode::Error),
}

impl From<bincode::Error> for ReadError {
    fn from(e: bincode::Error) -> Self {
        ReadError::DeserializeError(e)
    }
}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        ReadError::IoError(e)
    }
}

#[derive(Debug)]
pub enum WriteError {
    IoError(io::Error),
    SerializeError(bincode::Error),
}

impl From<bincode::Error> for WriteError {
    fn from(e: bincode::Error) -> Self {
        WriteError::SerializeError(e)
    }
}

impl From<io::Error> for WriteError {
    fn from(e: io::Error) -> Self {
        WriteError::IoError(e)
    }
}

/// reads a set of entries from a binary stream
fn read_entries<R: io::Read>(read: &mut R) -> Result<Vec<BaselineEntry>, ReadError> {
    let version = read.read_u32::<LittleEndian>()?;
    if version != ARCHIVE_VERSION {
        return Err(ReadError::InvalidVersion(version));
    }
    Ok(bincode::deserialize_from(read)?)
}

// writes a set of entries to a binary stream
fn write_entries<W: io::Write>(out: &mut W, entries: &[BaselineEntry]) -> Result<(), WriteError> {
    out.write_u32::<LittleEndian>(ARCHIVE_VERSION)?;
    bincode::serialize_into(out, entries)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_survive_the_binary_format() {
        let entries = vec![
            BaselineEntry::new("A", EntryState::Directory),
            BaselineEntry::new("A/a1", EntryState::file("abc", 12)),
        ];
        let mut buffer = Vec::new();
        write_entries(&mut buffer, &entries).unwrap();
        assert_eq!(read_entries(&mut &buffer[..]).unwrap(), entries);
    }

    #[test]
    fn outdated_versions_are_rejected() {
        let mut buffer = Vec::new();
        buffer.write_u32::<LittleEndian>(ARCHIVE_VERSION + 1).unwrap();
        match read_entries(&mut &buffer[..]) {
            Err(ReadError::InvalidVersion(version)) => assert_eq!(version, ARCHIVE_VERSION + 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_states_are_not_recorded() {
        let mut baseline = Baseline::new();
        baseline.insert("A/a1", EntryState::file("abc", 12));
        baseline.insert("A/a1", EntryState::Empty);
        assert!(baseline.get("A/a1").is_none());
        assert!(baseline.is_empty());
    }

    #[test]
    fn archive_records_and_forgets_entries() {
        let directory = tempfile::tempdir().unwrap();
        let mut archive = Archive::open(directory.path().join("archive")).unwrap();
        archive.record(&BaselineEntry::new("A", EntryState::Directory)).unwrap();
        archive.record(&BaselineEntry::new("A/a1", EntryState::file("abc", 12))).unwrap();
        archive.record(&BaselineEntry::new("A/a2", EntryState::file("def", 12))).unwrap();
        archive.record(&BaselineEntry::new("A/a1", EntryState::file("xyz", 13))).unwrap();
        archive.forget("A/a2").unwrap();

        let baseline = archive.load().unwrap();
        assert_eq!(baseline.len(), 2);
        assert_eq!(baseline.get("A"), Some(&EntryState::Directory));
        assert_eq!(baseline.get("A/a1"), Some(&EntryState::file("xyz", 13)));
        assert!(baseline.get("A/a2").is_none());
    }

    #[test]
    fn archive_survives_reopening() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("archive");
        {
            let mut archive = Archive::open(path.clone()).unwrap();
            archive.record(&BaselineEntry::new("top", EntryState::file("abc", 1))).unwrap();
        }
        let mut archive = Archive::open(path).unwrap();
        assert_eq!(archive.load().unwrap().get("top"), Some(&EntryState::file("abc", 1)));
    }

    #[test]
    fn second_archive_on_the_same_directory_is_refused() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("archive");
        let _first = Archive::open(path.clone()).unwrap();
        match Archive::open(path) {
            Err(SyncError::AlreadyRunning(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
