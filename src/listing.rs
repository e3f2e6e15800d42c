//! Builds a `Listing` from a directory on the local filesystem.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

use crate::config::Ignore;
use crate::error::{DescribeIoError, SyncError};
use crate::tree::{Listing, ListingEntry};

const BUFFER_SIZE: usize = 64 * 1024;

/// The slash separated path of `path` below `root`, `None` if it cannot be
/// represented.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut components = Vec::new();
    for component in relative.components() {
        components.push(component.as_os_str().to_str()?);
    }
    Some(components.join("/"))
}

/// The fingerprint of an in-memory file body, equal to what `fingerprint_file`
/// computes for a file with these contents.
pub fn fingerprint_bytes(contents: &[u8]) -> String {
    blake3::hash(contents).to_hex().to_string()
}

/// Hashes the contents of a file, returning the hex digest and the number of bytes read.
pub fn fingerprint_file(path: &Path) -> Result<(String, u64), SyncError> {
    let mut file = File::open(path).describe(|| format!("opening {:?}", path))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0; BUFFER_SIZE];
    let mut size = 0;
    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SyncError::DescribedIoError(e, format!("reading {:?}", path))),
        };
        hasher.update(&buffer[..read]);
        size += read as u64;
    }
    Ok((hasher.finalize().to_hex().to_string(), size))
}

fn list_entry(root: &Path, entry: &DirEntry, relative: String) -> Result<ListingEntry, SyncError> {
    if entry.file_type().is_dir() {
        return Ok(ListingEntry::directory(relative));
    }
    let expected = entry.metadata()?.len();
    let (fingerprint, size) = fingerprint_file(entry.path())?;
    if size != expected {
        return Err(SyncError::PathModified(relative));
    }
    trace!("Listed {:?} below {:?} ({} bytes)", relative, root, size);
    Ok(ListingEntry::file(relative, fingerprint, size))
}

/// Lists every file and directory below `root`.
///
/// Ignored subtrees are not entered. Entries that cannot be read are
/// reported as unreadable instead of failing the listing; only a missing or
/// unreadable `root` is an error.
pub fn scan_directory(root: &Path, ignore: &Ignore) -> Result<Listing, SyncError> {
    root.metadata().describe(|| format!("reading replica root {:?}", root))?;

    let mut listing = Listing::default();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_entry(|entry| match relative_path(root, entry.path()) {
            Some(relative) => !ignore.is_ignored(&relative),
            None => true,
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let unreadable = e.path().and_then(|path| relative_path(root, path));
                warn!("Could not list {:?}: {}", unreadable, e);
                match unreadable {
                    Some(path) if !path.is_empty() => listing.unreadable.push(path),
                    _ => return Err(e.into()),
                }
                continue;
            }
        };
        if entry.file_type().is_symlink() {
            debug!("Not following symlink {:?}", entry.path());
            continue;
        }
        let relative = match relative_path(root, entry.path()) {
            Some(relative) => relative,
            None => {
                warn!("Skipping {:?}: the name is not valid unicode", entry.path());
                continue;
            }
        };
        match list_entry(root, &entry, relative.clone()) {
            Ok(listed) => listing.entries.push(listed),
            Err(e) => {
                warn!("Could not list {:?}: {}", relative, e);
                listing.unreadable.push(relative);
            }
        }
    }

    info!(
        "Listed {} entries below {:?} ({} unreadable)",
        listing.entries.len(),
        root,
        listing.unreadable.len()
    );
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use std::fs;

    #[test]
    fn directory_contents_are_listed_with_fingerprints() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("A")).unwrap();
        fs::write(root.path().join("A/a1"), b"hello world!").unwrap();
        fs::write(root.path().join("top"), b"").unwrap();

        let listing = scan_directory(root.path(), &Ignore::nothing()).unwrap();
        assert!(listing.unreadable.is_empty());
        assert_eq!(
            listing.entries,
            vec![
                ListingEntry::directory("A"),
                ListingEntry::file("A/a1", fingerprint_bytes(b"hello world!"), 12),
                ListingEntry::file("top", fingerprint_bytes(b""), 0),
            ]
        );
    }

    #[test]
    fn ignored_subtrees_are_not_entered() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("build")).unwrap();
        fs::write(root.path().join("build/out"), b"x").unwrap();
        fs::write(root.path().join("notes.tmp"), b"x").unwrap();
        fs::write(root.path().join("notes"), b"x").unwrap();

        let mut ignore = Ignore::nothing();
        ignore.paths.push("build".to_owned());
        ignore.regexes.push(Regex::new(r"\.tmp$").unwrap());

        let listing = scan_directory(root.path(), &ignore).unwrap();
        let paths: Vec<_> = listing.entries.iter().map(|entry| entry.path.as_str()).collect();
        assert_eq!(paths, vec!["notes"]);
    }

    #[test]
    fn fingerprints_tell_apart_same_sized_contents() {
        let root = tempfile::tempdir().unwrap();
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(root.path().join("big"), &body).unwrap();

        let (fingerprint, size) = fingerprint_file(&root.path().join("big")).unwrap();
        assert_eq!(size, body.len() as u64);
        assert_eq!(fingerprint, fingerprint_bytes(&body));
        assert_eq!(fingerprint.len(), 64);

        let mut changed = body.clone();
        changed[123_456] ^= 1;
        assert_ne!(fingerprint_bytes(&changed), fingerprint);
    }

    #[test]
    fn missing_root_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(scan_directory(&root.path().join("missing"), &Ignore::nothing()).is_err());
    }
}
