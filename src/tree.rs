//! Immutable snapshot of one replica's directory hierarchy.
//!
//! A tree is built once per run from the full listing handed over by the
//! listing collaborator and is never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::SyncError;
use crate::state::{EntryState, Fingerprint};
use crate::util::file_name;

/// One `(path, is_directory, fingerprint, size)` tuple of a replica listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub path: String,
    pub is_directory: bool,
    pub fingerprint: Option<Fingerprint>,
    pub size: u64,
}

impl ListingEntry {
    pub fn file<P: Into<String>, F: Into<String>>(path: P, fingerprint: F, size: u64) -> Self {
        ListingEntry {
            path: path.into(),
            is_directory: false,
            fingerprint: Some(Fingerprint::new(fingerprint)),
            size,
        }
    }

    pub fn directory<P: Into<String>>(path: P) -> Self {
        ListingEntry {
            path: path.into(),
            is_directory: true,
            fingerprint: None,
            size: 0,
        }
    }
}

/// The full listing of one replica.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Listing {
    pub entries: Vec<ListingEntry>,
    /// Directories whose contents could not be listed.
    pub unreadable: Vec<String>,
}

impl Listing {
    pub fn new(entries: Vec<ListingEntry>) -> Self {
        Listing {
            entries,
            unreadable: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaNode {
    path: String,
    is_directory: bool,
    fingerprint: Option<Fingerprint>,
    size: u64,
    children: BTreeMap<String, ReplicaNode>,
}

impl ReplicaNode {
    fn root() -> Self {
        ReplicaNode {
            path: String::new(),
            is_directory: true,
            fingerprint: None,
            size: 0,
            children: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        file_name(&self.path)
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The children of a directory, ordered by name. Files have none.
    pub fn children(&self) -> impl Iterator<Item = &ReplicaNode> {
        self.children.values()
    }

    pub fn child(&self, name: &str) -> Option<&ReplicaNode> {
        self.children.get(name)
    }

    pub fn state(&self) -> EntryState {
        match self.fingerprint {
            Some(ref fingerprint) if !self.is_directory => EntryState::File {
                fingerprint: fingerprint.clone(),
                size: self.size,
            },
            _ => EntryState::Directory,
        }
    }

    /// True if both nodes hold the same content: equal files, or directories
    /// with the same child names whose children are recursively converged.
    pub fn converged_with(&self, other: &ReplicaNode) -> bool {
        if self.is_directory != other.is_directory {
            return false;
        }
        if !self.is_directory {
            return self.fingerprint == other.fingerprint && self.size == other.size;
        }
        self.children.len() == other.children.len()
            && self.children.iter().zip(other.children.iter()).all(|((name_a, a), (name_b, b))| {
                name_a == name_b && a.converged_with(b)
            })
    }
}

/// A listing entry that could not be placed into the tree.
#[derive(Debug)]
pub struct RejectedEntry {
    pub path: String,
    pub reason: SyncError,
}

#[derive(Debug)]
pub struct ReplicaTree {
    root: ReplicaNode,
    unreadable: Vec<String>,
    rejected: Vec<RejectedEntry>,
    len: usize,
}

impl ReplicaTree {
    /// Builds the tree for a listing.
    ///
    /// Entries without a parent directory, with an invalid path, or files
    /// without a fingerprint are rejected individually. A path listed twice
    /// means the listing itself is broken and fails the whole tree.
    pub fn from_listing(listing: &Listing) -> Result<ReplicaTree, SyncError> {
        let mut tree = ReplicaTree {
            root: ReplicaNode::root(),
            unreadable: listing.unreadable.clone(),
            rejected: Vec::new(),
            len: 0,
        };

        let mut entries: Vec<&ListingEntry> = listing.entries.iter().collect();
        entries.sort_by_key(|entry| entry.path.matches('/').count());

        for entry in entries {
            if !is_valid_path(&entry.path) {
                warn!("Rejecting listing entry with invalid path {:?}", entry.path);
                tree.reject(&entry.path, SyncError::InvalidPath(entry.path.clone()));
                continue;
            }
            if !entry.is_directory && entry.fingerprint.is_none() {
                warn!("Rejecting file {:?} without a fingerprint", entry.path);
                tree.reject(&entry.path, SyncError::Discovery(entry.path.clone()));
                continue;
            }
            tree.insert(entry)?;
        }

        debug!("Built tree with {} entries ({} rejected)", tree.len, tree.rejected.len());
        Ok(tree)
    }

    fn reject(&mut self, path: &str, reason: SyncError) {
        self.rejected.push(RejectedEntry {
            path: path.to_owned(),
            reason,
        });
    }

    fn insert(&mut self, entry: &ListingEntry) -> Result<(), SyncError> {
        let mut components: Vec<&str> = entry.path.split('/').collect();
        let name = match components.pop() {
            Some(name) => name,
            None => return Ok(()),
        };

        let mut parent = &mut self.root;
        for component in components {
            parent = match parent.children.get_mut(component) {
                Some(node) if node.is_directory => node,
                _ => {
                    trace!("No parent directory for {:?}", entry.path);
                    self.rejected.push(RejectedEntry {
                        path: entry.path.clone(),
                        reason: SyncError::OrphanedEntry(entry.path.clone()),
                    });
                    return Ok(());
                }
            };
        }

        if parent.children.contains_key(name) {
            return Err(SyncError::DuplicateEntry(entry.path.clone()));
        }

        parent.children.insert(
            name.to_owned(),
            ReplicaNode {
                path: entry.path.clone(),
                is_directory: entry.is_directory,
                fingerprint: if entry.is_directory { None } else { entry.fingerprint.clone() },
                size: if entry.is_directory { 0 } else { entry.size },
                children: BTreeMap::new(),
            },
        );
        self.len += 1;
        Ok(())
    }

    pub fn root(&self) -> &ReplicaNode {
        &self.root
    }

    pub fn get(&self, path: &str) -> Option<&ReplicaNode> {
        if path.is_empty() {
            return Some(&self.root);
        }
        let mut node = &self.root;
        for component in path.split('/') {
            node = node.children.get(component)?;
        }
        Some(node)
    }

    /// The state of `path` in this tree, `EntryState::Empty` if it is not present.
    pub fn state(&self, path: &str) -> EntryState {
        match self.get(path) {
            Some(node) if !path.is_empty() => node.state(),
            _ => EntryState::Empty,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        !path.is_empty() && self.get(path).is_some()
    }

    /// Every node except the root, directories before their descendants.
    pub fn nodes(&self) -> Vec<&ReplicaNode> {
        let mut result = Vec::with_capacity(self.len);
        let mut stack: Vec<&ReplicaNode> = self.root.children.values().rev().collect();
        while let Some(node) = stack.pop() {
            result.push(node);
            stack.extend(node.children.values().rev());
        }
        result
    }

    /// Every path in pre-order.
    pub fn paths(&self) -> Vec<&str> {
        self.nodes().into_iter().map(|node| node.path()).collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn unreadable(&self) -> &[String] {
        &self.unreadable
    }

    pub fn rejected(&self) -> &[RejectedEntry] {
        &self.rejected
    }
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .split('/')
            .all(|component| !component.is_empty() && component != "." && component != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Listing {
        Listing::new(vec![
            ListingEntry::file("A/a2", "2", 12),
            ListingEntry::directory("A"),
            ListingEntry::file("A/a1", "1", 12),
            ListingEntry::directory("B"),
        ])
    }

    #[test]
    fn lookups_return_none_for_missing_paths() {
        let tree = ReplicaTree::from_listing(&listing()).unwrap();
        assert!(tree.get("A/a3").is_none());
        assert!(tree.get("A/a1/x").is_none());
        assert_eq!(tree.state("A/a3"), EntryState::Empty);
        assert_eq!(tree.state("A/a1"), EntryState::file("1", 12));
        assert_eq!(tree.state("A"), EntryState::Directory);
    }

    #[test]
    fn paths_are_in_preorder() {
        let tree = ReplicaTree::from_listing(&listing()).unwrap();
        assert_eq!(tree.paths(), vec!["A", "A/a1", "A/a2", "B"]);
        let names: Vec<&str> = tree.get("A").unwrap().children().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a1", "a2"]);
    }

    #[test]
    fn orphans_are_rejected_individually() {
        let mut listing = listing();
        listing.entries.push(ListingEntry::file("C/c1", "3", 1));
        listing.entries.push(ListingEntry::file("A/a1/inner", "4", 1));
        listing.entries.push(ListingEntry::file("A/../x", "5", 1));
        let tree = ReplicaTree::from_listing(&listing).unwrap();
        assert_eq!(tree.len(), 4);
        let rejected: Vec<&str> = tree.rejected().iter().map(|r| r.path.as_str()).collect();
        assert_eq!(rejected.len(), 3);
        assert!(rejected.contains(&"C/c1"));
        assert!(rejected.contains(&"A/a1/inner"));
        assert!(rejected.contains(&"A/../x"));
    }

    #[test]
    fn duplicates_fail_the_tree() {
        let mut listing = listing();
        listing.entries.push(ListingEntry::file("A/a1", "other", 3));
        match ReplicaTree::from_listing(&listing) {
            Err(SyncError::DuplicateEntry(path)) => assert_eq!(path, "A/a1"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn convergence_compares_whole_subtrees() {
        let a = ReplicaTree::from_listing(&listing()).unwrap();
        let b = ReplicaTree::from_listing(&listing()).unwrap();
        assert!(a.get("A").unwrap().converged_with(b.get("A").unwrap()));

        let mut changed = listing();
        changed.entries[0] = ListingEntry::file("A/a2", "changed", 12);
        let c = ReplicaTree::from_listing(&changed).unwrap();
        assert!(!a.get("A").unwrap().converged_with(c.get("A").unwrap()));
        assert!(a.get("B").unwrap().converged_with(c.get("B").unwrap()));
    }
}
