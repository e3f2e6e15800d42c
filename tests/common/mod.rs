//! An in-memory pair of replicas driven through the public engine.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::io;

use duplex::archive::Baseline;
use duplex::capability::{CapabilitySet, UPLOAD_CONFLICT_FILES};
use duplex::config::SyncInfo;
use duplex::conflict::{is_conflict_copy, SequenceDiscriminator};
use duplex::listing::fingerprint_bytes;
use duplex::propagate::{Transport, TransferRequest};
use duplex::report::RunReport;
use duplex::state::EntryKind;
use duplex::tree::{Listing, ListingEntry};
use duplex::util::{ancestors, is_within, parent_path};
use duplex::{Side, SyncEngine, SyncError};

/// `None` is a directory.
pub type Contents = BTreeMap<String, Option<Vec<u8>>>;

pub struct FakeFolder {
    local: RefCell<Contents>,
    remote: RefCell<Contents>,
    baseline: RefCell<Baseline>,
    capabilities: RefCell<CapabilitySet>,
    /// Conflict copy uploads seen so far, base path to copy path.
    pub conflict_map: RefCell<BTreeMap<String, String>>,
    failing: RefCell<BTreeSet<(Side, String)>>,
    refuse_removals: Cell<bool>,
    runs: Cell<u64>,
}

fn injected(path: &str) -> SyncError {
    SyncError::DescribedIoError(io::Error::new(io::ErrorKind::Other, "injected failure"), path.to_owned())
}

impl FakeFolder {
    pub fn new(contents: Contents) -> Self {
        let folder = FakeFolder {
            local: RefCell::new(contents.clone()),
            remote: RefCell::new(contents),
            baseline: RefCell::new(Baseline::new()),
            capabilities: RefCell::new(CapabilitySet::new()),
            conflict_map: RefCell::new(BTreeMap::new()),
            failing: RefCell::new(BTreeSet::new()),
            refuse_removals: Cell::new(false),
            runs: Cell::new(0),
        };
        let report = folder.sync_once();
        assert!(report.is_clean());
        assert!(report.actions().is_empty());
        folder
    }

    /// Directories `A`, `B`, `C` and `S`, each holding two distinct 12 byte files.
    pub fn a12_b12_c12_s12() -> Contents {
        let mut contents = Contents::new();
        for directory in &["A", "B", "C", "S"] {
            contents.insert(directory.to_string(), None);
            for index in 1..3 {
                let name = format!("{}{}", directory.to_lowercase(), index);
                let body = name.as_bytes().iter().cycle().take(12).cloned().collect();
                contents.insert(format!("{}/{}", directory, name), Some(body));
            }
        }
        contents
    }

    fn side(&self, side: Side) -> &RefCell<Contents> {
        match side {
            Side::Local => &self.local,
            Side::Remote => &self.remote,
        }
    }

    pub fn state(&self, side: Side) -> Contents {
        self.side(side).borrow().clone()
    }

    pub fn baseline(&self) -> Baseline {
        self.baseline.borrow().clone()
    }

    pub fn set_capability(&self, name: &str, value: bool) {
        self.capabilities.borrow_mut().insert(name, value);
    }

    pub fn allow_conflict_uploads(&self) {
        self.set_capability(UPLOAD_CONFLICT_FILES, true);
    }

    pub fn fail(&self, side: Side, path: &str) {
        self.failing.borrow_mut().insert((side, path.to_owned()));
    }

    pub fn clear_failures(&self) {
        self.failing.borrow_mut().clear();
    }

    pub fn refuse_removals(&self, refuse: bool) {
        self.refuse_removals.set(refuse);
    }

    // Modifiers, applied behind the engine's back.

    pub fn insert(&self, side: Side, path: &str, size: usize, fill: u8) {
        self.side(side).borrow_mut().insert(path.to_owned(), Some(vec![fill; size]));
    }

    pub fn mkdir(&self, side: Side, path: &str) {
        self.side(side).borrow_mut().insert(path.to_owned(), None);
    }

    pub fn set_contents(&self, side: Side, path: &str, fill: u8) {
        let mut contents = self.side(side).borrow_mut();
        let body = contents.get_mut(path).and_then(|body| body.as_mut()).expect("file to modify");
        for byte in body.iter_mut() {
            *byte = fill;
        }
    }

    pub fn append_byte(&self, side: Side, path: &str) {
        let mut contents = self.side(side).borrow_mut();
        let body = contents.get_mut(path).and_then(|body| body.as_mut()).expect("file to modify");
        let fill = body.last().cloned().unwrap_or(b'W');
        body.push(fill);
    }

    pub fn delete(&self, side: Side, path: &str) {
        self.side(side).borrow_mut().retain(|existing, _| !is_within(existing, path));
    }

    pub fn move_path(&self, side: Side, from: &str, to: &str) {
        let mut contents = self.side(side).borrow_mut();
        let moved: Vec<String> = contents.keys().filter(|p| is_within(p, from)).cloned().collect();
        for path in moved {
            let body = contents.remove(&path).expect("listed path");
            contents.insert(format!("{}{}", to, &path[from.len()..]), body);
        }
    }

    pub fn listing(&self, side: Side) -> Listing {
        let entries = self
            .side(side)
            .borrow()
            .iter()
            .map(|(path, body)| match *body {
                Some(ref body) => ListingEntry::file(path.clone(), fingerprint_bytes(body), body.len() as u64),
                None => ListingEntry::directory(path.clone()),
            })
            .collect();
        Listing::new(entries)
    }

    pub fn engine(&self) -> SyncEngine<&FakeFolder> {
        self.runs.set(self.runs.get() + 1);
        SyncEngine::new(SyncInfo::new("me"), self)
            .with_discriminator(SequenceDiscriminator::starting_at(self.runs.get() * 1000))
    }

    pub fn sync_with_listings(&self, engine: &SyncEngine<&FakeFolder>, local: &Listing, remote: &Listing) -> Result<RunReport, SyncError> {
        let capabilities = self.capabilities.borrow().clone();
        let mut baseline = self.baseline.borrow_mut();
        engine.sync_once(local, remote, &mut *baseline, &capabilities)
    }

    pub fn sync_with(&self, engine: &SyncEngine<&FakeFolder>) -> RunReport {
        let local = self.listing(Side::Local);
        let remote = self.listing(Side::Remote);
        self.sync_with_listings(engine, &local, &remote).expect("sync run")
    }

    pub fn sync_once(&self) -> RunReport {
        let engine = self.engine();
        self.sync_with(&engine)
    }

    fn check(&self, side: Side, path: &str) -> Result<(), SyncError> {
        if self.failing.borrow().contains(&(side, path.to_owned())) {
            return Err(injected(path));
        }
        Ok(())
    }

    fn check_parent(contents: &Contents, path: &str) -> Result<(), SyncError> {
        match parent_path(path) {
            Some(parent) => match contents.get(parent) {
                Some(None) => Ok(()),
                _ => Err(SyncError::OrphanedEntry(path.to_owned())),
            },
            None => Ok(()),
        }
    }
}

impl Transport for FakeFolder {
    fn make_directory(&self, side: Side, path: &str, conflict_file_for: Option<&str>) -> Result<(), SyncError> {
        self.check(side, path)?;
        let mut contents = self.side(side).borrow_mut();
        FakeFolder::check_parent(&contents, path)?;
        if contents.contains_key(path) {
            return Err(SyncError::PathModified(path.to_owned()));
        }
        contents.insert(path.to_owned(), None);
        if let Some(base) = conflict_file_for {
            self.conflict_map.borrow_mut().insert(base.to_owned(), path.to_owned());
        }
        Ok(())
    }

    fn transfer(&self, request: &TransferRequest) -> Result<(), SyncError> {
        self.check(request.destination, &request.path)?;
        let body = match self.side(request.source()).borrow().get(&request.path) {
            Some(&Some(ref body)) if fingerprint_bytes(body) == request.fingerprint.as_str() => body.clone(),
            _ => return Err(SyncError::PathModified(request.path.clone())),
        };

        let mut contents = self.side(request.destination).borrow_mut();
        FakeFolder::check_parent(&contents, &request.path)?;
        if let Some(&None) = contents.get(&request.path) {
            return Err(SyncError::PathModified(request.path.clone()));
        }
        contents.insert(request.path.clone(), Some(body));

        for (name, value) in request.headers() {
            if name == "OC-ConflictFileFor" {
                self.conflict_map.borrow_mut().insert(value, request.path.clone());
            }
        }
        Ok(())
    }

    fn remove(&self, side: Side, path: &str, kind: EntryKind) -> Result<(), SyncError> {
        self.check(side, path)?;
        let mut contents = self.side(side).borrow_mut();
        match (contents.get(path), kind) {
            (Some(&Some(_)), EntryKind::File) => {}
            (Some(&None), EntryKind::Directory) => {
                if contents.keys().any(|existing| ancestors(existing).any(|a| a == path)) {
                    return Err(SyncError::PathModified(path.to_owned()));
                }
            }
            _ => return Err(SyncError::PathModified(path.to_owned())),
        }
        contents.remove(path);
        Ok(())
    }

    fn rename(&self, side: Side, from: &str, to: &str) -> Result<(), SyncError> {
        self.check(side, to)?;
        {
            let contents = self.side(side).borrow();
            if !contents.contains_key(from) || contents.contains_key(to) {
                return Err(SyncError::PathModified(from.to_owned()));
            }
            FakeFolder::check_parent(&contents, to)?;
        }
        self.move_path(side, from, to);
        Ok(())
    }

    fn should_remove(&self, _side: Side, _path: &str) -> bool {
        !self.refuse_removals.get()
    }
}

/// Drops every conflict copy, and everything below one.
pub fn without_conflict_copies(contents: &Contents) -> Contents {
    contents
        .iter()
        .filter(|&(path, _)| !is_conflict_copy(path) && !ancestors(path).any(is_conflict_copy))
        .map(|(path, body)| (path.clone(), body.clone()))
        .collect()
}

/// The conflict copies of `base` on one side.
pub fn conflict_copies_of(contents: &Contents, base: &str) -> Vec<String> {
    contents
        .keys()
        .filter(|path| duplex::conflict::parse_base(path).as_ref().map(|b| b.as_str()) == Some(base))
        .cloned()
        .collect()
}

pub fn assert_converged(folder: &FakeFolder) {
    assert_eq!(folder.state(Side::Local), folder.state(Side::Remote));
}

pub fn assert_converged_ignoring_conflicts(folder: &FakeFolder) {
    assert_eq!(
        without_conflict_copies(&folder.state(Side::Local)),
        without_conflict_copies(&folder.state(Side::Remote))
    );
}
