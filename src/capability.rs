//! Server advertised feature flags.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::iter::FromIterator;

use crate::error::SyncError;

pub const UPLOAD_CONFLICT_FILES: &str = "uploadConflictFiles";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl From<bool> for CapabilityValue {
    fn from(value: bool) -> Self {
        CapabilityValue::Bool(value)
    }
}

/// The capabilities advertised by the server for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    values: BTreeMap<String, CapabilityValue>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        CapabilitySet::default()
    }

    pub fn insert<K: Into<String>, V: Into<CapabilityValue>>(&mut self, name: K, value: V) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityValue> {
        self.values.get(name)
    }

    /// Unknown or non-boolean flags read as false.
    pub fn flag(&self, name: &str) -> bool {
        match self.values.get(name) {
            Some(&CapabilityValue::Bool(value)) => value,
            _ => false,
        }
    }

    pub fn upload_conflict_files(&self) -> bool {
        self.flag(UPLOAD_CONFLICT_FILES)
    }
}

impl<K: Into<String>, V: Into<CapabilityValue>> FromIterator<(K, V)> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = CapabilitySet::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

/// Supplies the server capabilities.
pub trait CapabilityQuery {
    fn query(&self) -> Result<CapabilitySet, SyncError>;
}

impl CapabilityQuery for CapabilitySet {
    fn query(&self) -> Result<CapabilitySet, SyncError> {
        Ok(self.clone())
    }
}

/// The capability decisions for one run, read once before planning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityGate {
    upload_conflict_files: bool,
}

impl CapabilityGate {
    pub fn new(capabilities: &CapabilitySet) -> Self {
        CapabilityGate {
            upload_conflict_files: capabilities.upload_conflict_files(),
        }
    }

    /// Queries the capabilities, falling back to a closed gate if the query fails.
    pub fn from_query<Q: CapabilityQuery + ?Sized>(query: &Q) -> Self {
        match query.query() {
            Ok(capabilities) => CapabilityGate::new(&capabilities),
            Err(e) => {
                warn!("{}; conflict files will not be uploaded", SyncError::CapabilityUnavailable(e.to_string()));
                CapabilityGate::default()
            }
        }
    }

    pub fn upload_conflict_files(&self) -> bool {
        self.upload_conflict_files
    }
}
