#[macro_use]
extern crate log;

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod archive;
pub mod capability;
pub mod config;
pub mod conflict;
pub mod detect;
pub mod engine;
pub mod error;
pub mod listing;
pub mod propagate;
pub mod reconcile;
pub mod report;
pub mod state;
pub mod tree;
pub mod util;

pub use crate::engine::SyncEngine;
pub use crate::error::SyncError;

/// One of the two replicas taking part in a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Local,
    Remote,
}

impl Side {
    /// The replica on the other end of the pair.
    pub fn other(self) -> Side {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}
