use crate::state::EntryState;
use crate::Side;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// The result of `reconciliation` for a single path.
pub enum Operation {
    /// both replicas agree with each other and with the baseline
    InSync,
    /// both replicas made the same change
    Converged,
    /// the provided replica was correct
    PropagateFromMaster(Side),
    /// the item was changed on both replicas, to different states
    ItemChangedOnBothReplicas,
}

/// Determines which replica (if any) has the most up-to-date copy of the item.
///
/// A change is anything that differs from the baseline. When one side
/// deleted the item and the other modified it, the modification wins.
pub fn guess_operation(baseline: Option<&EntryState>, local: &EntryState, remote: &EntryState) -> Operation {
    if local == remote {
        return match baseline {
            Some(previous) if previous != local => Operation::Converged,
            _ => Operation::InSync,
        };
    }

    let (local_changed, remote_changed) = match baseline {
        Some(previous) => (local != previous, remote != previous),
        None => (local.entry_exists(), remote.entry_exists()),
    };
    trace!("Changed: local {}, remote {}", local_changed, remote_changed);

    match (local_changed, remote_changed) {
        (true, false) => Operation::PropagateFromMaster(Side::Local),
        (false, true) => Operation::PropagateFromMaster(Side::Remote),
        _ => {
            if !local.entry_exists() {
                debug!("Deleted locally but changed remotely, keeping the remote change");
                Operation::PropagateFromMaster(Side::Remote)
            } else if !remote.entry_exists() {
                debug!("Deleted remotely but changed locally, keeping the local change");
                Operation::PropagateFromMaster(Side::Local)
            } else {
                Operation::ItemChangedOnBothReplicas
            }
        }
    }
}
