use serde::{Deserialize, Serialize};
use std::thread;

use crate::archive::Baseline;
use crate::config::SyncInfo;
use crate::conflict::{classify_name, ConflictName};
use crate::error::SyncError;
use crate::reconcile::{guess_operation, Operation};
use crate::state::EntryState;
use crate::tree::ReplicaTree;
use crate::util::{ancestors, is_descendant, is_within, preorder_cmp, FnvHashSet};
use crate::Side;

mod rename;

/// What has to happen to a single path for the replicas to agree again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Both replicas match the baseline, or match each other without one.
    Unchanged { path: String, state: EntryState },
    /// Both replicas made the same change.
    ConvergedIndependently { path: String, state: EntryState },
    /// Only the local replica changed. `previous` is the current remote state.
    PropagateToRemote { path: String, state: EntryState, previous: EntryState },
    /// Only the remote replica changed. `previous` is the current local state.
    PropagateToLocal { path: String, state: EntryState, previous: EntryState },
    /// `from` was moved to `to` on `side`.
    Renamed { side: Side, from: String, to: String, state: EntryState },
    /// Both replicas changed to different states.
    Conflict {
        path: String,
        baseline: Option<EntryState>,
        local: EntryState,
        remote: EntryState,
    },
}

impl Outcome {
    /// Builds the outcome that copies `state` onto `destination`.
    pub fn propagation(destination: Side, path: String, state: EntryState, previous: EntryState) -> Outcome {
        match destination {
            Side::Remote => Outcome::PropagateToRemote { path, state, previous },
            Side::Local => Outcome::PropagateToLocal { path, state, previous },
        }
    }

    /// The path this outcome is keyed by; the destination for renames.
    pub fn path(&self) -> &str {
        match *self {
            Outcome::Unchanged { ref path, .. }
            | Outcome::ConvergedIndependently { ref path, .. }
            | Outcome::PropagateToRemote { ref path, .. }
            | Outcome::PropagateToLocal { ref path, .. }
            | Outcome::Conflict { ref path, .. } => path,
            Outcome::Renamed { ref to, .. } => to,
        }
    }

    /// The replica this outcome changes, together with the new state and the
    /// state it replaces.
    pub fn propagates_to(&self) -> Option<(Side, &EntryState, &EntryState)> {
        match *self {
            Outcome::PropagateToRemote { ref state, ref previous, .. } => Some((Side::Remote, state, previous)),
            Outcome::PropagateToLocal { ref state, ref previous, .. } => Some((Side::Local, state, previous)),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match *self {
            Outcome::Conflict { .. } => true,
            _ => false,
        }
    }

    /// True if nothing needs to be transferred for this path.
    pub fn is_in_sync(&self) -> bool {
        match *self {
            Outcome::Unchanged { .. } | Outcome::ConvergedIndependently { .. } => true,
            _ => false,
        }
    }
}

/// A path that was left out of the run.
#[derive(Debug)]
pub struct SkippedPath {
    pub path: String,
    pub reason: SyncError,
}

#[derive(Debug, Default)]
/// Basic statistics about the classification.
pub struct DetectionStatistics {
    /// Paths that went through the three way comparison.
    pub evaluated: usize,
    /// Paths inside subtrees that were identical on both replicas and in the baseline.
    pub converged_hits: usize,
    pub ignored: usize,
}

/// The result of change classification.
#[derive(Debug, Default)]
pub struct DetectionResult {
    /// One outcome per path, directories before their descendants.
    pub outcomes: Vec<Outcome>,
    pub skipped: Vec<SkippedPath>,
    /// Names carrying the conflict marker that are not conflict copies.
    pub malformed_names: Vec<String>,
    pub statistics: DetectionStatistics,
}

impl DetectionResult {
    pub fn outcome_for(&self, path: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|outcome| outcome.path() == path)
    }
}

/// Compares both replicas against the baseline and decides an outcome for
/// every path present in any of them.
///
/// Classification is read-only. Paths that cannot be classified safely are
/// reported in `skipped` and left out, everything else is classified.
pub fn classify(local: &ReplicaTree, remote: &ReplicaTree, baseline: &Baseline, config: &SyncInfo) -> DetectionResult {
    let mut result = DetectionResult::default();

    let skip_roots = collect_skip_roots(local, remote, &mut result.skipped);

    let mut paths: Vec<&str> = local
        .paths()
        .into_iter()
        .chain(remote.paths())
        .chain(baseline.paths())
        .collect();
    paths.sort_by(|a, b| preorder_cmp(a, b));
    paths.dedup();

    paths.retain(|path| {
        if config.ignore.is_ignored(path) {
            trace!("Ignoring entry {:?}", path);
            result.statistics.ignored += 1;
            false
        } else {
            !skip_roots.iter().any(|root| is_within(path, root))
        }
    });

    for path in &paths {
        if classify_name(path) == ConflictName::Malformed {
            debug!("{}", SyncError::MalformedConflictName(path.to_string()));
            result.malformed_names.push(path.to_string());
        }
    }

    let converged_roots = find_converged_roots(local, remote, baseline);
    info!(
        "Classifying {} paths ({} identical subtrees)",
        paths.len(),
        converged_roots.len()
    );

    let decide = |path: &&str| -> (Outcome, bool) {
        let local_state = local.state(path);
        let remote_state = remote.state(path);
        let previous = baseline.get(path);

        let converged = local_state.entry_exists()
            && previous == Some(&local_state)
            && (converged_roots.contains(*path) || ancestors(path).any(|a| converged_roots.contains(a)));
        if converged {
            return (
                Outcome::Unchanged {
                    path: path.to_string(),
                    state: local_state,
                },
                true,
            );
        }

        let outcome = match guess_operation(previous, &local_state, &remote_state) {
            Operation::InSync => Outcome::Unchanged {
                path: path.to_string(),
                state: local_state,
            },
            Operation::Converged => Outcome::ConvergedIndependently {
                path: path.to_string(),
                state: local_state,
            },
            Operation::PropagateFromMaster(Side::Local) => {
                Outcome::propagation(Side::Remote, path.to_string(), local_state, remote_state)
            }
            Operation::PropagateFromMaster(Side::Remote) => {
                Outcome::propagation(Side::Local, path.to_string(), remote_state, local_state)
            }
            Operation::ItemChangedOnBothReplicas => {
                debug!("Conflict at {:?}: local {}, remote {}", path, local_state, remote_state);
                Outcome::Conflict {
                    path: path.to_string(),
                    baseline: previous.cloned(),
                    local: local_state,
                    remote: remote_state,
                }
            }
        };
        (outcome, false)
    };

    let decisions: Vec<(Outcome, bool)> = if config.classify_threads > 1 && paths.len() > config.classify_threads {
        let chunk_size = (paths.len() + config.classify_threads - 1) / config.classify_threads;
        let decide = &decide;
        thread::scope(|scope| {
            let workers: Vec<_> = paths
                .chunks(chunk_size)
                .map(|chunk| scope.spawn(move || chunk.iter().map(decide).collect::<Vec<_>>()))
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| worker.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        })
    } else {
        paths.iter().map(decide).collect()
    };

    let mut outcomes = Vec::with_capacity(decisions.len());
    for (outcome, converged) in decisions {
        if converged {
            result.statistics.converged_hits += 1;
        } else {
            result.statistics.evaluated += 1;
        }
        outcomes.push(outcome);
    }

    protect_directories(&mut outcomes);
    let mut outcomes = settle_conflict_subtrees(outcomes, remote);

    if config.detect_renames {
        outcomes = rename::pair_renames(outcomes, baseline);
        outcomes.sort_by(|a, b| preorder_cmp(a.path(), b.path()));
    }

    result.outcomes = outcomes;
    result
}

/// Paths that must not be classified: subtrees that could not be listed and
/// entries that could not be placed in their tree.
fn collect_skip_roots(local: &ReplicaTree, remote: &ReplicaTree, skipped: &mut Vec<SkippedPath>) -> Vec<String> {
    let mut roots = Vec::new();
    for tree in [local, remote].iter() {
        for path in tree.unreadable() {
            warn!("Skipping {:?}: the subtree could not be listed", path);
            skipped.push(SkippedPath {
                path: path.clone(),
                reason: SyncError::Discovery(path.clone()),
            });
            roots.push(path.clone());
        }
        for rejected in tree.rejected() {
            warn!("Skipping {:?}: {}", rejected.path, rejected.reason);
            let reason = match rejected.reason {
                SyncError::InvalidPath(ref path) => SyncError::InvalidPath(path.clone()),
                SyncError::Discovery(ref path) => SyncError::Discovery(path.clone()),
                _ => SyncError::OrphanedEntry(rejected.path.clone()),
            };
            skipped.push(SkippedPath {
                path: rejected.path.clone(),
                reason,
            });
            roots.push(rejected.path.clone());
        }
    }
    roots
}

/// Directories that are identical on both replicas, down to every
/// fingerprint, and recorded as directories in the baseline.
fn find_converged_roots<'a>(local: &'a ReplicaTree, remote: &ReplicaTree, baseline: &Baseline) -> FnvHashSet<&'a str> {
    let mut roots = FnvHashSet::default();
    let mut stack: Vec<_> = local.root().children().collect();
    while let Some(node) = stack.pop() {
        if !node.is_directory() {
            continue;
        }
        let identical = baseline.get(node.path()) == Some(&EntryState::Directory)
            && remote.get(node.path()).map_or(false, |other| node.converged_with(other));
        if identical {
            roots.insert(node.path());
        } else {
            stack.extend(node.children());
        }
    }
    roots
}

/// The index range of the outcomes below `outcomes[index]`.
fn descendant_range(outcomes: &[Outcome], index: usize) -> std::ops::Range<usize> {
    let path = outcomes[index].path();
    let mut end = index + 1;
    while end < outcomes.len() && is_descendant(outcomes[end].path(), path) {
        end += 1;
    }
    index + 1..end
}

/// Keeps a directory alive when removing it would destroy content that
/// still has to reach the other replica.
fn protect_directories(outcomes: &mut Vec<Outcome>) {
    for index in 0..outcomes.len() {
        let (removing_side, replacement) = match outcomes[index].propagates_to() {
            Some((side, state, previous)) if previous.is_directory() && !state.is_directory() => (side, state.clone()),
            _ => continue,
        };
        let keeping_side = removing_side.other();
        let content_below = outcomes[descendant_range(outcomes, index)].iter().any(|outcome| {
            outcome.is_conflict()
                || match outcome.propagates_to() {
                    Some((side, state, _)) => side == keeping_side && state.entry_exists(),
                    None => false,
                }
        });
        if !content_below {
            continue;
        }

        let path = outcomes[index].path().to_owned();
        outcomes[index] = if replacement.entry_exists() {
            info!("{:?} was replaced on the {} replica but has new content below it", path, keeping_side);
            let (local, remote) = match removing_side {
                Side::Local => (EntryState::Directory, replacement),
                Side::Remote => (replacement, EntryState::Directory),
            };
            Outcome::Conflict {
                path,
                baseline: Some(EntryState::Directory),
                local,
                remote,
            }
        } else {
            info!("{:?} was removed on the {} replica but has new content below it", path, keeping_side);
            Outcome::propagation(keeping_side, path, EntryState::Directory, EntryState::Empty)
        };
    }
}

/// The remote replica is canonical below a conflict: a local directory that
/// conflicts is moved away with its content, and a remote directory that
/// conflicts with a local file is downloaded entirely.
fn settle_conflict_subtrees(outcomes: Vec<Outcome>, remote: &ReplicaTree) -> Vec<Outcome> {
    let mut settled = Vec::with_capacity(outcomes.len());
    let mut index = 0;
    while index < outcomes.len() {
        let range = descendant_range(&outcomes, index);
        settled.push(outcomes[index].clone());
        match outcomes[index] {
            Outcome::Conflict { ref path, ref local, .. } if local.is_directory() => {
                debug!("Leaving {} entries below {:?} to its conflict copy", range.len(), path);
                index = range.end;
                continue;
            }
            Outcome::Conflict { remote: ref remote_state, .. } if remote_state.is_directory() => {
                for outcome in &outcomes[range.clone()] {
                    let path = outcome.path();
                    let state = remote.state(path);
                    settled.push(if state.entry_exists() {
                        Outcome::PropagateToLocal {
                            path: path.to_owned(),
                            state,
                            previous: EntryState::Empty,
                        }
                    } else {
                        outcome.clone()
                    });
                }
                index = range.end;
                continue;
            }
            _ => {}
        }
        index += 1;
    }
    settled
}
