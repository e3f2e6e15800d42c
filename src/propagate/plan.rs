//! Turns classified outcomes into an ordered list of actions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::archive::Baseline;
use crate::capability::CapabilityGate;
use crate::conflict::{is_conflict_copy, parse_base, ConflictRecord, Discriminator};
use crate::detect::Outcome;
use crate::error::SyncError;
use crate::state::{BaselineEntry, EntryKind, EntryState, Fingerprint};
use crate::tree::ReplicaTree;
use crate::util::{ancestors, is_descendant, FnvHashMap, FnvHashSet};
use crate::Side;

/// The metadata header naming the file a conflict copy stands in for.
pub const CONFLICT_FILE_FOR_HEADER: &str = "OC-ConflictFileFor";

/// A whole-file transfer onto `destination`, from the other replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub destination: Side,
    pub path: String,
    pub fingerprint: Fingerprint,
    pub size: u64,
    /// Set for uploads of conflict copies: the path of the file it stands in for.
    pub conflict_file_for: Option<String>,
}

impl TransferRequest {
    pub fn source(&self) -> Side {
        self.destination.other()
    }

    /// The metadata headers sent along with the transfer.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self.conflict_file_for {
            Some(ref base) => vec![(CONFLICT_FILE_FOR_HEADER, base.clone())],
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// `conflict_file_for` is set when the directory is an uploaded conflict copy.
    MakeDirectory {
        side: Side,
        path: String,
        conflict_file_for: Option<String>,
    },
    Transfer(TransferRequest),
    /// Removes a single entry; directories are expected to be empty by then.
    Remove { side: Side, path: String, kind: EntryKind },
    Move { side: Side, from: String, to: String },
}

impl Action {
    /// The replica this action changes.
    pub fn side(&self) -> Side {
        match *self {
            Action::MakeDirectory { side, .. } | Action::Remove { side, .. } | Action::Move { side, .. } => side,
            Action::Transfer(ref request) => request.destination,
        }
    }

    /// The path this action leaves behind: the destination of moves.
    pub fn path(&self) -> &str {
        match *self {
            Action::MakeDirectory { ref path, .. } | Action::Remove { ref path, .. } => path,
            Action::Transfer(ref request) => &request.path,
            Action::Move { ref to, .. } => to,
        }
    }

    fn created_path(&self) -> Option<&str> {
        match *self {
            Action::Remove { .. } => None,
            _ => Some(self.path()),
        }
    }

    fn vacated_path(&self) -> Option<&str> {
        match *self {
            Action::Remove { ref path, .. } => Some(path),
            Action::Move { ref from, .. } => Some(from),
            _ => None,
        }
    }

    pub fn conflict_file_for(&self) -> Option<&str> {
        match *self {
            Action::MakeDirectory {
                ref conflict_file_for, ..
            } => conflict_file_for.as_deref(),
            Action::Transfer(ref request) => request.conflict_file_for.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaselineChange {
    Record(BaselineEntry),
    Forget(String),
}

impl BaselineChange {
    fn record(path: &str, state: &EntryState) -> Self {
        BaselineChange::Record(BaselineEntry::new(path, state.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub action: Action,
    /// Indices of earlier actions in the plan that must succeed first.
    pub depends_on: Vec<usize>,
    /// Applied to the baseline once the action is confirmed.
    pub on_success: Vec<BaselineChange>,
}

#[derive(Debug, Default)]
pub struct Plan {
    /// Every action appears after the actions it depends on.
    pub actions: Vec<PlannedAction>,
    /// Baseline changes that need no action.
    pub baseline_updates: Vec<BaselineChange>,
    pub conflicts: Vec<ConflictRecord>,
    /// Conflict copies kept back from the remote replica.
    pub withheld: Vec<String>,
    /// Actions that could not be ordered.
    pub unordered: Vec<(Action, SyncError)>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.unordered.is_empty()
    }
}

/// The outermost conflict copy among `path` and its ancestors.
fn conflict_copy_root(path: &str) -> Option<&str> {
    let mut root = None;
    for candidate in std::iter::once(path).chain(ancestors(path)) {
        if is_conflict_copy(candidate) {
            root = Some(candidate);
        }
    }
    root
}

struct PlanBuilder<'a> {
    local: &'a ReplicaTree,
    remote: &'a ReplicaTree,
    baseline: &'a Baseline,
    gate: CapabilityGate,
    actor_tag: &'a str,
    discriminator: &'a dyn Discriminator,
    generated: FnvHashSet<String>,
    plan: Plan,
}

impl<'a> PlanBuilder<'a> {
    fn push(&mut self, action: Action, depends_on: Vec<usize>, on_success: Vec<BaselineChange>) -> usize {
        trace!("Planning {:?}", action);
        self.plan.actions.push(PlannedAction {
            action,
            depends_on,
            on_success,
        });
        self.plan.actions.len() - 1
    }

    fn update_baseline(&mut self, path: &str, state: &EntryState) {
        if self.baseline.get(path) == Some(state) {
            return;
        }
        self.plan.baseline_updates.push(if state.entry_exists() {
            BaselineChange::record(path, state)
        } else {
            BaselineChange::Forget(path.to_owned())
        });
    }

    /// Uploads of conflict copies carry the base path while the gate is
    /// open, and are kept back while it is closed.
    fn conflict_tag(&mut self, destination: Side, path: &str) -> Result<Option<String>, ()> {
        if destination != Side::Remote {
            return Ok(None);
        }
        let root = match conflict_copy_root(path) {
            Some(root) => root,
            None => return Ok(None),
        };
        if !self.gate.upload_conflict_files() {
            info!("Not uploading conflict copy {:?}: the server does not accept conflict files", path);
            self.plan.withheld.push(path.to_owned());
            return Err(());
        }
        if root == path {
            Ok(parse_base(path))
        } else {
            Ok(None)
        }
    }

    fn transfer(&self, destination: Side, path: &str, state: &EntryState, conflict_file_for: Option<String>) -> Option<Action> {
        match *state {
            EntryState::File { ref fingerprint, size } => Some(Action::Transfer(TransferRequest {
                destination,
                path: path.to_owned(),
                fingerprint: fingerprint.clone(),
                size,
                conflict_file_for,
            })),
            _ => None,
        }
    }

    fn propagate(&mut self, destination: Side, path: &str, state: &EntryState, previous: &EntryState) {
        let tag = if state.entry_exists() {
            match self.conflict_tag(destination, path) {
                Ok(tag) => tag,
                Err(()) => return,
            }
        } else {
            None
        };

        let mut depends_on = Vec::new();
        if let Some(kind) = previous.kind() {
            if !EntryState::equal_ty(state, previous) {
                let on_success = if state.entry_exists() {
                    Vec::new()
                } else {
                    vec![BaselineChange::Forget(path.to_owned())]
                };
                let remove = Action::Remove {
                    side: destination,
                    path: path.to_owned(),
                    kind,
                };
                depends_on.push(self.push(remove, Vec::new(), on_success));
            }
        }

        let on_success = vec![BaselineChange::record(path, state)];
        match *state {
            EntryState::Empty => {}
            EntryState::Directory => {
                if !previous.is_directory() {
                    let action = Action::MakeDirectory {
                        side: destination,
                        path: path.to_owned(),
                        conflict_file_for: tag,
                    };
                    self.push(action, depends_on, on_success);
                }
            }
            EntryState::File { .. } => {
                if let Some(action) = self.transfer(destination, path, state, tag) {
                    self.push(action, depends_on, on_success);
                }
            }
        }
    }

    fn copy_path_taken(&self, path: &str) -> bool {
        self.local.contains(path)
            || self.remote.contains(path)
            || self.baseline.contains(path)
            || self.generated.contains(path)
    }

    fn conflict_record(&mut self, base_path: &str) -> ConflictRecord {
        loop {
            let record = ConflictRecord::new(base_path, self.actor_tag, self.discriminator.next());
            if !self.copy_path_taken(&record.copy_path) {
                self.generated.insert(record.copy_path.clone());
                return record;
            }
            debug!("Conflict copy name {:?} is taken, drawing another", record.copy_path);
        }
    }

    /// The local content moves aside into a conflict copy, the remote content
    /// takes its place, and the copy is uploaded if the server accepts it.
    fn conflict(&mut self, path: &str, local: &EntryState, remote: &EntryState) {
        let record = self.conflict_record(path);
        info!("Conflict at {:?}: keeping the local version as {:?}", path, record.copy_path);

        let preserve = Action::Move {
            side: Side::Local,
            from: path.to_owned(),
            to: record.copy_path.clone(),
        };
        let mut on_success = if remote.entry_exists() {
            Vec::new()
        } else {
            vec![BaselineChange::Forget(path.to_owned())]
        };
        if local.is_directory() {
            let below = self.baseline.paths().filter(|known| is_descendant(known, path));
            on_success.extend(below.map(|known| BaselineChange::Forget(known.to_owned())));
        }
        let preserve = self.push(preserve, Vec::new(), on_success);

        let replace = match *remote {
            EntryState::Directory => Some(Action::MakeDirectory {
                side: Side::Local,
                path: path.to_owned(),
                conflict_file_for: None,
            }),
            _ => self.transfer(Side::Local, path, remote, None),
        };
        if let Some(replace) = replace {
            self.push(replace, vec![preserve], vec![BaselineChange::record(path, remote)]);
        }

        if local.entry_exists() {
            if let Ok(tag) = self.conflict_tag(Side::Remote, &record.copy_path) {
                self.upload_copy(path, &record.copy_path, local, tag, preserve);
            }
        }

        self.plan.conflicts.push(record);
    }

    /// Uploads the preserved local content under the copy path. A directory
    /// goes up with everything below it; only its root carries the tag.
    fn upload_copy(&mut self, path: &str, copy_path: &str, local: &EntryState, tag: Option<String>, preserve: usize) {
        if local.is_file() {
            if let Some(upload) = self.transfer(Side::Remote, copy_path, local, tag) {
                self.push(upload, vec![preserve], vec![BaselineChange::record(copy_path, local)]);
            }
            return;
        }

        let make = Action::MakeDirectory {
            side: Side::Remote,
            path: copy_path.to_owned(),
            conflict_file_for: tag,
        };
        self.push(make, vec![preserve], vec![BaselineChange::record(copy_path, local)]);

        let tree = self.local;
        for node in tree.nodes().into_iter().filter(|node| is_descendant(node.path(), path)) {
            let target = format!("{}{}", copy_path, &node.path()[path.len()..]);
            let state = node.state();
            let action = if state.is_directory() {
                Some(Action::MakeDirectory {
                    side: Side::Remote,
                    path: target.clone(),
                    conflict_file_for: None,
                })
            } else {
                self.transfer(Side::Remote, &target, &state, None)
            };
            if let Some(action) = action {
                self.push(action, vec![preserve], vec![BaselineChange::record(&target, &state)]);
            }
        }
    }

    fn add(&mut self, outcome: &Outcome) {
        match *outcome {
            Outcome::Unchanged { ref path, ref state } | Outcome::ConvergedIndependently { ref path, ref state } => {
                self.update_baseline(path, state)
            }
            Outcome::PropagateToRemote {
                ref path,
                ref state,
                ref previous,
            } => self.propagate(Side::Remote, path, state, previous),
            Outcome::PropagateToLocal {
                ref path,
                ref state,
                ref previous,
            } => self.propagate(Side::Local, path, state, previous),
            Outcome::Renamed {
                side,
                ref from,
                ref to,
                ref state,
            } => {
                let action = Action::Move {
                    side: side.other(),
                    from: from.clone(),
                    to: to.clone(),
                };
                let on_success = vec![BaselineChange::Forget(from.clone()), BaselineChange::record(to, state)];
                self.push(action, Vec::new(), on_success);
            }
            Outcome::Conflict {
                ref path,
                ref local,
                ref remote,
                ..
            } => self.conflict(path, local, remote),
        }
    }

    /// Adds the structural dependencies: creating anything below a new
    /// directory waits for the directory, and removing a directory waits for
    /// everything that happens below it.
    fn link_structure(&mut self) {
        let mut directories: FnvHashMap<(Side, String), usize> = FnvHashMap::default();
        let mut removals: FnvHashMap<(Side, String), usize> = FnvHashMap::default();
        for (index, planned) in self.plan.actions.iter().enumerate() {
            match planned.action {
                Action::MakeDirectory { side, ref path, .. } => {
                    directories.insert((side, path.clone()), index);
                }
                Action::Remove {
                    side,
                    ref path,
                    kind: EntryKind::Directory,
                } => {
                    removals.insert((side, path.clone()), index);
                }
                _ => {}
            }
        }

        let mut extra: Vec<(usize, usize)> = Vec::new();
        for (index, planned) in self.plan.actions.iter().enumerate() {
            let side = planned.action.side();
            if let Some(created) = planned.action.created_path() {
                for ancestor in ancestors(created) {
                    if let Some(&directory) = directories.get(&(side, ancestor.to_owned())) {
                        extra.push((index, directory));
                    }
                }
            }
            for touched in planned.action.created_path().into_iter().chain(planned.action.vacated_path()) {
                for ancestor in ancestors(touched) {
                    if let Some(&removal) = removals.get(&(side, ancestor.to_owned())) {
                        extra.push((removal, index));
                    }
                }
            }
        }

        for (dependent, dependency) in extra {
            let depends_on = &mut self.plan.actions[dependent].depends_on;
            if dependent != dependency && !depends_on.contains(&dependency) {
                depends_on.push(dependency);
            }
        }
    }

    /// Reorders the actions so that dependencies come first, keeping the
    /// planning order otherwise.
    fn order(&mut self) {
        let actions = std::mem::replace(&mut self.plan.actions, Vec::new());
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); actions.len()];
        let mut pending: Vec<usize> = vec![0; actions.len()];
        for (index, planned) in actions.iter().enumerate() {
            pending[index] = planned.depends_on.len();
            for &dependency in &planned.depends_on {
                dependents[dependency].push(index);
            }
        }

        let mut ready: BTreeSet<usize> = (0..actions.len()).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(actions.len());
        loop {
            let next = match ready.iter().next() {
                Some(&next) => next,
                None => break,
            };
            ready.remove(&next);
            order.push(next);
            for &dependent in &dependents[next] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        let mut position: Vec<Option<usize>> = vec![None; actions.len()];
        for (new_index, &old_index) in order.iter().enumerate() {
            position[old_index] = Some(new_index);
        }

        let mut slots: Vec<Option<PlannedAction>> = actions.into_iter().map(Some).collect();
        for &old_index in &order {
            if let Some(mut planned) = slots[old_index].take() {
                planned.depends_on = planned.depends_on.iter().filter_map(|&d| position[d]).collect();
                self.plan.actions.push(planned);
            }
        }
        for planned in slots.into_iter().flatten() {
            warn!("Cannot order the actions for {:?}", planned.action.path());
            let error = SyncError::DependencyCycle(planned.action.path().to_owned());
            self.plan.unordered.push((planned.action, error));
        }
    }
}

/// Builds the action plan for one run.
pub fn build_plan(
    outcomes: &[Outcome],
    local: &ReplicaTree,
    remote: &ReplicaTree,
    baseline: &Baseline,
    gate: CapabilityGate,
    actor_tag: &str,
    discriminator: &dyn Discriminator,
) -> Plan {
    let mut builder = PlanBuilder {
        local,
        remote,
        baseline,
        gate,
        actor_tag,
        discriminator,
        generated: FnvHashSet::default(),
        plan: Plan::default(),
    };
    for outcome in outcomes {
        builder.add(outcome);
    }
    builder.link_structure();
    builder.order();
    info!(
        "Planned {} actions, {} conflicts, {} withheld",
        builder.plan.actions.len(),
        builder.plan.conflicts.len(),
        builder.plan.withheld.len()
    );
    builder.plan
}
