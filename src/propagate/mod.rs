use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::archive::{Baseline, BaselineStore};
use crate::capability::CapabilityGate;
use crate::conflict::{Discriminator, MonotonicDiscriminator};
use crate::detect::Outcome;
use crate::error::SyncError;
use crate::report::{ActionStatus, RunReport};
use crate::state::EntryKind;
use crate::tree::ReplicaTree;
use crate::Side;

pub mod plan;
mod progress;

pub use crate::propagate::plan::{
    build_plan, Action, BaselineChange, Plan, PlannedAction, TransferRequest, CONFLICT_FILE_FOR_HEADER,
};
pub use crate::propagate::progress::{EmptyProgressCallback, ProgressCallback};

/// Carries out actions on the replicas.
///
/// Every method must return an error unless the change has been made, since
/// a success is recorded in the baseline.
pub trait Transport {
    /// `conflict_file_for` is sent along like the transfer header when the
    /// directory is a conflict copy.
    fn make_directory(&self, side: Side, path: &str, conflict_file_for: Option<&str>) -> Result<(), SyncError>;

    /// Copies a file from `request.source()` to `request.destination`,
    /// sending `request.headers()` along.
    fn transfer(&self, request: &TransferRequest) -> Result<(), SyncError>;

    /// Removes a file or an empty directory.
    fn remove(&self, side: Side, path: &str, kind: EntryKind) -> Result<(), SyncError>;

    fn rename(&self, side: Side, from: &str, to: &str) -> Result<(), SyncError>;

    /// return false to cancel a removal
    fn should_remove(&self, _side: Side, _path: &str) -> bool {
        true
    }
}

impl<'a, T: Transport + ?Sized> Transport for &'a T {
    fn make_directory(&self, side: Side, path: &str, conflict_file_for: Option<&str>) -> Result<(), SyncError> {
        (**self).make_directory(side, path, conflict_file_for)
    }

    fn transfer(&self, request: &TransferRequest) -> Result<(), SyncError> {
        (**self).transfer(request)
    }

    fn remove(&self, side: Side, path: &str, kind: EntryKind) -> Result<(), SyncError> {
        (**self).remove(side, path, kind)
    }

    fn rename(&self, side: Side, from: &str, to: &str) -> Result<(), SyncError> {
        (**self).rename(side, from, to)
    }

    fn should_remove(&self, side: Side, path: &str) -> bool {
        (**self).should_remove(side, path)
    }
}

/// Stops a run at the next action boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Plans and executes the actions of a run through a `Transport`.
pub struct Coordinator<T, P = EmptyProgressCallback> {
    transport: T,
    progress: P,
    discriminator: Box<dyn Discriminator + Send + Sync>,
    cancel: CancelHandle,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(transport: T) -> Self {
        Coordinator {
            transport,
            progress: EmptyProgressCallback,
            discriminator: Box::new(MonotonicDiscriminator::new()),
            cancel: CancelHandle::default(),
        }
    }
}

impl<T: Transport, P: ProgressCallback> Coordinator<T, P> {
    pub fn with_progress<Q: ProgressCallback>(self, progress: Q) -> Coordinator<T, Q> {
        Coordinator {
            transport: self.transport,
            progress,
            discriminator: self.discriminator,
            cancel: self.cancel,
        }
    }

    pub fn with_discriminator<D: Discriminator + Send + Sync + 'static>(mut self, discriminator: D) -> Self {
        self.discriminator = Box::new(discriminator);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn plan(
        &self,
        outcomes: &[Outcome],
        local: &ReplicaTree,
        remote: &ReplicaTree,
        baseline: &Baseline,
        gate: CapabilityGate,
        actor_tag: &str,
    ) -> Plan {
        build_plan(outcomes, local, remote, baseline, gate, actor_tag, &*self.discriminator)
    }

    /// Executes `plan` in order, recording each result in `report`.
    ///
    /// A failed action only affects the actions depending on it. Confirmed
    /// actions update `baseline` and `store` straight away.
    pub fn execute<S: BaselineStore + ?Sized>(
        &self,
        plan: &Plan,
        baseline: &mut Baseline,
        store: &mut S,
        report: &mut RunReport,
    ) {
        report.record_plan(plan);

        for change in &plan.baseline_updates {
            apply_change(change, baseline, store);
        }

        let total = plan.actions.len();
        let mut succeeded: Vec<bool> = Vec::with_capacity(total);
        for (index, planned) in plan.actions.iter().enumerate() {
            let action = &planned.action;
            let status = if self.cancel.is_cancelled() {
                ActionStatus::Cancelled
            } else if !planned.depends_on.iter().all(|&dependency| succeeded[dependency]) {
                warn!("Not attempting {:?}: an earlier action failed", action);
                ActionStatus::Skipped(SyncError::DependencyFailed(action.path().to_owned()))
            } else {
                self.progress.action_started(action, index, total);
                let status = match self.dispatch(action) {
                    Ok(()) => {
                        for change in &planned.on_success {
                            apply_change(change, baseline, store);
                        }
                        ActionStatus::Succeeded
                    }
                    Err(SyncError::Cancelled) => {
                        info!("Cancelled {:?}", action);
                        ActionStatus::Failed(SyncError::Cancelled)
                    }
                    Err(e) => {
                        warn!("Failed {:?}: {}", action, e);
                        ActionStatus::Failed(SyncError::Propagation {
                            path: action.path().to_owned(),
                            reason: e.to_string(),
                        })
                    }
                };
                self.progress.action_finished(action, &status);
                status
            };
            succeeded.push(status.is_success());
            report.record_action(action.clone(), status);
        }

        for (action, _) in &plan.unordered {
            let error = SyncError::DependencyCycle(action.path().to_owned());
            report.record_action(action.clone(), ActionStatus::Failed(error));
        }
    }

    fn dispatch(&self, action: &Action) -> Result<(), SyncError> {
        match *action {
            Action::MakeDirectory {
                side,
                ref path,
                ref conflict_file_for,
            } => {
                info!("Creating directory {:?} on the {} replica", path, side);
                self.transport.make_directory(side, path, conflict_file_for.as_deref())
            }
            Action::Transfer(ref request) => {
                info!(
                    "Transferring {:?} from the {} replica to the {} replica",
                    request.path,
                    request.source(),
                    request.destination
                );
                self.transport.transfer(request)
            }
            Action::Remove { side, ref path, kind } => {
                if !self.transport.should_remove(side, path) {
                    return Err(SyncError::Cancelled);
                }
                info!("Removing {:?} from the {} replica", path, side);
                self.transport.remove(side, path, kind)
            }
            Action::Move {
                side,
                ref from,
                ref to,
            } => {
                info!("Moving {:?} to {:?} on the {} replica", from, to, side);
                self.transport.rename(side, from, to)
            }
        }
    }
}

/// A baseline store that cannot be written only costs a re-evaluation of
/// the path in the next run.
fn apply_change<S: BaselineStore + ?Sized>(change: &BaselineChange, baseline: &mut Baseline, store: &mut S) {
    let result = match *change {
        BaselineChange::Record(ref entry) => {
            baseline.insert(entry.path.clone(), entry.state.clone());
            store.record(entry)
        }
        BaselineChange::Forget(ref path) => {
            baseline.remove(path);
            store.forget(path)
        }
    };
    if let Err(e) = result {
        warn!("Could not update the baseline: {}", e);
    }
}
