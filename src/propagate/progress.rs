use crate::propagate::plan::Action;
use crate::report::ActionStatus;

/// Handles progress updates for the propagation step.
pub trait ProgressCallback {
    /// Called before the action at `index` of `total` is handed to the transport.
    fn action_started(&self, action: &Action, index: usize, total: usize);

    fn action_finished(&self, action: &Action, status: &ActionStatus);
}

/// A zero-sized struct with an empty implementation of ProgressCallback
pub struct EmptyProgressCallback;

impl ProgressCallback for EmptyProgressCallback {
    fn action_started(&self, _: &Action, _: usize, _: usize) {}

    fn action_finished(&self, _: &Action, _: &ActionStatus) {}
}
