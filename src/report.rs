//! The record of one sync run.

use crate::archive::Baseline;
use crate::conflict::ConflictRecord;
use crate::detect::{DetectionResult, DetectionStatistics, Outcome};
use crate::error::SyncError;
use crate::propagate::plan::{Action, Plan};

pub use crate::detect::SkippedPath;

#[derive(Debug)]
pub enum ActionStatus {
    Succeeded,
    Failed(SyncError),
    /// Not attempted because an action it depends on did not succeed.
    Skipped(SyncError),
    Cancelled,
}

impl ActionStatus {
    pub fn is_success(&self) -> bool {
        match *self {
            ActionStatus::Succeeded => true,
            _ => false,
        }
    }

    pub fn error(&self) -> Option<&SyncError> {
        match *self {
            ActionStatus::Failed(ref e) | ActionStatus::Skipped(ref e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ActionReport {
    pub action: Action,
    pub status: ActionStatus,
}

/// Everything a run decided and did, in the order it happened.
#[derive(Debug, Default)]
pub struct RunReport {
    outcomes: Vec<Outcome>,
    skipped: Vec<SkippedPath>,
    malformed_names: Vec<String>,
    statistics: DetectionStatistics,
    conflicts: Vec<ConflictRecord>,
    withheld: Vec<String>,
    actions: Vec<ActionReport>,
    baseline: Baseline,
}

impl RunReport {
    pub fn new(detection: DetectionResult) -> Self {
        RunReport {
            outcomes: detection.outcomes,
            skipped: detection.skipped,
            malformed_names: detection.malformed_names,
            statistics: detection.statistics,
            ..RunReport::default()
        }
    }

    pub(crate) fn record_plan(&mut self, plan: &Plan) {
        self.conflicts.extend(plan.conflicts.iter().cloned());
        self.withheld.extend(plan.withheld.iter().cloned());
    }

    pub(crate) fn record_action(&mut self, action: Action, status: ActionStatus) {
        self.actions.push(ActionReport { action, status });
    }

    pub(crate) fn set_baseline(&mut self, baseline: Baseline) {
        self.baseline = baseline;
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn outcome_for(&self, path: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|outcome| outcome.path() == path)
    }

    pub fn skipped(&self) -> &[SkippedPath] {
        &self.skipped
    }

    pub fn malformed_names(&self) -> &[String] {
        &self.malformed_names
    }

    pub fn statistics(&self) -> &DetectionStatistics {
        &self.statistics
    }

    pub fn conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    pub fn conflict_for(&self, base_path: &str) -> Option<&ConflictRecord> {
        self.conflicts.iter().find(|record| record.base_path == base_path)
    }

    /// Conflict copies that were not uploaded because the server does not accept them.
    pub fn withheld(&self) -> &[String] {
        &self.withheld
    }

    pub fn actions(&self) -> &[ActionReport] {
        &self.actions
    }

    pub fn failed(&self) -> impl Iterator<Item = &ActionReport> {
        self.actions.iter().filter(|report| !report.status.is_success())
    }

    /// `(base path, copy path)` for every conflict copy uploaded in this run.
    pub fn tagged_uploads(&self) -> Vec<(&str, &str)> {
        self.actions
            .iter()
            .filter(|report| report.status.is_success())
            .filter_map(|report| {
                report
                    .action
                    .conflict_file_for()
                    .map(|base| (base, report.action.path()))
            })
            .collect()
    }

    /// True if every action succeeded and no path was skipped.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.actions.iter().all(|report| report.status.is_success())
    }

    /// The baseline after this run, to be used by the next one.
    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    pub fn into_baseline(self) -> Baseline {
        self.baseline
    }
}
