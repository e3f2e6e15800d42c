//! One sync run from listings to an executed plan.

use crate::archive::BaselineStore;
use crate::capability::{CapabilityGate, CapabilityQuery};
use crate::config::SyncInfo;
use crate::conflict::Discriminator;
use crate::detect;
use crate::error::SyncError;
use crate::propagate::{CancelHandle, Coordinator, EmptyProgressCallback, ProgressCallback, Transport};
use crate::report::RunReport;
use crate::tree::{Listing, ReplicaTree};

pub struct SyncEngine<T, P = EmptyProgressCallback> {
    config: SyncInfo,
    coordinator: Coordinator<T, P>,
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(config: SyncInfo, transport: T) -> Self {
        SyncEngine {
            config,
            coordinator: Coordinator::new(transport),
        }
    }
}

impl<T: Transport, P: ProgressCallback> SyncEngine<T, P> {
    pub fn with_progress<Q: ProgressCallback>(self, progress: Q) -> SyncEngine<T, Q> {
        SyncEngine {
            config: self.config,
            coordinator: self.coordinator.with_progress(progress),
        }
    }

    pub fn with_discriminator<D: Discriminator + Send + Sync + 'static>(self, discriminator: D) -> Self {
        SyncEngine {
            config: self.config,
            coordinator: self.coordinator.with_discriminator(discriminator),
        }
    }

    pub fn config(&self) -> &SyncInfo {
        &self.config
    }

    pub fn coordinator(&self) -> &Coordinator<T, P> {
        &self.coordinator
    }

    pub fn transport(&self) -> &T {
        self.coordinator.transport()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.coordinator.cancel_handle()
    }

    /// Runs one reconciliation between the two listed replicas.
    ///
    /// Only a broken listing or an unreadable baseline fails the run; every
    /// other problem is confined to its path and shows up in the report.
    pub fn sync_once<S, Q>(&self, local: &Listing, remote: &Listing, store: &mut S, capabilities: &Q) -> Result<RunReport, SyncError>
    where
        S: BaselineStore + ?Sized,
        Q: CapabilityQuery + ?Sized,
    {
        let local = ReplicaTree::from_listing(local)?;
        let remote = ReplicaTree::from_listing(remote)?;
        let mut baseline = store.load()?;
        let gate = CapabilityGate::from_query(capabilities);
        info!(
            "Syncing {} local and {} remote entries against {} baseline entries",
            local.len(),
            remote.len(),
            baseline.len()
        );

        let detection = detect::classify(&local, &remote, &baseline, &self.config);
        let plan = self.coordinator.plan(
            &detection.outcomes,
            &local,
            &remote,
            &baseline,
            gate,
            &self.config.actor_tag,
        );

        if plan.is_empty() {
            debug!("Nothing to propagate");
        }

        let mut report = RunReport::new(detection);
        self.coordinator.execute(&plan, &mut baseline, store, &mut report);

        let failed = report.failed().count();
        if failed == 0 {
            info!("Sync finished, {} actions", report.actions().len());
        } else {
            warn!("Sync finished, {} of {} actions did not succeed", failed, report.actions().len());
        }
        report.set_baseline(baseline);
        Ok(report)
    }
}
