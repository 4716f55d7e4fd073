use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use serde::Serialize;

use crate::{ActorKind, PageId, Phase};

/// A lifecycle event emitted during a migration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MigrationEvent {
    /// A phase has begun.
    PhaseStarted(Phase),

    /// A phase has ended.
    PhaseCompleted {
        /// The phase that ended.
        phase: Phase,

        /// Wall-clock time spent in the phase.
        elapsed: Duration,
    },

    /// Free pages were found during preparation and need no transfer.
    FreePagesReclaimed {
        /// Number of free pages.
        count: u64,
    },

    /// A non-pageable page was transferred while the VM was suspended.
    CriticalPageTransferred {
        /// The transferred page.
        page: PageId,
    },

    /// The VM touched a page that is not resident on the target.
    PageFault {
        /// The faulting page.
        page: PageId,

        /// One-based fault sequence number.
        fault_number: u64,

        /// Fraction of guest pages resident on the target at fault time.
        transferred_fraction: f64,
    },

    /// A page was transferred on demand.
    PageTransferred {
        /// The transferred page.
        page: PageId,

        /// Pages resident on the target after this transfer.
        total_transferred: u64,

        /// Time from the fault being raised to the page becoming resident.
        latency: Duration,
    },

    /// The paging service waited a full receive timeout without a fault.
    FaultReceiveTimeout,

    /// The VM workload ran to completion.
    WorkloadCompleted {
        /// Page faults raised by the workload.
        faults: u64,

        /// Memory accesses performed by the workload.
        accesses: u64,
    },

    /// The paging service exited.
    PagingServiceStopped {
        /// Pages transferred on demand.
        demand_transferred: u64,
    },

    /// An actor did not acknowledge cancellation within the join timeout.
    ActorUnresponsive(ActorKind),
}

/// A trait for observing migration events.
///
/// Events are delivered synchronously from whichever thread produced them,
/// including the actor threads of the resume phase, so implementations must
/// be cheap and thread-safe.
pub trait MigrationObserver: Send + Sync {
    /// Handles a migration event.
    fn on_event(&self, _event: &MigrationEvent) {}
}

/// An observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl MigrationObserver for NoopObserver {}

/// An observer that records every event in order.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<MigrationEvent>>,
}

impl EventRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the recorded events.
    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Counts recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&MigrationEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| predicate(event))
            .count()
    }
}

impl MigrationObserver for EventRecorder {
    fn on_event(&self, event: &MigrationEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
