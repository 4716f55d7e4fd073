use serde::{Deserialize, Serialize};

/// Migration phase.
///
/// Phases advance strictly forward:
/// `Initialized → Preparing → Downtime → Resuming → Completed`.
/// There are no retries and no rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Configuration accepted, residency tables allocated.
    Initialized,

    /// Live preparation on the source; free pages are counted.
    Preparing,

    /// The VM is suspended while the non-pageable state is transferred.
    Downtime,

    /// The VM runs on the target and pulls pages on demand.
    Resuming,

    /// Terminal. Metrics are final.
    Completed,
}

impl Phase {
    /// Returns the phase that follows this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Initialized => Some(Self::Preparing),
            Self::Preparing => Some(Self::Downtime),
            Self::Downtime => Some(Self::Resuming),
            Self::Resuming => Some(Self::Completed),
            Self::Completed => None,
        }
    }
}

/// One of the two concurrent actors of the resume phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorKind {
    /// Source-side service that transfers faulted pages.
    PagingService,

    /// Target-side simulated instruction stream.
    VmExecution,
}

impl ActorKind {
    /// Returns the name used for the actor's thread.
    pub fn thread_name(self) -> &'static str {
        match self {
            Self::PagingService => "paging-service",
            Self::VmExecution => "vm-execution",
        }
    }
}

impl std::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.thread_name())
    }
}
