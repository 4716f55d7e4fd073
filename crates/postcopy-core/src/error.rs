use crate::{ActorKind, PageId, Phase};

/// An error that can occur when setting up or driving a migration.
#[derive(thiserror::Error, Debug)]
pub enum MigrationError {
    /// The total page count is zero.
    #[error("Total page count must be positive")]
    InvalidPageCount,

    /// The guest has more pages than the residency tables accept.
    #[error("Total page count {total} exceeds the maximum of {max}")]
    TooManyPages {
        /// The requested page count.
        total: u64,

        /// The largest accepted page count.
        max: u64,
    },

    /// The free page ratio is outside `[0.0, 1.0]`.
    #[error("Free page ratio {0} is outside [0.0, 1.0]")]
    InvalidFreePageRatio(f64),

    /// The link speed is not a positive, finite number.
    #[error("Link speed {0} Mbps must be positive")]
    InvalidLinkSpeed(f64),

    /// The page index is outside the residency tables.
    #[error("Page {page} out of range (total: {total})")]
    PageOutOfRange {
        /// The offending page.
        page: PageId,

        /// Number of pages in the table.
        total: u64,
    },

    /// A phase operation was invoked out of order.
    #[error("Expected phase {expected:?}, found {actual:?}")]
    InvalidPhase {
        /// The phase the operation requires.
        expected: Phase,

        /// The phase the migration is in.
        actual: Phase,
    },

    /// An actor thread could not be spawned.
    #[error("Failed to spawn {kind} thread")]
    Spawn {
        /// The actor that failed to start.
        kind: ActorKind,

        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl MigrationError {
    /// Creates a new spawn error for the given actor.
    pub fn spawn(kind: ActorKind, source: std::io::Error) -> Self {
        Self::Spawn { kind, source }
    }
}
