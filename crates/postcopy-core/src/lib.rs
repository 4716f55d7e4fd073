//! Core data model for post-copy live migration with demand paging.
//!
//! A migration moves a virtual machine's execution state to a target host
//! after transferring only its non-pageable state; every other page is
//! pulled across the link exactly when the running VM touches it.
//!
//! This crate holds the pieces shared by the migration actors:
//!
//! - [`CoreConfig`]: immutable, validated input parameters.
//! - [`TransferTimer`]: per-page transfer latency over the link.
//! - [`PageTable`]: per-page source and target residency.
//! - [`fault_channel`]: the unbounded handoff of page faults from the
//!   target to the source.
//! - [`CancellationToken`] and [`Signal`]: cooperative shutdown.
//! - [`MigrationEvent`] and [`MigrationObserver`]: lifecycle events.
//! - [`MigrationMetrics`] and [`MigrationReport`]: counters and the final
//!   record.
//!
//! No threads are spawned here; see the `postcopy-runtime` crate for the
//! actors and the phase state machine.

mod channel;
mod config;
mod core;
mod error;
mod event;
mod metrics;
mod phase;
mod signal;
mod table;
mod timer;

pub use self::{
    channel::{FaultReceiver, FaultRequest, FaultSender, RecvError, fault_channel},
    config::{CoreConfig, CoreConfigBuilder},
    core::{PageId, PageSize},
    error::MigrationError,
    event::{EventRecorder, MigrationEvent, MigrationObserver, NoopObserver},
    metrics::{Efficiency, MigrationMetrics, MigrationReport, UnresponsiveActors},
    phase::{ActorKind, Phase},
    signal::{CancellationToken, Signal},
    table::{PageFlags, PageTable, SourceResidency, TargetResidency, WaitOutcome},
    timer::TransferTimer,
};
