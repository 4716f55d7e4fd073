//! Migration actors and the phase state machine.
//!
//! The resume phase of a post-copy migration runs two actors concurrently:
//!
//! - [`VmExecutionActor`] simulates the guest on the target. Each access to
//!   a page that is not yet resident raises a fault and stalls until the
//!   page arrives.
//! - [`PagingService`] drains the faults on the source and transfers each
//!   requested page over the simulated link.
//!
//! [`MigrationController`] drives the phases in order and collects the
//! [`MigrationReport`](postcopy_core::MigrationReport).

mod actor;
mod controller;
mod paging;
mod timings;
mod vm;
mod workload;

pub use self::{
    controller::MigrationController,
    paging::{PagingService, PagingSummary},
    timings::ResumeTimings,
    vm::{ResumeCounters, VmExecutionActor, VmExecutionSummary},
    workload::{
        AccessPattern, MAX_ACCESS_BUDGET, MIN_ACCESS_BUDGET, PAGES_PER_ACCESS, ScriptedAccess,
        UniformAccess, access_budget,
    },
};
