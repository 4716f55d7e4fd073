use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use smallvec::SmallVec;

use crate::{ActorKind, CoreConfig};

/// Actors that failed to stop within the join timeout.
pub type UnresponsiveActors = SmallVec<[ActorKind; 2]>;

/// Mutable accumulator owned by the migration controller.
///
/// Timestamps delimit the phases: `started` opens preparation,
/// `downtime_started` closes it, `downtime_ended` opens resume and
/// `completed` closes the migration.
#[derive(Debug, Default, Clone)]
pub struct MigrationMetrics {
    /// Start of preparation.
    pub started: Option<Instant>,

    /// Start of downtime.
    pub downtime_started: Option<Instant>,

    /// End of downtime, start of resume.
    pub downtime_ended: Option<Instant>,

    /// End of the migration.
    pub completed: Option<Instant>,

    /// Free pages counted during preparation.
    pub free_pages: u64,

    /// Pages resident on the target.
    pub pages_transferred: u64,

    /// Page faults raised by the VM.
    pub page_faults: u64,

    /// Memory accesses performed by the VM.
    pub memory_accesses: u64,
}

impl MigrationMetrics {
    /// Returns the time spent in preparation.
    pub fn preparation(&self) -> Duration {
        span(self.started, self.downtime_started)
    }

    /// Returns the time the VM was suspended.
    pub fn downtime(&self) -> Duration {
        span(self.downtime_started, self.downtime_ended)
    }

    /// Returns the time spent resuming with demand paging.
    pub fn resume(&self) -> Duration {
        span(self.downtime_ended, self.completed)
    }

    /// Returns the time from the start of preparation to completion.
    pub fn total(&self) -> Duration {
        span(self.started, self.completed)
    }

    /// Produces the final report.
    pub fn report(
        &self,
        config: &CoreConfig,
        cancelled: bool,
        unresponsive_actors: UnresponsiveActors,
    ) -> MigrationReport {
        let non_pageable_pages = config.non_pageable_pages();

        MigrationReport {
            preparation: self.preparation(),
            downtime: self.downtime(),
            resume: self.resume(),
            total: self.total(),
            total_pages: config.total_pages(),
            page_size: config.page_size().bytes(),
            non_pageable_pages,
            free_pages: self.free_pages,
            total_transferred: self.pages_transferred,
            demand_transferred: self.pages_transferred.saturating_sub(non_pageable_pages),
            never_transferred: config.total_pages().saturating_sub(self.pages_transferred),
            page_faults: self.page_faults,
            memory_accesses: self.memory_accesses,
            cancelled,
            unresponsive_actors,
        }
    }
}

fn span(from: Option<Instant>, to: Option<Instant>) -> Duration {
    match (from, to) {
        (Some(from), Some(to)) => to.saturating_duration_since(from),
        _ => Duration::ZERO,
    }
}

fn as_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Rating of how much bandwidth post-copy saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Efficiency {
    /// More than 90% of the guest was never transferred.
    Excellent,

    /// More than 80% of the guest was never transferred.
    Good,

    /// Anything else.
    Fair,
}

/// Final, immutable record of a migration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    /// Time spent in preparation.
    #[serde(rename = "preparation_ms", serialize_with = "as_millis")]
    pub preparation: Duration,

    /// Time the VM was suspended. This is the guaranteed minimum service
    /// interruption of the migration.
    #[serde(rename = "downtime_ms", serialize_with = "as_millis")]
    pub downtime: Duration,

    /// Time spent resuming with demand paging.
    #[serde(rename = "resume_ms", serialize_with = "as_millis")]
    pub resume: Duration,

    /// Time from the start of preparation to completion.
    #[serde(rename = "total_ms", serialize_with = "as_millis")]
    pub total: Duration,

    /// Number of guest pages.
    pub total_pages: u64,

    /// Size of a guest page in bytes.
    pub page_size: u64,

    /// Pages transferred during downtime.
    pub non_pageable_pages: u64,

    /// Pages classified as free during preparation.
    pub free_pages: u64,

    /// Pages resident on the target at completion.
    pub total_transferred: u64,

    /// Pages transferred on demand during resume.
    pub demand_transferred: u64,

    /// Pages that never left the source.
    pub never_transferred: u64,

    /// Page faults raised by the VM.
    pub page_faults: u64,

    /// Memory accesses performed by the VM.
    pub memory_accesses: u64,

    /// Whether resume was cut short before the workload finished.
    pub cancelled: bool,

    /// Actors that did not stop within the join timeout.
    pub unresponsive_actors: UnresponsiveActors,
}

impl MigrationReport {
    /// Returns page faults as a percentage of memory accesses.
    pub fn fault_rate_percent(&self) -> f64 {
        percent(self.page_faults, self.memory_accesses)
    }

    /// Returns transferred pages as a percentage of the guest.
    pub fn transferred_percent(&self) -> f64 {
        percent(self.total_transferred, self.total_pages)
    }

    /// Returns never-transferred pages as a percentage of the guest.
    pub fn bandwidth_savings_percent(&self) -> f64 {
        percent(self.never_transferred, self.total_pages)
    }

    /// Returns downtime as a percentage of the total migration time.
    pub fn downtime_percent(&self) -> f64 {
        if self.total.is_zero() {
            return 0.0;
        }

        self.downtime.as_secs_f64() / self.total.as_secs_f64() * 100.0
    }

    /// Returns the guest size in bytes.
    pub fn vm_bytes(&self) -> u64 {
        self.total_pages * self.page_size
    }

    /// Returns the bytes sent over the link.
    pub fn bytes_transferred(&self) -> u64 {
        self.total_transferred * self.page_size
    }

    /// Returns the bytes sent during downtime.
    pub fn non_pageable_bytes(&self) -> u64 {
        self.non_pageable_pages * self.page_size
    }

    /// Returns the bytes sent on demand.
    pub fn demand_bytes(&self) -> u64 {
        self.demand_transferred * self.page_size
    }

    /// Returns the bytes that never had to be sent.
    pub fn bytes_saved(&self) -> u64 {
        self.never_transferred * self.page_size
    }

    /// Rates the bandwidth savings.
    pub fn efficiency(&self) -> Efficiency {
        let savings = self.bandwidth_savings_percent();

        if savings > 90.0 {
            Efficiency::Excellent
        }
        else if savings > 80.0 {
            Efficiency::Good
        }
        else {
            Efficiency::Fair
        }
    }

    /// Returns transferred pages per second of resume time.
    pub fn average_transfer_rate_pages_per_sec(&self) -> f64 {
        if self.resume.is_zero() {
            return 0.0;
        }

        self.total_transferred as f64 / self.resume.as_secs_f64()
    }

    /// Returns transferred bytes per second of resume time.
    pub fn average_transfer_rate_bytes_per_sec(&self) -> f64 {
        self.average_transfer_rate_pages_per_sec() * self.page_size as f64
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }

    part as f64 / whole as f64 * 100.0
}
