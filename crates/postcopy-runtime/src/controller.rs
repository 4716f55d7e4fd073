use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use postcopy_core::{
    ActorKind, CancellationToken, CoreConfig, MigrationError, MigrationEvent, MigrationMetrics,
    MigrationObserver, MigrationReport, NoopObserver, PageId, PageTable, Phase,
    UnresponsiveActors, fault_channel,
};
use rand::SeedableRng as _;
use rand_chacha::ChaCha8Rng;

use crate::{
    AccessPattern, PagingService, ResumeCounters, ResumeTimings, UniformAccess, VmExecutionActor,
    access_budget,
    actor::{ActorHandle, JoinOutcome},
};

/// How the resume phase ended.
#[derive(Debug, Default)]
struct ResumeOutcome {
    cancelled: bool,
    unresponsive: UnresponsiveActors,
}

/// Drives a migration through its phases.
///
/// The controller owns the residency tables and the metrics. Phases are
/// strictly sequential and only move forward:
///
/// 1. [`prepare`](Self::prepare) counts the free pages on the source.
/// 2. [`downtime`](Self::downtime) suspends the VM and transfers the
///    non-pageable pages.
/// 3. [`resume`](Self::resume) runs the VM on the target alongside the
///    paging service until the workload completes or the run is cancelled.
///
/// Calling a phase out of order fails with [`MigrationError::InvalidPhase`].
/// [`run`](Self::run) drives all three and produces the report.
///
/// # Examples
///
/// ```no_run
/// use postcopy_core::CoreConfig;
/// use postcopy_runtime::MigrationController;
///
/// # fn main() -> Result<(), postcopy_core::MigrationError> {
/// let config = CoreConfig::builder().vm_size_mb(512).build()?;
/// let report = MigrationController::new(config).run()?;
/// println!("downtime: {:?}", report.downtime);
/// # Ok(())
/// # }
/// ```
pub struct MigrationController {
    config: CoreConfig,
    timings: ResumeTimings,
    table: Arc<PageTable>,
    phase: Phase,
    metrics: MigrationMetrics,
    cancel: CancellationToken,
    observer: Arc<dyn MigrationObserver>,
    access: Option<Box<dyn AccessPattern>>,
    access_budget: Option<u64>,
    rng: ChaCha8Rng,
    outcome: ResumeOutcome,
}

impl MigrationController {
    /// Creates a controller and classifies the guest's pages.
    ///
    /// Pages are classified with a generator seeded from
    /// [`CoreConfig::seed`], or from entropy if no seed was given.
    pub fn new(config: CoreConfig) -> Self {
        let mut rng = match config.seed() {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let table = PageTable::classify(config.total_pages(), config.free_page_ratio(), &mut rng);

        tracing::debug!(
            total_pages = config.total_pages(),
            non_pageable_pages = config.non_pageable_pages(),
            page_transfer_time = ?config.page_transfer_time(),
            "migration initialized"
        );

        Self {
            config,
            timings: ResumeTimings::default(),
            table: Arc::new(table),
            phase: Phase::Initialized,
            metrics: MigrationMetrics::default(),
            cancel: CancellationToken::new(),
            observer: Arc::new(NoopObserver),
            access: None,
            access_budget: None,
            rng,
            outcome: ResumeOutcome::default(),
        }
    }

    /// Sets the wall-clock parameters of the resume phase.
    pub fn with_timings(self, timings: ResumeTimings) -> Self {
        Self { timings, ..self }
    }

    /// Sets the observer receiving lifecycle events.
    pub fn with_observer(self, observer: Arc<dyn MigrationObserver>) -> Self {
        Self { observer, ..self }
    }

    /// Uses `cancel` as the run's cancellation token.
    pub fn with_cancellation(self, cancel: CancellationToken) -> Self {
        Self { cancel, ..self }
    }

    /// Replaces the uniformly random workload with `access`.
    pub fn with_access_pattern(self, access: impl AccessPattern + 'static) -> Self {
        Self {
            access: Some(Box::new(access)),
            ..self
        }
    }

    /// Overrides the number of accesses the workload performs.
    pub fn with_access_budget(self, budget: u64) -> Self {
        Self {
            access_budget: Some(budget),
            ..self
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Returns the residency tables.
    pub fn page_table(&self) -> &PageTable {
        &self.table
    }

    /// Returns the metrics collected so far.
    pub fn metrics(&self) -> &MigrationMetrics {
        &self.metrics
    }

    /// Returns a handle that stops the resume phase early when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the preparation phase.
    ///
    /// Returns the number of free pages, which need no transfer.
    pub fn prepare(&mut self) -> Result<u64, MigrationError> {
        self.enter(Phase::Initialized)?;

        let started = Instant::now();
        self.metrics.started = Some(started);

        let free_pages = self.table.count_free();
        self.metrics.free_pages = free_pages;

        tracing::info!(free_pages, "dirty page tracking activated");
        self.observer
            .on_event(&MigrationEvent::FreePagesReclaimed { count: free_pages });
        self.phase_completed(Phase::Preparing, started.elapsed());

        Ok(free_pages)
    }

    /// Runs the downtime phase.
    ///
    /// The VM is suspended while the first non-pageable pages are
    /// transferred one at a time. Returns the time the VM was unavailable.
    pub fn downtime(&mut self) -> Result<Duration, MigrationError> {
        self.enter(Phase::Preparing)?;

        let started = Instant::now();
        self.metrics.downtime_started = Some(started);

        let pages = self.config.non_pageable_pages();
        let timer = self.config.timer();
        tracing::info!(
            pages,
            expected = ?timer.for_pages(pages),
            "vm suspended, transferring non-pageable state"
        );

        let per_page = timer.per_page();
        for page in (0..pages).map(PageId) {
            std::thread::sleep(per_page);

            if self.table.mark_transferred(page)? {
                tracing::trace!(%page, "critical page transferred");
                self.observer
                    .on_event(&MigrationEvent::CriticalPageTransferred { page });
            }
        }

        let ended = Instant::now();
        self.metrics.downtime_ended = Some(ended);

        let downtime = ended.saturating_duration_since(started);
        tracing::info!(?downtime, "vm resumed on target");
        self.phase_completed(Phase::Downtime, downtime);

        Ok(downtime)
    }

    /// Runs the resume phase.
    ///
    /// Starts the paging service and the VM, waits for the workload to
    /// complete (or for cancellation), then stops both actors. Actors that
    /// do not stop within [`ResumeTimings::join_timeout`] are abandoned and
    /// listed in the report.
    pub fn resume(&mut self) -> Result<(), MigrationError> {
        self.enter(Phase::Downtime)?;

        let started = Instant::now();
        let (sender, receiver) = fault_channel();
        let counters = Arc::new(ResumeCounters::default());

        let paging = PagingService::new(
            self.table.clone(),
            receiver,
            self.config.timer(),
            self.cancel.clone(),
            self.observer.clone(),
        )
        .with_receive_timeout(self.timings.fault_receive_timeout)
        .with_non_pageable_pages(self.config.non_pageable_pages());

        let paging = ActorHandle::spawn(ActorKind::PagingService, move || paging.run())?;

        let access: Box<dyn AccessPattern> = match self.access.take() {
            Some(access) => access,
            None => Box::new(UniformAccess::new(self.rng.clone())),
        };
        let budget = self
            .access_budget
            .unwrap_or_else(|| access_budget(self.config.total_pages()));

        let vm = VmExecutionActor::new(
            self.table.clone(),
            sender.clone(),
            self.cancel.clone(),
            self.observer.clone(),
            access,
            budget,
        )
        .with_counters(counters.clone())
        .with_instruction_delay(self.timings.instruction_delay)
        .with_fault_poll_interval(self.timings.fault_poll_interval);

        let vm = match ActorHandle::spawn(ActorKind::VmExecution, move || vm.run()) {
            Ok(vm) => vm,
            Err(err) => {
                self.cancel.cancel();
                sender.close();
                let mut unresponsive = UnresponsiveActors::new();
                self.join(paging, &mut unresponsive);
                return Err(err);
            }
        };

        tracing::info!(budget, "vm running with demand paging");

        while !vm.exited().wait_timeout(self.timings.completion_poll) {
            if self.cancel.is_cancelled() {
                tracing::info!("resume cancelled");
                break;
            }

            if paging.exited().is_raised() {
                tracing::warn!("paging service exited while the vm was running");
                break;
            }
        }

        if counters.workload_completed() {
            // Let in-flight transfers land.
            self.cancel.sleep(self.timings.drain_grace);
        }

        self.cancel.cancel();
        sender.close();
        self.table.interrupt_waiters();

        let mut unresponsive = UnresponsiveActors::new();
        if let Some(summary) = self.join(vm, &mut unresponsive) {
            tracing::debug!(?summary, "vm execution joined");
        }
        if let Some(summary) = self.join(paging, &mut unresponsive) {
            tracing::debug!(?summary, "paging service joined");
        }

        self.metrics.pages_transferred = self.table.transferred_count();
        self.metrics.page_faults = counters.page_faults();
        self.metrics.memory_accesses = counters.memory_accesses();
        self.metrics.completed = Some(Instant::now());

        if let Some(page) = self.table.find_inconsistency() {
            tracing::error!(%page, "residency tables disagree");
        }

        self.outcome = ResumeOutcome {
            cancelled: !counters.workload_completed(),
            unresponsive,
        };

        self.phase_completed(Phase::Resuming, started.elapsed());
        self.enter(Phase::Resuming)?;

        tracing::info!(
            transferred = self.metrics.pages_transferred,
            faults = self.metrics.page_faults,
            accesses = self.metrics.memory_accesses,
            cancelled = self.outcome.cancelled,
            "migration completed"
        );

        Ok(())
    }

    /// Produces the final report.
    ///
    /// Only available once the migration has completed.
    pub fn report(&self) -> Result<MigrationReport, MigrationError> {
        if self.phase != Phase::Completed {
            return Err(MigrationError::InvalidPhase {
                expected: Phase::Completed,
                actual: self.phase,
            });
        }

        Ok(self.metrics.report(
            &self.config,
            self.outcome.cancelled,
            self.outcome.unresponsive.clone(),
        ))
    }

    /// Runs every phase and returns the report.
    ///
    /// Cancellation is not an error: a cancelled run still produces a
    /// report, with [`MigrationReport::cancelled`] set.
    pub fn run(&mut self) -> Result<MigrationReport, MigrationError> {
        self.prepare()?;
        self.downtime()?;
        self.resume()?;
        self.report()
    }

    /// Advances from `expected` to the phase that follows it.
    fn enter(&mut self, expected: Phase) -> Result<(), MigrationError> {
        let next = match expected.next() {
            Some(next) if self.phase == expected => next,
            _ => {
                return Err(MigrationError::InvalidPhase {
                    expected,
                    actual: self.phase,
                });
            }
        };

        self.phase = next;
        tracing::info!(phase = ?next, "phase started");
        self.observer.on_event(&MigrationEvent::PhaseStarted(next));
        Ok(())
    }

    fn phase_completed(&self, phase: Phase, elapsed: Duration) {
        tracing::debug!(?phase, ?elapsed, "phase completed");
        self.observer
            .on_event(&MigrationEvent::PhaseCompleted { phase, elapsed });
    }

    /// Joins `actor` within the join timeout.
    fn join<T>(&self, actor: ActorHandle<T>, unresponsive: &mut UnresponsiveActors) -> Option<T>
    where
        T: Send + 'static,
    {
        let kind = actor.kind();

        match actor.join_timeout(self.timings.join_timeout) {
            JoinOutcome::Joined(value) => Some(value),
            JoinOutcome::Panicked => {
                tracing::error!(%kind, "actor panicked");
                None
            }
            JoinOutcome::TimedOut => {
                tracing::warn!(%kind, "actor did not stop in time");
                self.observer
                    .on_event(&MigrationEvent::ActorUnresponsive(kind));
                unresponsive.push(kind);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use postcopy_core::{EventRecorder, PageFlags, SourceResidency};

    use super::*;
    use crate::ScriptedAccess;

    fn config(total_pages: u64, free_page_ratio: f64) -> Result<CoreConfig, MigrationError> {
        CoreConfig::builder()
            .total_pages(total_pages)
            .free_page_ratio(free_page_ratio)
            .link_speed_mbps(100_000.0)
            .seed(7)
            .build()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Phase ordering
    ////////////////////////////////////////////////////////////////////////////

    #[test]
    fn phases_must_run_in_order() -> Result<(), MigrationError> {
        let mut controller = MigrationController::new(config(100, 0.0)?);

        assert!(matches!(
            controller.downtime(),
            Err(MigrationError::InvalidPhase {
                expected: Phase::Preparing,
                actual: Phase::Initialized,
            })
        ));
        assert!(matches!(
            controller.report(),
            Err(MigrationError::InvalidPhase {
                expected: Phase::Completed,
                ..
            })
        ));

        controller.prepare()?;
        assert_eq!(controller.phase(), Phase::Preparing);
        assert!(matches!(
            controller.prepare(),
            Err(MigrationError::InvalidPhase { .. })
        ));
        assert!(matches!(
            controller.resume(),
            Err(MigrationError::InvalidPhase { .. })
        ));
        assert_eq!(controller.phase(), Phase::Preparing);
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Preparation
    ////////////////////////////////////////////////////////////////////////////

    #[test]
    fn prepare_counts_free_pages_without_transfers() -> Result<(), MigrationError> {
        let mut controller = MigrationController::new(config(10_000, 0.25)?);

        let free_pages = controller.prepare()?;

        assert_eq!(free_pages, controller.page_table().count_free());
        assert_eq!(controller.metrics().free_pages, free_pages);
        assert!((2_000..3_000).contains(&free_pages), "free_pages = {free_pages}");
        assert_eq!(controller.page_table().transferred_count(), 0);
        Ok(())
    }

    #[test]
    fn same_seed_classifies_the_same_pages() -> Result<(), MigrationError> {
        let first = MigrationController::new(config(1_000, 0.5)?);
        let second = MigrationController::new(config(1_000, 0.5)?);

        for page in (0..1_000).map(PageId) {
            assert_eq!(
                first.page_table().source(page)?,
                second.page_table().source(page)?
            );
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Downtime
    ////////////////////////////////////////////////////////////////////////////

    #[test]
    fn downtime_transfers_leading_pages() -> Result<(), MigrationError> {
        let recorder = Arc::new(EventRecorder::new());
        let mut controller =
            MigrationController::new(config(100, 0.0)?).with_observer(recorder.clone());

        controller.prepare()?;
        let downtime = controller.downtime()?;

        let table = controller.page_table();
        assert_eq!(
            table.transferred_pages(),
            (0..5).map(PageId).collect::<Vec<_>>()
        );
        assert!(!table.is_present(PageId(5)));
        assert_eq!(table.source(PageId(4))?, SourceResidency::Transferred);
        assert!(downtime >= Duration::from_millis(5));
        assert_eq!(controller.metrics().downtime(), downtime);
        assert_eq!(
            recorder.count(|event| matches!(event, MigrationEvent::CriticalPageTransferred { .. })),
            5
        );
        Ok(())
    }

    #[test]
    fn downtime_transfers_free_critical_pages() -> Result<(), MigrationError> {
        let mut controller = MigrationController::new(config(20, 1.0)?);

        controller.prepare()?;
        controller.downtime()?;

        for page in (0..5).map(PageId) {
            assert!(controller.page_table().is_present(page));
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Resume
    ////////////////////////////////////////////////////////////////////////////

    #[test]
    fn resume_pulls_touched_pages() -> Result<(), MigrationError> {
        let touched = [PageId(3), PageId(42), PageId(42), PageId(77)];
        let recorder = Arc::new(EventRecorder::new());

        let mut controller = MigrationController::new(config(100, 0.0)?)
            .with_timings(ResumeTimings::fast())
            .with_observer(recorder.clone())
            .with_access_pattern(ScriptedAccess::new(touched));

        let report = controller.run()?;

        assert_eq!(controller.phase(), Phase::Completed);
        assert!(!report.cancelled);
        assert!(report.unresponsive_actors.is_empty());
        assert_eq!(report.memory_accesses, 4);
        // Page 3 is non-pageable and page 42 faults only once.
        assert_eq!(report.page_faults, 2);
        assert_eq!(report.total_transferred, 7);
        assert_eq!(report.demand_transferred, 2);
        assert_eq!(report.never_transferred, 93);

        let table = controller.page_table();
        for page in touched {
            assert!(table.is_present(page));
        }
        assert_eq!(table.find_inconsistency(), None);

        let phases: Vec<_> = recorder
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MigrationEvent::PhaseStarted(phase) => Some(phase),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            [
                Phase::Preparing,
                Phase::Downtime,
                Phase::Resuming,
                Phase::Completed
            ]
        );
        Ok(())
    }

    #[test]
    fn cancelled_resume_still_reports() -> Result<(), MigrationError> {
        let cancel = CancellationToken::new();
        let mut controller = MigrationController::new(config(1_000, 0.0)?)
            .with_timings(ResumeTimings::fast())
            .with_cancellation(cancel.clone());

        controller.prepare()?;
        controller.downtime()?;
        cancel.cancel();
        controller.resume()?;

        let report = controller.report()?;
        assert!(report.cancelled);
        assert!(report.unresponsive_actors.is_empty());
        assert!(report.total_transferred >= report.non_pageable_pages);
        assert_eq!(controller.page_table().find_inconsistency(), None);
        Ok(())
    }

    #[test]
    fn table_flags_stay_consistent_after_run() -> Result<(), MigrationError> {
        let mut controller = MigrationController::new(config(500, 0.3)?)
            .with_timings(ResumeTimings::fast())
            .with_access_budget(30);

        let report = controller.run()?;
        let table = controller.page_table();

        let migrated = (0..table.len())
            .map(PageId)
            .filter(|&page| {
                table
                    .flags(page)
                    .is_ok_and(|flags| flags.contains(PageFlags::MIGRATED))
            })
            .count() as u64;

        assert_eq!(migrated, report.total_transferred);
        assert!(report.total_transferred <= report.total_pages);
        assert_eq!(report.memory_accesses, 30);
        Ok(())
    }
}
