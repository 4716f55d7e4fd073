use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use postcopy_core::{
    CancellationToken, FaultSender, MigrationEvent, MigrationObserver, PageId, PageTable,
    WaitOutcome,
};

use crate::AccessPattern;

/// Counters written by the VM execution actor.
///
/// Each counter has exactly one writer; the controller reads them after the
/// actor has been joined (or given up on).
#[derive(Debug, Default)]
pub struct ResumeCounters {
    memory_accesses: AtomicU64,
    page_faults: AtomicU64,
    workload_completed: AtomicBool,
}

impl ResumeCounters {
    /// Returns the number of memory accesses performed.
    pub fn memory_accesses(&self) -> u64 {
        self.memory_accesses.load(Ordering::Acquire)
    }

    /// Returns the number of page faults raised.
    pub fn page_faults(&self) -> u64 {
        self.page_faults.load(Ordering::Acquire)
    }

    /// Checks whether the workload exhausted its access budget.
    pub fn workload_completed(&self) -> bool {
        self.workload_completed.load(Ordering::Acquire)
    }
}

/// What the simulated VM did before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VmExecutionSummary {
    /// Memory accesses performed.
    pub memory_accesses: u64,

    /// Page faults raised.
    pub page_faults: u64,

    /// Whether the workload ran to completion rather than being cancelled.
    pub completed: bool,
}

/// Target-side actor simulating the guest's instruction stream.
///
/// Every access to a page that is not yet resident raises a fault and stalls
/// the instruction stream until the page arrives; the stream never proceeds
/// past a fault.
pub struct VmExecutionActor<A> {
    table: Arc<PageTable>,
    faults: FaultSender,
    counters: Arc<ResumeCounters>,
    cancel: CancellationToken,
    observer: Arc<dyn MigrationObserver>,
    access: A,
    budget: u64,
    instruction_delay: Duration,
    fault_poll_interval: Duration,
}

impl<A> VmExecutionActor<A>
where
    A: AccessPattern,
{
    /// Creates a new actor performing at most `budget` accesses drawn from
    /// `access`.
    pub fn new(
        table: Arc<PageTable>,
        faults: FaultSender,
        cancel: CancellationToken,
        observer: Arc<dyn MigrationObserver>,
        access: A,
        budget: u64,
    ) -> Self {
        Self {
            table,
            faults,
            counters: Arc::default(),
            cancel,
            observer,
            access,
            budget,
            instruction_delay: Duration::from_millis(50),
            fault_poll_interval: Duration::from_millis(10),
        }
    }

    /// Uses `counters` instead of private ones, so they can be read while
    /// the actor runs or after it has been abandoned.
    pub fn with_counters(self, counters: Arc<ResumeCounters>) -> Self {
        Self { counters, ..self }
    }

    /// Sets the simulated execution time between accesses.
    pub fn with_instruction_delay(self, instruction_delay: Duration) -> Self {
        Self {
            instruction_delay,
            ..self
        }
    }

    /// Sets the upper bound on a single wait for a faulted page.
    pub fn with_fault_poll_interval(self, fault_poll_interval: Duration) -> Self {
        Self {
            fault_poll_interval,
            ..self
        }
    }

    /// Runs the workload until the budget is spent, the access pattern is
    /// exhausted, or cancellation is requested.
    pub fn run(mut self) -> VmExecutionSummary {
        tracing::debug!(budget = self.budget, "vm execution started with demand paging");

        let completed = self.execute();
        let summary = VmExecutionSummary {
            memory_accesses: self.counters.memory_accesses(),
            page_faults: self.counters.page_faults(),
            completed,
        };

        if completed {
            self.counters
                .workload_completed
                .store(true, Ordering::Release);

            tracing::info!(
                faults = summary.page_faults,
                accesses = summary.memory_accesses,
                "vm workload completed"
            );
            self.observer.on_event(&MigrationEvent::WorkloadCompleted {
                faults: summary.page_faults,
                accesses: summary.memory_accesses,
            });
        }
        else {
            tracing::debug!(
                faults = summary.page_faults,
                accesses = summary.memory_accesses,
                "vm workload interrupted"
            );
        }

        summary
    }

    /// Returns `false` if cancelled.
    fn execute(&mut self) -> bool {
        let total_pages = self.table.len();

        for _ in 0..self.budget {
            if self.cancel.is_cancelled() {
                return false;
            }

            let Some(page) = self.access.next_page(total_pages)
            else {
                break;
            };

            if let Err(err) = self.table.check(page) {
                tracing::warn!(%err, "access outside guest memory");
                continue;
            }

            self.counters.memory_accesses.fetch_add(1, Ordering::AcqRel);

            if !self.table.is_present(page) && !self.fault(page) {
                return false;
            }

            if !self.cancel.sleep(self.instruction_delay) {
                return false;
            }
        }

        true
    }

    /// Raises a fault for `page` and stalls until it is resident.
    ///
    /// Returns `false` if cancelled while waiting.
    fn fault(&self, page: PageId) -> bool {
        let fault_number = self.counters.page_faults.fetch_add(1, Ordering::AcqRel) + 1;
        let transferred_fraction =
            self.table.transferred_count() as f64 / self.table.len() as f64;

        self.faults.send(page);

        tracing::trace!(%page, fault_number, "page fault");
        self.observer.on_event(&MigrationEvent::PageFault {
            page,
            fault_number,
            transferred_fraction,
        });

        match self
            .table
            .wait_present(page, &self.cancel, self.fault_poll_interval)
        {
            Ok(WaitOutcome::Present) => true,
            Ok(WaitOutcome::Cancelled) => {
                tracing::trace!(%page, "fault wait cancelled");
                false
            }
            Err(err) => {
                tracing::warn!(%err, "fault wait failed");
                false
            }
        }
    }
}
