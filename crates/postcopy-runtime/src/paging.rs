use std::{sync::Arc, thread, time::Duration};

use postcopy_core::{
    CancellationToken, FaultReceiver, FaultRequest, MigrationEvent, MigrationObserver, PageTable,
    RecvError, SourceResidency, TransferTimer,
};

/// What the paging service did before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PagingSummary {
    /// Fault requests taken off the channel.
    pub requests_received: u64,

    /// Requests for pages that were already transferred.
    pub duplicates_skipped: u64,

    /// Pages transferred on demand, i.e. resident pages beyond the
    /// non-pageable set.
    pub demand_transferred: u64,

    /// Requests still queued when the service stopped.
    pub abandoned: u64,
}

/// Source-side actor that services page faults.
///
/// The service drains fault requests one at a time and serializes each
/// transfer against the link, so it is the only writer of target residency
/// during the resume phase.
pub struct PagingService {
    table: Arc<PageTable>,
    faults: FaultReceiver,
    timer: TransferTimer,
    cancel: CancellationToken,
    observer: Arc<dyn MigrationObserver>,
    receive_timeout: Duration,
    non_pageable_pages: u64,
}

impl PagingService {
    /// Creates a new paging service.
    pub fn new(
        table: Arc<PageTable>,
        faults: FaultReceiver,
        timer: TransferTimer,
        cancel: CancellationToken,
        observer: Arc<dyn MigrationObserver>,
    ) -> Self {
        Self {
            table,
            faults,
            timer,
            cancel,
            observer,
            receive_timeout: Duration::from_secs(1),
            non_pageable_pages: 0,
        }
    }

    /// Sets how long a single receive waits before re-checking for
    /// cancellation.
    pub fn with_receive_timeout(self, receive_timeout: Duration) -> Self {
        Self {
            receive_timeout,
            ..self
        }
    }

    /// Sets the number of pages transferred before the service started,
    /// which are excluded from the demand-transferred count.
    pub fn with_non_pageable_pages(self, non_pageable_pages: u64) -> Self {
        Self {
            non_pageable_pages,
            ..self
        }
    }

    /// Runs the service until it is cancelled or its channel is closed.
    ///
    /// A transfer that has already started is always completed before the
    /// service exits.
    pub fn run(self) -> PagingSummary {
        tracing::debug!("paging service waiting for page faults");

        let mut summary = PagingSummary::default();

        while !self.cancel.is_cancelled() {
            match self.faults.recv_timeout(self.receive_timeout) {
                Ok(request) => {
                    summary.requests_received += 1;
                    self.service(request, &mut summary);
                }
                Err(RecvError::Timeout) => {
                    tracing::trace!("timeout waiting for page faults");
                    self.observer.on_event(&MigrationEvent::FaultReceiveTimeout);
                }
                Err(RecvError::Closed) => break,
            }
        }

        summary.demand_transferred = self
            .table
            .transferred_count()
            .saturating_sub(self.non_pageable_pages);
        summary.abandoned = self.faults.pending() as u64;

        tracing::info!(
            demand_transferred = summary.demand_transferred,
            duplicates_skipped = summary.duplicates_skipped,
            abandoned = summary.abandoned,
            "paging service stopped"
        );
        self.observer.on_event(&MigrationEvent::PagingServiceStopped {
            demand_transferred: summary.demand_transferred,
        });

        summary
    }

    fn service(&self, request: FaultRequest, summary: &mut PagingSummary) {
        let page = request.page;

        match self.table.source(page) {
            Ok(SourceResidency::Transferred) => {
                tracing::trace!(%page, "page already transferred, skipping");
                summary.duplicates_skipped += 1;
                return;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(%err, "ignoring fault request");
                return;
            }
        }

        thread::sleep(self.timer.per_page());

        match self.table.mark_transferred(page) {
            Ok(true) => {
                let total_transferred = self.table.transferred_count();
                let latency = request.raised_at.elapsed();

                tracing::debug!(%page, total_transferred, ?latency, "page transferred on demand");
                self.observer.on_event(&MigrationEvent::PageTransferred {
                    page,
                    total_transferred,
                    latency,
                });
            }
            Ok(false) => summary.duplicates_skipped += 1,
            Err(err) => tracing::warn!(%err, "failed to mark page transferred"),
        }
    }
}
