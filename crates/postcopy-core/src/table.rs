use std::{
    sync::{
        Condvar, Mutex, PoisonError,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use indexmap::IndexSet;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{CancellationToken, MigrationError, PageId};

bitflags::bitflags! {
    /// Per-page state bits.
    ///
    /// `TRANSFERRED` and `PRESENT` are always set together, in a single
    /// atomic operation, so the source and target views of a page can never
    /// disagree.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PageFlags: u8 {
        /// The page holds live data on the source (not free).
        const USED = 1 << 0;

        /// The page has been sent to the target.
        const TRANSFERRED = 1 << 1;

        /// The page is resident on the target.
        const PRESENT = 1 << 2;

        /// State of a page after its transfer completed.
        const MIGRATED = Self::TRANSFERRED.bits() | Self::PRESENT.bits();
    }
}

/// Source-side state of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceResidency {
    /// Reclaimable before migration; never needs proactive transfer.
    Free,

    /// Holds live data.
    Used,

    /// Sent to the target. Never reverts.
    Transferred,
}

/// Target-side state of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetResidency {
    /// Not yet received.
    NotPresent,

    /// Received. Never reverts.
    Present,
}

/// Outcome of waiting for a page to become resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The page is present on the target.
    Present,

    /// Cancellation was requested before the page arrived.
    Cancelled,
}

/// The shared residency model.
///
/// Holds per-page source and target residency as one atomic byte per page,
/// plus the set of transferred pages in arrival order.
///
/// Residency reads are lock-free. Transitions go through
/// [`mark_transferred`], which is meant to be called by a single writer at
/// a time (the downtime loop, then the paging service). Threads waiting for
/// a page are woken through a table-wide arrival notification rather than by
/// polling.
///
/// [`mark_transferred`]: Self::mark_transferred
pub struct PageTable {
    pages: Box<[AtomicU8]>,
    transferred: Mutex<IndexSet<PageId>>,
    transferred_count: AtomicU64,
    arrivals: Mutex<u64>,
    arrival_cv: Condvar,
}

impl PageTable {
    /// Creates a table of `total_pages` used, not-yet-transferred pages.
    pub fn new(total_pages: u64) -> Self {
        Self::from_flags((0..total_pages).map(|_| PageFlags::USED))
    }

    /// Creates a table whose pages are randomly classified as free with
    /// probability `free_page_ratio`.
    pub fn classify(total_pages: u64, free_page_ratio: f64, rng: &mut impl Rng) -> Self {
        Self::from_flags((0..total_pages).map(|_| {
            if rng.r#gen::<f64>() < free_page_ratio {
                PageFlags::empty()
            }
            else {
                PageFlags::USED
            }
        }))
    }

    /// Creates a table from explicit per-page flags.
    pub fn from_flags(flags: impl IntoIterator<Item = PageFlags>) -> Self {
        let pages: Box<[AtomicU8]> = flags
            .into_iter()
            .map(|flags| AtomicU8::new(flags.bits()))
            .collect();

        let transferred: IndexSet<PageId> = pages
            .iter()
            .enumerate()
            .filter(|(_, state)| {
                PageFlags::from_bits_truncate(state.load(Ordering::Relaxed))
                    .contains(PageFlags::MIGRATED)
            })
            .map(|(index, _)| PageId(index as u64))
            .collect();

        Self {
            pages,
            transferred_count: AtomicU64::new(transferred.len() as u64),
            transferred: Mutex::new(transferred),
            arrivals: Mutex::new(0),
            arrival_cv: Condvar::new(),
        }
    }

    /// Returns the number of pages.
    pub fn len(&self) -> u64 {
        self.pages.len() as u64
    }

    /// Checks whether the table has no pages.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Checks that `page` lies within the table.
    pub fn check(&self, page: PageId) -> Result<(), MigrationError> {
        if page.0 < self.len() {
            Ok(())
        }
        else {
            Err(MigrationError::PageOutOfRange {
                page,
                total: self.len(),
            })
        }
    }

    /// Returns the raw state bits of a page.
    pub fn flags(&self, page: PageId) -> Result<PageFlags, MigrationError> {
        self.check(page)?;
        Ok(self.load(page))
    }

    /// Returns the source-side residency of a page.
    pub fn source(&self, page: PageId) -> Result<SourceResidency, MigrationError> {
        let flags = self.flags(page)?;

        if flags.contains(PageFlags::TRANSFERRED) {
            Ok(SourceResidency::Transferred)
        }
        else if flags.contains(PageFlags::USED) {
            Ok(SourceResidency::Used)
        }
        else {
            Ok(SourceResidency::Free)
        }
    }

    /// Returns the target-side residency of a page.
    pub fn target(&self, page: PageId) -> Result<TargetResidency, MigrationError> {
        if self.flags(page)?.contains(PageFlags::PRESENT) {
            Ok(TargetResidency::Present)
        }
        else {
            Ok(TargetResidency::NotPresent)
        }
    }

    /// Checks whether a page is resident on the target.
    ///
    /// Pages outside the table are never present.
    pub fn is_present(&self, page: PageId) -> bool {
        page.0 < self.len() && self.load(page).contains(PageFlags::PRESENT)
    }

    /// Counts pages classified as free on the source.
    ///
    /// Transferred pages keep their classification bit, so the count is
    /// stable across the whole migration.
    pub fn count_free(&self) -> u64 {
        self.pages
            .iter()
            .filter(|state| {
                !PageFlags::from_bits_truncate(state.load(Ordering::Relaxed))
                    .contains(PageFlags::USED)
            })
            .count() as u64
    }

    /// Marks a page as transferred on the source and present on the target,
    /// then wakes every thread waiting for an arrival.
    ///
    /// Returns `false` without touching any state if the page had already
    /// been transferred.
    pub fn mark_transferred(&self, page: PageId) -> Result<bool, MigrationError> {
        self.check(page)?;

        {
            let mut transferred = self
                .transferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if !transferred.insert(page) {
                tracing::trace!(%page, "page already transferred");
                return Ok(false);
            }

            let previous = PageFlags::from_bits_truncate(
                self.pages[page.index()].fetch_or(PageFlags::MIGRATED.bits(), Ordering::AcqRel),
            );
            debug_assert!(!previous.intersects(PageFlags::MIGRATED));

            self.transferred_count.fetch_add(1, Ordering::AcqRel);
        }

        let mut arrivals = self.arrivals.lock().unwrap_or_else(PoisonError::into_inner);
        *arrivals += 1;
        self.arrival_cv.notify_all();

        Ok(true)
    }

    /// Returns the number of transferred pages.
    pub fn transferred_count(&self) -> u64 {
        self.transferred_count.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the transferred set, in arrival order.
    pub fn transferred_pages(&self) -> Vec<PageId> {
        self.transferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Blocks until `page` is present on the target or `cancel` fires.
    ///
    /// Each wait is bounded by `poll_interval`, which also bounds how late a
    /// cancellation that was not accompanied by
    /// [`interrupt_waiters`](Self::interrupt_waiters) is noticed.
    pub fn wait_present(
        &self,
        page: PageId,
        cancel: &CancellationToken,
        poll_interval: Duration,
    ) -> Result<WaitOutcome, MigrationError> {
        self.check(page)?;

        let mut arrivals = self.arrivals.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if self.is_present(page) {
                return Ok(WaitOutcome::Present);
            }

            if cancel.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }

            arrivals = self
                .arrival_cv
                .wait_timeout(arrivals, poll_interval)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wakes every thread blocked in [`wait_present`](Self::wait_present)
    /// so it can re-check its cancellation token.
    pub fn interrupt_waiters(&self) {
        let _arrivals = self.arrivals.lock().unwrap_or_else(PoisonError::into_inner);
        self.arrival_cv.notify_all();
    }

    /// Checks that, for every page, `Transferred` on the source, membership
    /// in the transferred set and `Present` on the target all agree.
    ///
    /// Returns the first page that violates the invariant, if any.
    pub fn find_inconsistency(&self) -> Option<PageId> {
        let transferred = self
            .transferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let page = (0..self.len()).map(PageId).find(|&page| {
            let flags = self.load(page);
            let source = flags.contains(PageFlags::TRANSFERRED);
            let target = flags.contains(PageFlags::PRESENT);
            source != target || source != transferred.contains(&page)
        });

        // A counter drift without a per-page mismatch points at the newest arrival.
        if page.is_none() && transferred.len() as u64 != self.transferred_count() {
            return transferred.last().copied();
        }

        page
    }

    fn load(&self, page: PageId) -> PageFlags {
        PageFlags::from_bits_truncate(self.pages[page.index()].load(Ordering::Acquire))
    }
}

impl std::fmt::Debug for PageTable {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PageTable")
            .field("pages", &self.len())
            .field("transferred", &self.transferred_count())
            .finish()
    }
}
