use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::PageSize;

/// Per-page transfer latency over a constant-bandwidth link.
///
/// Every single-page transfer, both during downtime and during demand
/// paging, takes the same amount of time. The link has no contention and no
/// queuing delay beyond the serialized per-page transfer time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTimer {
    page_transfer_time_ms: u64,
}

impl TransferTimer {
    /// The floor applied to the per-page transfer time.
    pub const MIN_PAGE_TRANSFER_TIME_MS: u64 = 1;

    /// Creates a timer for pages of `page_size` over a link of
    /// `link_speed_mbps` megabits per second.
    ///
    /// The link speed is expected to be positive; see
    /// [`page_transfer_time_ms`](Self::page_transfer_time_ms).
    pub fn new(page_size: PageSize, link_speed_mbps: f64) -> Self {
        Self {
            page_transfer_time_ms: Self::page_transfer_time_ms(page_size, link_speed_mbps),
        }
    }

    /// Computes `max(1, round(page_bits / link_bps * 1000))`.
    ///
    /// The result is never zero, however fast the link.
    pub fn page_transfer_time_ms(page_size: PageSize, link_speed_mbps: f64) -> u64 {
        let page_size_bits = page_size.bits() as f64;
        let link_speed_bps = link_speed_mbps * 1_000_000.0;
        let ms = (page_size_bits / link_speed_bps * 1000.0).round();

        // `as` saturates: NaN becomes 0 and infinity becomes `u64::MAX`.
        (ms as u64).max(Self::MIN_PAGE_TRANSFER_TIME_MS)
    }

    /// Returns the transfer time of a single page in milliseconds.
    pub fn per_page_ms(&self) -> u64 {
        self.page_transfer_time_ms
    }

    /// Returns the transfer time of a single page.
    pub fn per_page(&self) -> Duration {
        Duration::from_millis(self.page_transfer_time_ms)
    }

    /// Returns the time needed to transfer `pages` pages back to back.
    pub fn for_pages(&self, pages: u64) -> Duration {
        Duration::from_millis(self.page_transfer_time_ms.saturating_mul(pages))
    }
}
