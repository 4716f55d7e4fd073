use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{MigrationError, PageSize, TransferTimer};

/// Immutable migration configuration.
///
/// Constructed once through [`CoreConfig::builder`] or [`CoreConfig::new`];
/// invalid input is rejected before any residency state is allocated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    total_pages: u64,
    free_page_ratio: f64,
    link_speed_mbps: f64,
    page_size: PageSize,
    non_pageable_pages: u64,
    timer: TransferTimer,
    seed: Option<u64>,
}

impl CoreConfig {
    /// Default VM size in megabytes.
    pub const DEFAULT_VM_SIZE_MB: u64 = 2048;

    /// Default fraction of guest pages that are free before migration.
    pub const DEFAULT_FREE_PAGE_RATIO: f64 = 0.20;

    /// Default link speed in megabits per second.
    pub const DEFAULT_LINK_SPEED_MBPS: f64 = 1000.0;

    /// Fraction of guest pages treated as non-pageable critical state.
    pub const NON_PAGEABLE_FRACTION: f64 = 0.005;

    /// Lower bound on the number of non-pageable pages.
    pub const MIN_NON_PAGEABLE_PAGES: u64 = 5;

    /// Upper bound on the number of non-pageable pages.
    pub const MAX_NON_PAGEABLE_PAGES: u64 = 50;

    /// Largest guest the residency tables accept: 2^28 pages, i.e. 1 TiB of
    /// 4 KiB pages backed by a 256 MiB table.
    pub const MAX_TOTAL_PAGES: u64 = 1 << 28;

    /// Creates a new configuration with 4 KiB pages.
    pub fn new(
        total_pages: u64,
        free_page_ratio: f64,
        link_speed_mbps: f64,
    ) -> Result<Self, MigrationError> {
        Self::builder()
            .total_pages(total_pages)
            .free_page_ratio(free_page_ratio)
            .link_speed_mbps(link_speed_mbps)
            .build()
    }

    /// Returns a builder initialized with the defaults.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Computes `clamp(round(total_pages * 0.005), 5, 50)`.
    pub fn non_pageable_pages_for(total_pages: u64) -> u64 {
        let pages = (total_pages as f64 * Self::NON_PAGEABLE_FRACTION).round() as u64;
        pages.clamp(Self::MIN_NON_PAGEABLE_PAGES, Self::MAX_NON_PAGEABLE_PAGES)
    }

    /// Returns the number of guest pages.
    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    /// Returns the fraction of pages classified as free before migration.
    pub fn free_page_ratio(&self) -> f64 {
        self.free_page_ratio
    }

    /// Returns the link speed in megabits per second.
    pub fn link_speed_mbps(&self) -> f64 {
        self.link_speed_mbps
    }

    /// Returns the guest page size.
    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    /// Returns the number of pages transferred during downtime.
    ///
    /// This is [`non_pageable_pages_for`](Self::non_pageable_pages_for),
    /// limited to the number of pages the guest actually has.
    pub fn non_pageable_pages(&self) -> u64 {
        self.non_pageable_pages
    }

    /// Returns the per-page transfer timer.
    pub fn timer(&self) -> TransferTimer {
        self.timer
    }

    /// Returns the per-page transfer time.
    pub fn page_transfer_time(&self) -> Duration {
        self.timer.per_page()
    }

    /// Returns the seed for classification and access randomness, if fixed.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Returns the guest memory size in megabytes.
    pub fn vm_size_mb(&self) -> f64 {
        self.page_size.bytes_for(self.total_pages) as f64 / (1024.0 * 1024.0)
    }
}

/// Guest size, either given directly in pages or in megabytes.
#[derive(Debug, Clone, Copy)]
enum VmSize {
    Pages(u64),
    Megabytes(u64),
}

/// Builder for [`CoreConfig`].
#[derive(Debug, Clone)]
pub struct CoreConfigBuilder {
    size: VmSize,
    free_page_ratio: f64,
    link_speed_mbps: f64,
    seed: Option<u64>,
}

impl Default for CoreConfigBuilder {
    fn default() -> Self {
        Self {
            size: VmSize::Megabytes(CoreConfig::DEFAULT_VM_SIZE_MB),
            free_page_ratio: CoreConfig::DEFAULT_FREE_PAGE_RATIO,
            link_speed_mbps: CoreConfig::DEFAULT_LINK_SPEED_MBPS,
            seed: None,
        }
    }
}

impl CoreConfigBuilder {
    /// Sets the guest size in megabytes of 4 KiB pages.
    pub fn vm_size_mb(self, mb: u64) -> Self {
        Self {
            size: VmSize::Megabytes(mb),
            ..self
        }
    }

    /// Sets the guest size in pages.
    pub fn total_pages(self, pages: u64) -> Self {
        Self {
            size: VmSize::Pages(pages),
            ..self
        }
    }

    /// Sets the fraction of pages classified as free.
    pub fn free_page_ratio(self, ratio: f64) -> Self {
        Self {
            free_page_ratio: ratio,
            ..self
        }
    }

    /// Sets the link speed in megabits per second.
    pub fn link_speed_mbps(self, mbps: f64) -> Self {
        Self {
            link_speed_mbps: mbps,
            ..self
        }
    }

    /// Fixes the seed used for page classification and guest accesses.
    pub fn seed(self, seed: impl Into<Option<u64>>) -> Self {
        Self {
            seed: seed.into(),
            ..self
        }
    }

    /// Validates the input and builds the configuration.
    pub fn build(self) -> Result<CoreConfig, MigrationError> {
        let page_size = PageSize::KIB_4;
        let total_pages = match self.size {
            VmSize::Pages(pages) => pages,
            VmSize::Megabytes(mb) => page_size.pages_in_mb(mb),
        };

        if total_pages == 0 {
            return Err(MigrationError::InvalidPageCount);
        }

        if total_pages > CoreConfig::MAX_TOTAL_PAGES {
            return Err(MigrationError::TooManyPages {
                total: total_pages,
                max: CoreConfig::MAX_TOTAL_PAGES,
            });
        }

        if !(0.0..=1.0).contains(&self.free_page_ratio) {
            return Err(MigrationError::InvalidFreePageRatio(self.free_page_ratio));
        }

        if !self.link_speed_mbps.is_finite() || self.link_speed_mbps <= 0.0 {
            return Err(MigrationError::InvalidLinkSpeed(self.link_speed_mbps));
        }

        Ok(CoreConfig {
            total_pages,
            free_page_ratio: self.free_page_ratio,
            link_speed_mbps: self.link_speed_mbps,
            page_size,
            non_pageable_pages: CoreConfig::non_pageable_pages_for(total_pages).min(total_pages),
            timer: TransferTimer::new(page_size, self.link_speed_mbps),
            seed: self.seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn defaults() -> Result<(), MigrationError> {
        let config = CoreConfig::builder().build()?;
        assert_eq!(config.total_pages(), 524_288);
        assert_eq!(config.free_page_ratio(), 0.20);
        assert_eq!(config.link_speed_mbps(), 1000.0);
        assert_eq!(config.non_pageable_pages(), 50);
        assert_eq!(config.timer().per_page_ms(), 1);
        assert_eq!(config.vm_size_mb(), 2048.0);
        assert_eq!(config.seed(), None);
        Ok(())
    }

    #[test]
    fn small_vm_clamps_to_minimum() -> Result<(), MigrationError> {
        let config = CoreConfig::new(100, 0.0, 1000.0)?;
        assert_eq!(config.non_pageable_pages(), 5);
        Ok(())
    }

    #[test]
    fn large_vm_clamps_to_maximum() -> Result<(), MigrationError> {
        let config = CoreConfig::new(1_000_000, 0.2, 1000.0)?;
        assert_eq!(config.non_pageable_pages(), 50);
        Ok(())
    }

    #[test]
    fn non_pageable_rounds() {
        // 0.5% of 1500 is 7.5, rounded half away from zero.
        assert_eq!(CoreConfig::non_pageable_pages_for(1500), 8);
        assert_eq!(CoreConfig::non_pageable_pages_for(1499), 7);
        assert_eq!(CoreConfig::non_pageable_pages_for(2000), 10);
    }

    #[test]
    fn tiny_vm_never_exceeds_its_own_size() -> Result<(), MigrationError> {
        let config = CoreConfig::new(3, 0.0, 1000.0)?;
        assert_eq!(config.non_pageable_pages(), 3);
        Ok(())
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(matches!(
            CoreConfig::new(0, 0.2, 1000.0),
            Err(MigrationError::InvalidPageCount)
        ));
        assert!(matches!(
            CoreConfig::builder().vm_size_mb(u64::MAX).build(),
            Err(MigrationError::TooManyPages {
                max: CoreConfig::MAX_TOTAL_PAGES,
                ..
            })
        ));
        assert!(matches!(
            CoreConfig::new(CoreConfig::MAX_TOTAL_PAGES + 1, 0.2, 1000.0),
            Err(MigrationError::TooManyPages { .. })
        ));
        assert!(matches!(
            CoreConfig::builder().vm_size_mb(0).build(),
            Err(MigrationError::InvalidPageCount)
        ));
        assert!(matches!(
            CoreConfig::new(100, 1.5, 1000.0),
            Err(MigrationError::InvalidFreePageRatio(_))
        ));
        assert!(matches!(
            CoreConfig::new(100, -0.1, 1000.0),
            Err(MigrationError::InvalidFreePageRatio(_))
        ));
        assert!(matches!(
            CoreConfig::new(100, f64::NAN, 1000.0),
            Err(MigrationError::InvalidFreePageRatio(_))
        ));
        assert!(matches!(
            CoreConfig::new(100, 0.2, 0.0),
            Err(MigrationError::InvalidLinkSpeed(_))
        ));
        assert!(matches!(
            CoreConfig::new(100, 0.2, -10.0),
            Err(MigrationError::InvalidLinkSpeed(_))
        ));
        assert!(matches!(
            CoreConfig::new(100, 0.2, f64::INFINITY),
            Err(MigrationError::InvalidLinkSpeed(_))
        ));
    }

    #[test]
    fn largest_guest_is_accepted() -> Result<(), MigrationError> {
        let config = CoreConfig::builder().vm_size_mb(1 << 20).build()?;
        assert_eq!(config.total_pages(), CoreConfig::MAX_TOTAL_PAGES);
        Ok(())
    }

    #[test]
    fn ratio_bounds_are_inclusive() -> Result<(), MigrationError> {
        CoreConfig::new(100, 0.0, 1000.0)?;
        CoreConfig::new(100, 1.0, 1000.0)?;
        Ok(())
    }

    proptest! {
        #[test]
        fn non_pageable_pages_are_clamped(total in 5u64..100_000_000) {
            let expected = ((total as f64 * 0.005).round() as u64).clamp(5, 50);
            let config = CoreConfig::new(total, 0.0, 1000.0).unwrap();
            prop_assert_eq!(config.non_pageable_pages(), expected);
            prop_assert!((5..=50).contains(&config.non_pageable_pages()));
        }
    }
}
