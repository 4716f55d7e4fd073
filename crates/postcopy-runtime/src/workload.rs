use std::collections::VecDeque;

use postcopy_core::PageId;
use rand::Rng;

/// Fewest accesses a workload performs.
pub const MIN_ACCESS_BUDGET: u64 = 20;

/// Most accesses a workload performs.
pub const MAX_ACCESS_BUDGET: u64 = 100;

/// Guest pages per access before the budget is clamped.
pub const PAGES_PER_ACCESS: u64 = 5000;

/// Returns the number of memory accesses the simulated VM performs:
/// `max(20, min(100, total_pages / 5000))`.
///
/// Larger guests get longer workloads, within bounds.
pub fn access_budget(total_pages: u64) -> u64 {
    (total_pages / PAGES_PER_ACCESS).clamp(MIN_ACCESS_BUDGET, MAX_ACCESS_BUDGET)
}

/// Source of the pages touched by the simulated instruction stream.
pub trait AccessPattern: Send {
    /// Returns the next page to access, or `None` when the workload has
    /// nothing more to do.
    fn next_page(&mut self, total_pages: u64) -> Option<PageId>;
}

impl<T> AccessPattern for Box<T>
where
    T: AccessPattern + ?Sized,
{
    fn next_page(&mut self, total_pages: u64) -> Option<PageId> {
        (**self).next_page(total_pages)
    }
}

/// Uniformly random accesses over the whole guest.
#[derive(Debug, Clone)]
pub struct UniformAccess<R> {
    rng: R,
}

impl<R> UniformAccess<R>
where
    R: Rng + Send,
{
    /// Creates a uniform pattern drawing from `rng`.
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R> AccessPattern for UniformAccess<R>
where
    R: Rng + Send,
{
    fn next_page(&mut self, total_pages: u64) -> Option<PageId> {
        if total_pages == 0 {
            return None;
        }

        Some(PageId(self.rng.gen_range(0..total_pages)))
    }
}

/// A fixed sequence of accesses.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAccess {
    pages: VecDeque<PageId>,
}

impl ScriptedAccess {
    /// Creates a pattern that touches `pages` in order, then stops.
    pub fn new(pages: impl IntoIterator<Item = PageId>) -> Self {
        Self {
            pages: pages.into_iter().collect(),
        }
    }
}

impl AccessPattern for ScriptedAccess {
    fn next_page(&mut self, _total_pages: u64) -> Option<PageId> {
        self.pages.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng as _;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn budget_is_clamped() {
        assert_eq!(access_budget(100), 20);
        assert_eq!(access_budget(524_288), 100);
        assert_eq!(access_budget(250_000), 50);
        assert_eq!(access_budget(10_000_000), 100);
    }

    #[test]
    fn uniform_stays_in_range() {
        let mut pattern = UniformAccess::new(ChaCha8Rng::seed_from_u64(3));

        for _ in 0..1000 {
            let page = pattern.next_page(17).unwrap();
            assert!(page.0 < 17);
        }

        assert_eq!(pattern.next_page(0), None);
    }

    #[test]
    fn seeded_uniform_is_reproducible() {
        let mut a = UniformAccess::new(ChaCha8Rng::seed_from_u64(11));
        let mut b = UniformAccess::new(ChaCha8Rng::seed_from_u64(11));

        for _ in 0..100 {
            assert_eq!(a.next_page(1_000_000), b.next_page(1_000_000));
        }
    }

    #[test]
    fn scripted_runs_out() {
        let mut pattern: Box<dyn AccessPattern> =
            Box::new(ScriptedAccess::new([PageId(4), PageId(4), PageId(1)]));

        assert_eq!(pattern.next_page(10), Some(PageId(4)));
        assert_eq!(pattern.next_page(10), Some(PageId(4)));
        assert_eq!(pattern.next_page(10), Some(PageId(1)));
        assert_eq!(pattern.next_page(10), None);
    }

    proptest! {
        #[test]
        fn budget_bounds(total in 1u64..u64::MAX / 2) {
            let budget = access_budget(total);
            prop_assert!((MIN_ACCESS_BUDGET..=MAX_ACCESS_BUDGET).contains(&budget));
        }
    }
}
