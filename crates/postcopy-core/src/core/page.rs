use serde::{Deserialize, Serialize};

/// A guest page index.
///
/// Pages are not materialized objects; a `PageId` is simply the position of
/// the page in the residency tables, in the range `[0, total_pages)`.
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl PageId {
    /// Creates a new instance of the `PageId` type.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the position of the page in the residency tables.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u64> for PageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<PageId> for u64 {
    fn from(value: PageId) -> u64 {
        value.0
    }
}

impl ::std::fmt::Debug for PageId {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

impl ::std::fmt::Display for PageId {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The size of a guest page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageSize(u64);

impl PageSize {
    /// Standard 4 KiB page.
    pub const KIB_4: Self = Self(4096);

    /// Returns the page size in bytes.
    pub const fn bytes(self) -> u64 {
        self.0
    }

    /// Returns the page size in bits.
    pub const fn bits(self) -> u64 {
        self.0 * 8
    }

    /// Returns the page size in KiB.
    pub const fn kib(self) -> u64 {
        self.0 / 1024
    }

    /// Returns the number of pages backing `mb` megabytes of guest memory.
    ///
    /// The computation is carried out in `u64`, so multi-gigabyte guests do
    /// not overflow.
    pub const fn pages_in_mb(self, mb: u64) -> u64 {
        mb.saturating_mul(1024 * 1024) / self.0
    }

    /// Returns the size of `pages` pages in bytes.
    pub const fn bytes_for(self, pages: u64) -> u64 {
        pages * self.0
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::KIB_4
    }
}
