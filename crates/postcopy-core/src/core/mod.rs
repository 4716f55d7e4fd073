mod page;

pub use self::page::{PageId, PageSize};
