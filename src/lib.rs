//! Post-copy live migration with pure demand paging.
//!
//! This crate re-exports the data model from [`postcopy_core`] and, with the
//! `runtime` feature (enabled by default), the migration actors and the
//! phase state machine from [`postcopy_runtime`].
//!
//! ```no_run
//! use postcopy::{CoreConfig, MigrationController, ResumeTimings};
//!
//! # fn main() -> Result<(), postcopy::MigrationError> {
//! let config = CoreConfig::builder()
//!     .vm_size_mb(512)
//!     .free_page_ratio(0.2)
//!     .link_speed_mbps(1000.0)
//!     .build()?;
//!
//! let mut controller = MigrationController::new(config).with_timings(ResumeTimings::default());
//! let report = controller.run()?;
//! println!("downtime: {:?}", report.downtime);
//! # Ok(())
//! # }
//! ```

pub use postcopy_core::*;
#[cfg(feature = "runtime")]
pub use postcopy_runtime::*;
