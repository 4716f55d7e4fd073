use std::{
    io::{self, Write},
    sync::{Mutex, PoisonError},
};

use postcopy_core::{MigrationEvent, MigrationObserver, Phase};

/// Every how many faults a progress line is printed.
const FAULT_PROGRESS_INTERVAL: u64 = 10;

/// Critical pages per line of downtime progress dots.
const DOTS_PER_LINE: u64 = 10;

struct State<W> {
    out: W,
    critical_pages: u64,
}

/// Prints migration progress as it happens.
///
/// Events arrive from the controller and from both actor threads, so output
/// is serialized behind a lock.
pub struct ConsoleObserver<W> {
    state: Mutex<State<W>>,
    non_pageable_pages: u64,
}

impl<W> ConsoleObserver<W>
where
    W: Write,
{
    /// Creates an observer writing to `out`.
    pub fn new(out: W, non_pageable_pages: u64) -> Self {
        Self {
            state: Mutex::new(State {
                out,
                critical_pages: 0,
            }),
            non_pageable_pages,
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .out
    }

    fn render(&self, state: &mut State<W>, event: &MigrationEvent) -> io::Result<()> {
        let out = &mut state.out;

        match event {
            MigrationEvent::PhaseStarted(Phase::Preparing) => {
                writeln!(out, "--- PHASE 1: PREPARATION (LIVE) ---")?;
                writeln!(out, "Initiating migration process...")?;
            }
            MigrationEvent::PhaseStarted(Phase::Downtime) => {
                writeln!(out)?;
                writeln!(out, "--- PHASE 2: DOWNTIME (VM SUSPENDED) ---")?;
                writeln!(out, "VM Execution STOPPED - Suspending VM...")?;
                writeln!(out, "Transferring critical state...")?;
            }
            MigrationEvent::PhaseStarted(Phase::Resuming) => {
                writeln!(out)?;
                writeln!(out, "--- PHASE 3: RESUME TIME (DEMAND PAGING ONLY) ---")?;
                writeln!(out, "Demand Paging Service (Source): Waiting for page fault requests...")?;
                writeln!(out, "VM Execution (Target): Running application with DEMAND PAGING")?;
            }
            MigrationEvent::PhaseStarted(_) => {}
            MigrationEvent::FreePagesReclaimed { count } => {
                writeln!(out, "DSB (Dirty State Bitmap) Activated")?;
                writeln!(out, "   > Reclaimed {count} free pages to reduce memory footprint")?;
            }
            MigrationEvent::PhaseCompleted { phase, elapsed } => match phase {
                Phase::Preparing => {
                    writeln!(out, "   > Preparation Time: {} ms", elapsed.as_millis())?;
                }
                Phase::Downtime => {
                    if state.critical_pages % DOTS_PER_LINE != 0 {
                        writeln!(out)?;
                    }
                    writeln!(out, "VM RESUMED on Target Host")?;
                    writeln!(
                        out,
                        "   > CPU State + {} critical pages transferred",
                        self.non_pageable_pages
                    )?;
                    writeln!(out, "   > Downtime Duration: {} ms", elapsed.as_millis())?;
                    writeln!(
                        out,
                        "   > VM is now running on target - pages will be pulled ON DEMAND ONLY"
                    )?;
                }
                Phase::Resuming => {
                    writeln!(out)?;
                    writeln!(
                        out,
                        "Post-Copy Migration Resume Phase completed in {} ms",
                        elapsed.as_millis()
                    )?;
                }
                Phase::Initialized | Phase::Completed => {}
            },
            MigrationEvent::CriticalPageTransferred { .. } => {
                state.critical_pages += 1;
                write!(out, ".")?;
                if state.critical_pages % DOTS_PER_LINE == 0 {
                    writeln!(out)?;
                }
            }
            MigrationEvent::PageFault {
                page,
                fault_number,
                transferred_fraction,
            } => {
                if fault_number % FAULT_PROGRESS_INTERVAL == 0 {
                    writeln!(
                        out,
                        "   Page Fault #{fault_number} - Requesting page {page} (Transferred: {:.1}%)",
                        transferred_fraction * 100.0
                    )?;
                }
            }
            MigrationEvent::PageTransferred {
                page,
                total_transferred,
                ..
            } => {
                writeln!(
                    out,
                    "   > Page {page} transferred on demand (Total: {total_transferred} pages)"
                )?;
            }
            MigrationEvent::FaultReceiveTimeout => {}
            MigrationEvent::WorkloadCompleted { faults, accesses } => {
                writeln!(
                    out,
                    "VM workload completed after {faults} page faults / {accesses} total accesses"
                )?;
            }
            MigrationEvent::PagingServiceStopped { demand_transferred } => {
                writeln!(
                    out,
                    "Demand Paging Service completed: {demand_transferred} pages transferred on demand"
                )?;
            }
            MigrationEvent::ActorUnresponsive(kind) => {
                writeln!(out, "   ! {kind} did not stop in time, abandoning it")?;
            }
        }

        out.flush()
    }
}

impl<W> MigrationObserver for ConsoleObserver<W>
where
    W: Write + Send,
{
    fn on_event(&self, event: &MigrationEvent) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Err(err) = self.render(&mut state, event) {
            tracing::trace!(%err, "failed to print progress");
        }
    }
}
