use std::time::Duration;

/// Wall-clock parameters of the resume phase.
///
/// None of these affect what is transferred, only how long the simulated
/// actors take and how quickly they react to cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeTimings {
    /// Simulated execution time between two memory accesses.
    pub instruction_delay: Duration,

    /// Upper bound on a single wait for a faulted page.
    pub fault_poll_interval: Duration,

    /// How long the paging service waits for a fault before polling for
    /// shutdown again.
    pub fault_receive_timeout: Duration,

    /// Time given to in-flight transfers after the workload completes.
    pub drain_grace: Duration,

    /// How long to wait for each actor to acknowledge cancellation.
    pub join_timeout: Duration,

    /// How often the controller re-checks for outside cancellation while
    /// waiting for the workload.
    pub completion_poll: Duration,
}

impl ResumeTimings {
    /// Millisecond-scale timings, for tests and quick runs.
    pub fn fast() -> Self {
        Self {
            instruction_delay: Duration::from_millis(1),
            fault_poll_interval: Duration::from_millis(1),
            fault_receive_timeout: Duration::from_millis(10),
            drain_grace: Duration::from_millis(20),
            join_timeout: Duration::from_secs(2),
            completion_poll: Duration::from_millis(5),
        }
    }
}

impl Default for ResumeTimings {
    fn default() -> Self {
        Self {
            instruction_delay: Duration::from_millis(50),
            fault_poll_interval: Duration::from_millis(10),
            fault_receive_timeout: Duration::from_secs(1),
            drain_grace: Duration::from_millis(500),
            join_timeout: Duration::from_secs(2),
            completion_poll: Duration::from_millis(100),
        }
    }
}
