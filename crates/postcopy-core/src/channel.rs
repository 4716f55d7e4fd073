use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::PageId;

/// A page-fault request from the target to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRequest {
    /// The faulting page.
    pub page: PageId,

    /// When the fault was raised.
    pub raised_at: Instant,
}

impl FaultRequest {
    /// Creates a new request for `page`, stamped with the current time.
    pub fn new(page: PageId) -> Self {
        Self {
            page,
            raised_at: Instant::now(),
        }
    }
}

/// Reason a receive returned without a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// No request arrived within the timeout.
    #[error("timed out waiting for a page fault")]
    Timeout,

    /// The channel was closed.
    #[error("fault channel closed")]
    Closed,
}

#[derive(Default)]
struct State {
    queue: VecDeque<FaultRequest>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.cv.notify_all();
    }
}

/// Creates an unbounded fault channel.
///
/// The channel never applies backpressure: any number of faults may be
/// outstanding. Duplicate requests for the same page are delivered as-is;
/// the consumer is expected to skip pages that are already resident.
pub fn fault_channel() -> (FaultSender, FaultReceiver) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::default()),
        cv: Condvar::new(),
    });

    (
        FaultSender {
            shared: shared.clone(),
        },
        FaultReceiver { shared },
    )
}

/// Producer half of the fault channel.
#[derive(Clone)]
pub struct FaultSender {
    shared: Arc<Shared>,
}

impl FaultSender {
    /// Enqueues a fault for `page` without blocking.
    ///
    /// Returns `false` if the channel has been closed and the request was
    /// dropped.
    pub fn send(&self, page: PageId) -> bool {
        let mut state = self.shared.lock();
        if state.closed {
            tracing::trace!(%page, "fault dropped, channel closed");
            return false;
        }

        state.queue.push_back(FaultRequest::new(page));
        self.shared.cv.notify_one();
        true
    }

    /// Closes the channel, waking a blocked receiver.
    pub fn close(&self) {
        self.shared.close();
    }
}

/// Consumer half of the fault channel.
pub struct FaultReceiver {
    shared: Arc<Shared>,
}

impl FaultReceiver {
    /// Waits up to `timeout` for the next request.
    ///
    /// Once the channel is closed, returns [`RecvError::Closed`] even if
    /// requests are still queued; closing is how a pending receive is
    /// interrupted on shutdown.
    ///
    /// A timeout too large to represent as a deadline waits until a request
    /// arrives or the channel is closed.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<FaultRequest, RecvError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.lock();

        loop {
            if state.closed {
                return Err(RecvError::Closed);
            }

            if let Some(request) = state.queue.pop_front() {
                return Ok(request);
            }

            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(RecvError::Timeout);
                    }

                    self.shared
                        .cv
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .shared
                    .cv
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Returns the number of queued requests.
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Closes the channel.
    pub fn close(&self) {
        self.shared.close();
    }
}
