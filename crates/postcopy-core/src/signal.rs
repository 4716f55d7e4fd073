use std::{
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

struct Inner {
    raised: Arc<AtomicBool>,
    lock: Mutex<()>,
    cv: Condvar,
}

/// A one-shot, cloneable event flag.
///
/// Once raised, a signal stays raised. Waiters are woken by [`raise`], and
/// also observe a flag set from outside (for example by a signal handler
/// through [`flag`]) within one wait slice.
///
/// [`raise`]: Self::raise
/// [`flag`]: Self::flag
#[derive(Clone)]
pub struct Signal {
    inner: Arc<Inner>,
}

impl Signal {
    /// Upper bound on a single condition-variable wait. Bounds the latency
    /// of observing a flag that was set without a notification.
    const WAIT_SLICE: Duration = Duration::from_millis(10);

    /// Creates a new, lowered signal.
    pub fn new() -> Self {
        Self::with_flag(Arc::new(AtomicBool::new(false)))
    }

    /// Creates a signal backed by an existing flag.
    pub fn with_flag(flag: Arc<AtomicBool>) -> Self {
        Self {
            inner: Arc::new(Inner {
                raised: flag,
                lock: Mutex::new(()),
                cv: Condvar::new(),
            }),
        }
    }

    /// Returns the underlying flag.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.inner.raised.clone()
    }

    /// Raises the signal and wakes every waiter.
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::Release);

        let _guard = self
            .inner
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.cv.notify_all();
    }

    /// Checks whether the signal has been raised.
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// Blocks until the signal is raised or `timeout` elapses.
    ///
    /// Returns `true` if the signal was raised. A timeout too large to
    /// represent as a deadline waits indefinitely.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self
            .inner
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if self.is_raised() {
                return true;
            }

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }

                    (deadline - now).min(Self::WAIT_SLICE)
                }
                None => Self::WAIT_SLICE,
            };

            guard = self
                .inner
                .cv
                .wait_timeout(guard, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("raised", &self.is_raised())
            .finish()
    }
}

/// Cooperative cancellation shared between the controller and the actors.
///
/// Actors check [`is_cancelled`](Self::is_cancelled) at every loop head and
/// use [`sleep`](Self::sleep) for every delay, so cancellation is observed
/// within a bounded number of polling intervals.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    signal: Signal,
}

impl CancellationToken {
    /// Creates a new token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token backed by an existing flag.
    ///
    /// Setting the flag from outside (e.g., from a signal handler) cancels
    /// the token.
    pub fn with_flag(flag: Arc<AtomicBool>) -> Self {
        Self {
            signal: Signal::with_flag(flag),
        }
    }

    /// Returns the underlying flag.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.signal.flag()
    }

    /// Requests cancellation and interrupts pending sleeps.
    pub fn cancel(&self) {
        self.signal.raise();
    }

    /// Checks whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_raised()
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if the sleep was
    /// cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        !self.signal.wait_timeout(duration)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn signal_stays_raised() {
        let signal = Signal::new();
        assert!(!signal.is_raised());
        assert!(!signal.wait_timeout(Duration::from_millis(1)));

        signal.raise();
        assert!(signal.is_raised());
        assert!(signal.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn raise_wakes_waiter() {
        let signal = Signal::new();
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_timeout(Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(20));
        signal.raise();

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn unbounded_wait_ends_on_raise() {
        let signal = Signal::new();
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_timeout(Duration::MAX))
        };

        thread::sleep(Duration::from_millis(20));
        signal.raise();

        assert!(waiter.join().unwrap());
        assert!(signal.wait_timeout(Duration::MAX));
    }

    #[test]
    fn cancellation_cuts_sleep_short() {
        let token = CancellationToken::new();
        let sleeper = {
            let token = token.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let completed = token.sleep(Duration::from_secs(10));
                (completed, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        let (completed, elapsed) = sleeper.join().unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn external_flag_is_observed() {
        let flag = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::with_flag(flag.clone());

        assert!(token.sleep(Duration::from_millis(1)));

        // No notification, as from a signal handler.
        flag.store(true, Ordering::SeqCst);
        assert!(token.is_cancelled());
        assert!(!token.sleep(Duration::from_secs(10)));
    }
}
