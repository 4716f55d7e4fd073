use std::{
    thread::{self, JoinHandle},
    time::Duration,
};

use postcopy_core::{ActorKind, MigrationError, Signal};

/// Raises the exit signal when the actor's thread unwinds or returns.
struct ExitGuard(Signal);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.raise();
    }
}

/// How a bounded join ended.
pub(crate) enum JoinOutcome<T> {
    /// The actor exited and returned a value.
    Joined(T),

    /// The actor exited by panicking.
    Panicked,

    /// The actor is still running; its thread is left detached.
    TimedOut,
}

/// A running actor thread.
pub(crate) struct ActorHandle<T> {
    kind: ActorKind,
    exited: Signal,
    handle: JoinHandle<T>,
}

impl<T> ActorHandle<T>
where
    T: Send + 'static,
{
    /// Spawns `body` on a thread named after `kind`.
    pub fn spawn(
        kind: ActorKind,
        body: impl FnOnce() -> T + Send + 'static,
    ) -> Result<Self, MigrationError> {
        let exited = Signal::new();
        let guard = ExitGuard(exited.clone());

        let handle = thread::Builder::new()
            .name(kind.thread_name().into())
            .spawn(move || {
                let _guard = guard;
                body()
            })
            .map_err(|err| MigrationError::spawn(kind, err))?;

        tracing::trace!(%kind, "actor spawned");
        Ok(Self {
            kind,
            exited,
            handle,
        })
    }

    pub fn kind(&self) -> ActorKind {
        self.kind
    }

    /// Signal raised once the actor's thread is done.
    pub fn exited(&self) -> &Signal {
        &self.exited
    }

    /// Waits at most `timeout` for the actor to exit.
    pub fn join_timeout(self, timeout: Duration) -> JoinOutcome<T> {
        if !self.exited.wait_timeout(timeout) {
            return JoinOutcome::TimedOut;
        }

        // The guard drops right before the thread finishes, so this join
        // returns promptly.
        match self.handle.join() {
            Ok(value) => JoinOutcome::Joined(value),
            Err(_) => JoinOutcome::Panicked,
        }
    }
}
