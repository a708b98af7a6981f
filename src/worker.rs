//! Cancellable background threads

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

#[derive(Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Cancellation signal shared between a worker and its owner
///
/// Workers sleep through [`CancelToken::wait`], which returns early the
/// moment the token is cancelled.
#[derive(Clone, Default)]
pub(crate) struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn cancel(&self) {
        *self.state.cancelled.lock() = true;
        self.state.wake.notify_all();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.state.cancelled.lock()
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the token was cancelled.
    pub(crate) fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.state.cancelled.lock();
        while !*cancelled {
            if self
                .state
                .wake
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }
}

/// A named thread paired with its cancellation token
pub(crate) struct Worker {
    token: CancelToken,
    handle: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let token = CancelToken::new();
        let thread_token = token.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_token))?;
        Ok(Self { token, handle })
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    /// Cancel the worker and wait for it to exit.
    ///
    /// Called from the worker's own thread this only cancels.
    pub(crate) fn stop(self) {
        self.token.cancel();
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        let name = self.handle.thread().name().unwrap_or("worker").to_string();
        if self.handle.join().is_err() {
            warn!("{} thread panicked", name);
        } else {
            debug!("{} thread joined", name);
        }
    }
}
