//! Scan scheduler: the Stopped/Scanning state machine and its background loop
//!
//! The scheduler owns at most one scan thread. Cancellation goes through
//! the thread's [`CancelToken`], so a stop takes effect at the next wait
//! boundary rather than after a full interval.

use std::sync::Weak;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::ScanMode;
use crate::worker::{CancelToken, Worker};

/// Something the scan loop can drive
pub(crate) trait Scanner: Send + Sync {
    /// Run one reconciliation. Returning `false` ends the loop.
    fn scan_once(&self) -> bool;
}

struct SchedulerState {
    mode: ScanMode,
    scanning: bool,
    worker: Option<Worker>,
    /// Loop thread being joined by an after-write restart
    restarting: Option<ThreadId>,
}

pub(crate) struct ScanScheduler {
    state: Mutex<SchedulerState>,
    restarted: Condvar,
    target: Weak<dyn Scanner>,
}

impl ScanScheduler {
    pub(crate) fn new(mode: ScanMode, target: Weak<dyn Scanner>) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                mode,
                scanning: false,
                worker: None,
                restarting: None,
            }),
            restarted: Condvar::new(),
            target,
        }
    }

    pub(crate) fn mode(&self) -> ScanMode {
        self.state.lock().mode
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    /// Replace the scan interval for the next start. Ignored while scanning.
    pub(crate) fn set_interval(&self, interval: Duration) {
        let mut state = self.state.lock();
        if !state.scanning {
            state.mode = state.mode.with_interval(interval);
        }
    }

    /// Move to `Scanning`. Returns `false` if already scanning.
    pub(crate) fn mark_started(&self) -> bool {
        let mut state = self.state.lock();
        if state.scanning {
            return false;
        }
        state.scanning = true;
        true
    }

    /// Spawn the background loop unless the mode is `NoScan`
    pub(crate) fn spawn_loop(&self) {
        let mut state = self.state.lock();
        self.spawn_locked(&mut state);
    }

    /// Move to `Stopped` and wait for the loop to exit
    ///
    /// A loop being replaced by [`after_write`](Self::after_write) counts
    /// too: this waits for that join unless called from the loop itself.
    pub(crate) fn stop(&self) {
        let worker = {
            let mut state = self.state.lock();
            state.scanning = false;
            let current = thread::current().id();
            while state.restarting.is_some_and(|id| id != current) {
                self.restarted.wait(&mut state);
            }
            state.worker.take()
        };
        if let Some(worker) = worker {
            worker.stop();
            info!("Scanning stopped");
        }
    }

    /// Restart the schedule from the initial pause after a completed write
    pub(crate) fn after_write(&self) {
        let worker = {
            let mut state = self.state.lock();
            if !state.scanning || !state.mode.pauses_after_write() || state.restarting.is_some()
            {
                return;
            }
            let worker = state.worker.take();
            state.restarting = worker.as_ref().map(Worker::thread_id);
            worker
        };
        if let Some(worker) = worker {
            worker.stop();
        }

        let mut state = self.state.lock();
        state.restarting = None;
        if state.scanning {
            debug!("Write completed, scan paused");
            self.spawn_locked(&mut state);
        }
        drop(state);
        self.restarted.notify_all();
    }

    fn spawn_locked(&self, state: &mut SchedulerState) {
        if !state.scanning || state.mode == ScanMode::NoScan {
            return;
        }
        if state.worker.as_ref().is_some_and(Worker::is_running) {
            return;
        }

        let target = self.target.clone();
        let mode = state.mode;
        match Worker::spawn("hidwatch-scanner", move |token| {
            run_scan_loop(target, mode, token)
        }) {
            Ok(worker) => state.worker = Some(worker),
            Err(e) => warn!("Failed to spawn scan thread: {}", e),
        }
    }
}

/// Wait, scan, repeat until cancelled or a scan fails
fn run_scan_loop(target: Weak<dyn Scanner>, mode: ScanMode, token: CancelToken) {
    let (mut wait, interval) = match mode {
        ScanMode::NoScan => return,
        ScanMode::FixedInterval(interval) => (interval, interval),
        ScanMode::FixedIntervalWithPauseAfterWrite { interval, pause } => (pause, interval),
    };
    debug!("Scan loop started ({:?})", mode);

    while !token.wait(wait) {
        let Some(target) = target.upgrade() else {
            break;
        };
        if !target.scan_once() {
            break;
        }
        wait = interval;
    }

    debug!("Scan loop exiting");
}
