//! Run lifecycle of a client process.
//!
//! A batch takes one [`CallGuard`] per call and then seals the controller.
//! The drop of the last guard after sealing is the aggregated completion: it
//! moves the run to `Draining` and flips the shutdown signal. The signal
//! value is stored, so a receiver subscribed afterwards still observes it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::debug;

/// State machine: Starting -> Running -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Topology and transport are being set up.
    Starting,
    /// Calls are being issued.
    Running,
    /// Every call has settled, or the run was interrupted.
    Draining,
    /// Transport and connection are closed.
    Stopped,
}

#[derive(Debug)]
struct Lifecycle {
    signal: watch::Sender<bool>,
    unsettled: AtomicU64,
    sealed: AtomicBool,
    state: ArcSwap<RunState>,
}

impl Lifecycle {
    fn fire(&self) {
        self.state.store(Arc::new(RunState::Draining));
        if !self.signal.send_replace(true) {
            debug!("shutdown signal raised");
        }
    }
}

#[derive(Debug)]
pub struct ShutdownController {
    lifecycle: Arc<Lifecycle>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            lifecycle: Arc::new(Lifecycle {
                signal,
                unsettled: AtomicU64::new(0),
                sealed: AtomicBool::new(false),
                state: ArcSwap::from_pointee(RunState::Starting),
            }),
        }
    }

    pub fn set_running(&self) {
        self.lifecycle.state.store(Arc::new(RunState::Running));
    }

    /// Tracks one call until it settles.
    #[must_use]
    pub fn call_guard(&self) -> CallGuard {
        self.lifecycle.unsettled.fetch_add(1, Ordering::SeqCst);
        CallGuard {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    /// Marks the set of calls as complete. Shutdown fires as soon as no
    /// guard is left, immediately if none is outstanding.
    pub fn seal(&self) {
        self.lifecycle.sealed.store(true, Ordering::SeqCst);
        if self.lifecycle.unsettled.load(Ordering::SeqCst) == 0 {
            self.lifecycle.fire();
        }
    }

    /// Fires shutdown regardless of unsettled calls.
    pub fn trigger_shutdown(&self) {
        self.lifecycle.fire();
    }

    /// Receiver holding `true` once shutdown has fired.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.lifecycle.signal.subscribe()
    }

    /// Resolves once shutdown has fired, including when it already has.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_receiver();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    #[must_use]
    pub fn is_shutdown_triggered(&self) -> bool {
        *self.lifecycle.signal.borrow()
    }

    /// Records that every resource of the run has been released.
    pub fn mark_stopped(&self) {
        self.lifecycle.state.store(Arc::new(RunState::Stopped));
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        **self.lifecycle.state.load()
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.lifecycle.unsettled.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Settles one call on drop; the last one after [`ShutdownController::seal`]
/// fires shutdown.
#[derive(Debug)]
pub struct CallGuard {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let previous = self.lifecycle.unsettled.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.lifecycle.sealed.load(Ordering::SeqCst) {
            self.lifecycle.fire();
        }
    }
}
