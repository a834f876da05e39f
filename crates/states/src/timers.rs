//! Timer management for state handlers.
//!
//! Each handler owns one [`TimerManager`]; every timer is a tokio task that
//! sleeps and then runs its callback, either once or on a fixed interval.
//! Re-setting an id cancels the previous task, and dropping the manager
//! cancels everything, so a deactivated handler cannot leave timers behind.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Identifies one timer slot within a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Round timeout while waiting for the proposer.
    WaitingProposal,
    /// Re-broadcast of the current INIT ballot.
    BroadcastingInitBallot,
    /// Re-broadcast of the current Proposal.
    BroadcastingProposal,
    /// Delay before the ACCEPT ballot goes out.
    WaitingAcceptBallot,
    /// Re-broadcast of the current ACCEPT ballot.
    BroadcastingAcceptBallot,
    /// Periodic progress check while syncing.
    SyncingProgress,
}

/// Manages the timer tasks of one handler.
pub struct TimerManager {
    timers: Mutex<HashMap<TimerId, JoinHandle<()>>>,
}

impl TimerManager {
    pub fn new() -> Self {
        TimerManager {
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` once after `after`.
    ///
    /// An existing timer with the same id is cancelled first.
    pub fn set_timeout<F, Fut>(&self, id: TimerId, after: Duration, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.cancel(id);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            trace!(?id, "timer fired");
            f().await;
        });

        self.timers.lock().insert(id, handle);
        debug!(?id, ?after, "timeout set");
    }

    /// Run `f` every `every`, first run after one interval.
    ///
    /// An existing timer with the same id is cancelled first.
    pub fn set_interval<F, Fut>(&self, id: TimerId, every: Duration, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.cancel(id);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The immediate first tick of tokio intervals is skipped; the
            // caller has already acted once when it sets the timer.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                trace!(?id, "interval fired");
                f().await;
            }
        });

        self.timers.lock().insert(id, handle);
        debug!(?id, ?every, "interval set");
    }

    /// Cancel a timer; a missing or already-fired id is a no-op.
    pub fn cancel(&self, id: TimerId) {
        if let Some(handle) = self.timers.lock().remove(&id) {
            handle.abort();
            trace!(?id, "timer cancelled");
        }
    }

    /// Cancel every timer; called on deactivation.
    pub fn cancel_all(&self) {
        for (id, handle) in self.timers.lock().drain() {
            handle.abort();
            trace!(?id, "timer cancelled (all)");
        }
    }

    pub fn active_count(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
