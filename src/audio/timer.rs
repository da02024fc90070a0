//! Owned, cancellable timer tasks.
//!
//! A [`TimerHandle`] owns one spawned tokio task. Replacing or dropping the
//! handle aborts the task, so a code path that starts a new timer cannot
//! leave the old one running.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};

/// Handle to a spawned timer task.
#[derive(Debug, Default)]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Handle with no task attached.
    pub fn idle() -> Self {
        Self { task: None }
    }

    /// Spawn `future` on the current runtime and own it.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(future)),
        }
    }

    /// Cancel the current task (if any) and take ownership of `next`.
    pub fn replace(&mut self, next: TimerHandle) {
        self.cancel();
        *self = next;
    }

    /// Abort the task. Cancelling an idle handle is a no-op.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Forget the task without aborting it.
    ///
    /// A timer task that tears down its own owner calls this first; aborting
    /// itself would cancel the teardown at its next await.
    pub fn detach(&mut self) {
        self.task.take();
    }

    /// Whether a task is attached and still running.
    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Repeating ticker whose first tick is one `period` from now.
pub fn ticker(period: Duration, missed: MissedTickBehavior) -> Interval {
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(missed);
    interval
}
