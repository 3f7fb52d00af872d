//! Owned timers: every delayed or repeating task the client starts lives here
//! so a reset can abort all of them at once.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Default)]
pub struct Scheduler {
    next_id: AtomicU64,
    tasks: Mutex<Vec<(TimerId, JoinHandle<()>)>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self, handle: JoinHandle<()>) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.retain(|(_, h)| !h.is_finished());
        tasks.push((id, handle));
        id
    }

    /// Run `task` once after `delay`
    pub fn after<F>(&self, delay: Duration, task: F) -> TimerId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        self.track(handle)
    }

    /// Call `tick` every `period` until it returns `false` or the timer is cancelled
    pub fn every<F, Fut>(&self, period: Duration, mut tick: F) -> TimerId
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick of a tokio interval completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if !tick().await {
                    break;
                }
            }
        });
        self.track(handle)
    }

    pub fn cancel(&self, id: TimerId) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match tasks.iter().position(|(tid, _)| *tid == id) {
            Some(index) => {
                let (_, handle) = tasks.swap_remove(index);
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every pending timer; returns how many were still running
    pub fn cancel_all(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut aborted = 0;
        for (_, handle) in tasks.drain(..) {
            if !handle.is_finished() {
                aborted += 1;
            }
            handle.abort();
        }
        if aborted > 0 {
            tracing::debug!(aborted, "timers cancelled");
        }
        aborted
    }

    /// Timers that have not finished yet
    pub fn pending(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.iter().filter(|(_, h)| !h.is_finished()).count()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
