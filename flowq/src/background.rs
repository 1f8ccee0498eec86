//! Self-driving `schedule`/`sweep` loops a host process can spawn and own on a `Queue` handle,
//! instead of hand-rolling its own timer around the one-shot `Queue::schedule`/`Queue::sweep`
//! methods. Mirrors the teacher crate's own background-task start/stop pair, generalized to
//! both loops and wired to a graceful-shutdown signal rather than running forever.

use std::time::Duration;

use flowq_shutdown::GracefulShutdownConsumer;
use tracing::{event, Level};

use crate::Queue;

impl Queue {
    /// Spawn a task that calls `schedule(lock_seconds)` every `interval`, until `shutdown`
    /// fires. Replaces any previously started schedule loop on this handle.
    pub fn start_schedule_loop(&self, interval: Duration, lock_seconds: i64, mut shutdown: GracefulShutdownConsumer) {
        let queue = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = queue.schedule(lock_seconds).await {
                            event!(Level::WARN, queue = %queue.name(), error = %e, "schedule loop iteration failed");
                        }
                    }
                    _ = shutdown.wait_for_shutdown() => break,
                }
            }
        });

        let mut tasks = self.0.background.lock().expect("background tasks lock poisoned");
        if let Some(old) = tasks.schedule.replace(handle) {
            old.abort();
        }
    }

    pub fn stop_schedule_loop(&self) {
        let mut tasks = self.0.background.lock().expect("background tasks lock poisoned");
        if let Some(handle) = tasks.schedule.take() {
            handle.abort();
        }
    }

    /// Spawn a task that calls `sweep(lock_seconds)` every `interval`, until `shutdown` fires.
    /// Replaces any previously started sweep loop on this handle.
    pub fn start_sweep_loop(&self, interval: Duration, lock_seconds: i64, mut shutdown: GracefulShutdownConsumer) {
        let queue = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = queue.sweep(lock_seconds).await {
                            event!(Level::WARN, queue = %queue.name(), error = %e, "sweep loop iteration failed");
                        }
                    }
                    _ = shutdown.wait_for_shutdown() => break,
                }
            }
        });

        let mut tasks = self.0.background.lock().expect("background tasks lock poisoned");
        if let Some(old) = tasks.sweep.replace(handle) {
            old.abort();
        }
    }

    pub fn stop_sweep_loop(&self) {
        let mut tasks = self.0.background.lock().expect("background tasks lock poisoned");
        if let Some(handle) = tasks.sweep.take() {
            handle.abort();
        }
    }
}
