use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::TaskControlError;

use super::core::Shared;
use super::dispatch::CycleOutcome;
use super::TaskController;

impl Shared {
    /// Block until a submission arrives or shutdown is requested.
    fn wait_for_submission(&self) {
        let guard = self.wake_pending.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pending = self
            .wake
            .wait_while(guard, |pending| {
                !*pending && !self.shutdown.load(Ordering::Acquire)
            })
            .unwrap_or_else(PoisonError::into_inner);
        *pending = false;
    }

    /// Sleep for one tick, returning early only on shutdown.
    fn wait_tick(&self, tick: Duration) {
        let guard = self.wake_pending.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .wake
            .wait_timeout_while(guard, tick, |_| !self.shutdown.load(Ordering::Acquire))
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// The dispatch loop: `Idle <-> Dispatching -> Draining -> Idle`.
    fn run_loop(&self) {
        info!("task controller dispatch loop started");
        while !self.shutdown.load(Ordering::Acquire) {
            match self.dispatch_cycle() {
                CycleOutcome::Idle => self.wait_for_submission(),
                CycleOutcome::Drained(_) => continue,
                CycleOutcome::Dispatched(started) => {
                    if started > 0 {
                        debug!(started, "dispatch cycle started workers");
                    }
                    let tick = self
                        .config
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .tick_interval;
                    self.wait_tick(tick);
                }
            }
        }
        info!("task controller dispatch loop stopped");
    }
}

impl TaskController {
    /// Spawn the dispatch thread.
    pub fn start(&self) -> Result<(), TaskControlError> {
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner);
        if dispatcher.is_some() {
            return Err(TaskControlError::AlreadyStarted);
        }

        self.shared.shutdown.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("specflow-dispatch".to_string())
            .spawn(move || shared.run_loop())
            .map_err(|e| TaskControlError::Spawn("dispatch".to_string(), e))?;
        *dispatcher = Some(handle);

        let config = self.config();
        info!(
            max_concurrent = config.resolved_max_concurrent_tasks(),
            tick_ms = config.tick_interval.as_millis() as u64,
            "task controller started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the dispatch loop and wait for its thread. Running workers are
    /// not interrupted; their tasks finish (or observe cancellation) on
    /// their own. Calling this on a stopped controller is a no-op.
    pub fn shutdown(&self) {
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        info!("task controller shutdown requested");
        {
            // Flip the flag under the wake lock so the loop cannot miss it
            // between checking the predicate and going to sleep.
            let _guard = self.shared.wake_pending.lock().unwrap_or_else(PoisonError::into_inner);
            self.shared.shutdown.store(true, Ordering::Release);
            self.shared.wake.notify_all();
        }

        if handle.join().is_err() {
            error!("task controller dispatch thread panicked");
        }
    }
}

impl Drop for TaskController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
