use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Quiet period applied to "load more" triggers.
pub const LOAD_MORE_DEBOUNCE: Duration = Duration::from_millis(500);

struct Slot<A> {
    latest: Option<A>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

struct Shared<A> {
    quiet: Duration,
    slot: Mutex<Slot<A>>,
    action: Box<dyn Fn(A) + Send + Sync>,
}

impl<A> Shared<A> {
    fn lock(&self) -> MutexGuard<'_, Slot<A>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Collapses bursts of triggers into one call of `action` with the latest arguments, fired
/// once `quiet` has passed without a new trigger.
///
/// Timers run on the ambient tokio runtime.
pub struct Debouncer<A: Send + 'static> {
    shared: Arc<Shared<A>>,
}

impl<A: Send + 'static> Debouncer<A> {
    pub fn new(quiet: Duration, action: impl Fn(A) + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                quiet,
                slot: Mutex::new(Slot {
                    latest: None,
                    timer: None,
                    generation: 0,
                }),
                action: Box::new(action),
            }),
        }
    }

    /// Stores `args` as the latest trigger and restarts the quiet period.
    pub fn schedule(&self, args: A) {
        let mut slot = self.shared.lock();
        slot.latest = Some(args);
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }

        let generation = slot.generation;
        let shared = Arc::clone(&self.shared);
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(shared.quiet).await;
            let args = {
                let mut slot = shared.lock();
                if slot.generation != generation {
                    return;
                }
                slot.timer = None;
                slot.latest.take()
            };
            if let Some(args) = args {
                (shared.action)(args);
            }
        }));
    }

    /// Drops the pending trigger, if any. Returns whether one was pending.
    pub fn cancel_pending(&self) -> bool {
        let mut slot = self.shared.lock();
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.latest.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.shared.lock().latest.is_some()
    }
}

impl<A: Send + 'static> Drop for Debouncer<A> {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
