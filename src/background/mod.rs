//! Background work attached to a lifecycle or fetch event.
//!
//! An [`ExtendableEvent`] is the explicit registry behind "keep this event
//! alive until my async work finishes". Handlers call
//! [`wait_until`](ExtendableEvent::wait_until) for anything that must outlive
//! their own return (a cache refresh, a fire-and-forget write), and whoever
//! owns the event calls [`settle`](ExtendableEvent::settle) to wait for all of
//! it.
//!
//! Registered work is spawned immediately on the Tokio runtime; settling only
//! waits, it never starts anything.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinSet;
use tracing::{debug, warn};

/// The kind of event a registry belongs to. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Sync,
    Push,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Fetch => "fetch",
            Self::Sync => "sync",
            Self::Push => "push",
        })
    }
}

/// Outcome of [`ExtendableEvent::settle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settled {
    /// Tasks that ran to completion.
    pub completed: usize,
    /// Tasks that panicked.
    pub panicked: usize,
}

/// A registry of background tasks whose lifetime extends an event's.
///
/// Must be created inside a Tokio runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use swcache::background::{EventKind, ExtendableEvent};
///
/// #[tokio::main]
/// async fn main() {
///     let event = ExtendableEvent::new(EventKind::Fetch);
///     event.wait_until(async { /* write to the cache */ });
///     let settled = event.settle().await;
///     assert_eq!(settled.completed, 1);
/// }
/// ```
pub struct ExtendableEvent {
    kind: EventKind,
    tasks: Mutex<JoinSet<()>>,
}

impl ExtendableEvent {
    /// Creates an event with no registered work.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Spawns `work` and ties it to this event's lifetime.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.lock().spawn(work);
    }

    /// Returns the number of registered tasks that have not been reaped yet.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Waits for every registered task to finish.
    ///
    /// A panicking task is logged and counted; it never stops the others from
    /// being awaited.
    pub async fn settle(self) -> Settled {
        let mut tasks = std::mem::take(&mut *self.lock());
        let mut settled = Settled::default();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(()) => settled.completed += 1,
                Err(e) => {
                    warn!(event = %self.kind, error = %e, "background task failed");
                    settled.panicked += 1;
                }
            }
        }

        debug!(
            event = %self.kind,
            completed = settled.completed,
            panicked = settled.panicked,
            "event settled"
        );
        settled
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        // A poisoned registry still holds valid task handles.
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ExtendableEvent {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !tasks.is_empty() {
            debug!(
                event = %self.kind,
                pending = tasks.len(),
                "event dropped unsettled; detaching background tasks"
            );
            tasks.detach_all();
        }
    }
}

impl fmt::Debug for ExtendableEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendableEvent")
            .field("kind", &self.kind)
            .field("pending", &self.pending())
            .finish()
    }
}
