//! Cancellable deferred tasks
//!
//! [`Scheduler::schedule`] returns a [`Ticket`]. A task runs at most once, and
//! never after [`Ticket::cancel`] has returned `true`: the ticket state is
//! checked and flipped under a lock both by the timer and by `cancel`.

use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Pending,
    Fired,
    Cancelled,
}

/// Handle to a scheduled task
#[derive(Clone)]
pub struct Ticket {
    id: u64,
    state: Arc<Mutex<TicketState>>,
    abort: AbortHandle,
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Ticket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TicketState {
        *self.state.lock()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == TicketState::Pending
    }

    /// Cancel before the task fires. Returns false if it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if *state != TicketState::Pending {
            return false;
        }
        *state = TicketState::Cancelled;
        self.abort.abort();
        debug!("Ticket {} cancelled", self.id);
        true
    }
}

/// Spawns deferred tasks on a tokio runtime
#[derive(Clone)]
pub struct Scheduler {
    runtime: Handle,
    next_id: Arc<AtomicU64>,
}

impl Scheduler {
    /// Scheduler on the current tokio runtime. Panics outside a runtime, like `tokio::spawn`.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Run `task` after `delay` unless the returned ticket is cancelled first
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Ticket
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(Mutex::new(TicketState::Pending));
        let timer_state = state.clone();

        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = timer_state.lock();
                if *state != TicketState::Pending {
                    return;
                }
                *state = TicketState::Fired;
            }
            debug!("Ticket {} fired after {:?}", id, delay);
            task();
        });

        Ticket {
            id,
            state,
            abort: handle.abort_handle(),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn fires_once_after_delay() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let ticket = scheduler.schedule(Duration::from_millis(20), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(ticket.is_pending());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(ticket.state(), TicketState::Fired);
        assert!(!ticket.cancel());
    }

    #[tokio::test]
    async fn cancelled_ticket_never_fires() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let ticket = scheduler.schedule(Duration::from_millis(30), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(ticket.cancel());
        assert!(!ticket.cancel());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(ticket.state(), TicketState::Cancelled);
    }
}
