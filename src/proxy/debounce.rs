//! Reconnect debounce
//!
//! Viewers often drop and re-establish the connection (resolution change,
//! flaky network). A disconnect only counts as the end of a session once the
//! host has no other open connection and does not come back within the
//! tolerance window.

use crate::schedule::{Scheduler, Ticket};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Session lifecycle callbacks, keyed by viewer host
pub trait SessionHooks: Send + Sync {
    /// A viewer connected with no pending disconnect to resume
    fn connection_made(&self, host: &str);

    /// A viewer came back inside the tolerance window
    fn connection_restarted(&self, host: &str) {
        let _ = host;
    }

    /// The tolerance window passed without a reconnect. Fires once per lost session.
    fn connection_lost(&self, host: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStart {
    Fresh,
    Restarted,
}

#[derive(Default)]
struct DebounceState {
    last_disconnect: HashMap<String, Instant>,
    pending: HashMap<String, Ticket>,
    /// Open connections per host; the session only ends when this reaches zero
    live: HashMap<String, usize>,
}

pub struct ReconnectDebounce {
    scheduler: Scheduler,
    tolerance: Duration,
    hooks: Arc<dyn SessionHooks>,
    state: Mutex<DebounceState>,
}

impl ReconnectDebounce {
    pub fn new(scheduler: Scheduler, tolerance: Duration, hooks: Arc<dyn SessionHooks>) -> Self {
        Self {
            scheduler,
            tolerance,
            hooks,
            state: Mutex::new(DebounceState::default()),
        }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// When `host` last disconnected, if ever
    pub fn last_disconnect(&self, host: &str) -> Option<Instant> {
        self.state.lock().last_disconnect.get(host).copied()
    }

    /// Open connections from `host`
    pub fn live_connections(&self, host: &str) -> usize {
        self.state.lock().live.get(host).copied().unwrap_or(0)
    }

    pub fn connected(&self, host: &str) -> ConnectionStart {
        let pending = {
            let mut state = self.state.lock();
            *state.live.entry(host.to_string()).or_insert(0) += 1;
            state.pending.remove(host)
        };
        // cancel() fails if the timer already fired: that session is over
        let restarted = pending.map(|ticket| ticket.cancel()).unwrap_or(false);

        if restarted {
            info!("Viewer {} reconnected within {:?}, continuing session", host, self.tolerance);
            self.hooks.connection_restarted(host);
            ConnectionStart::Restarted
        } else {
            info!("Viewer {} connected", host);
            self.hooks.connection_made(host);
            ConnectionStart::Fresh
        }
    }

    pub fn disconnected(&self, host: &str) {
        let hooks = self.hooks.clone();
        let lost_host = host.to_string();
        let mut state = self.state.lock();
        state.last_disconnect.insert(host.to_string(), Instant::now());

        let remaining = match state.live.get_mut(host) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            _ => {
                state.live.remove(host);
                0
            }
        };
        if remaining > 0 {
            debug!("Viewer {} disconnected, {} connection(s) still open", host, remaining);
            return;
        }

        let ticket = self.scheduler.schedule(self.tolerance, move || {
            info!("Viewer {} did not come back, session lost", lost_host);
            hooks.connection_lost(&lost_host);
        });
        debug!("Viewer {} disconnected, ticket {} pending", host, ticket.id());

        if let Some(previous) = state.pending.insert(host.to_string(), ticket) {
            previous.cancel();
        }
    }
}
