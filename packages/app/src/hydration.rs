//! Counting hydration gates.
//!
//! Any number of independent subsystems may hold hydration open. Each one
//! gets a [`HydrationRelease`]; hydration completes when the last release is
//! called or dropped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Default)]
struct GateState {
    hydrating: bool,
    next_id: u64,
    open: HashSet<u64>,
}

/// Tracks outstanding hydration gates for one app.
pub struct HydrationGate {
    state: Mutex<GateState>,
    done: watch::Sender<bool>,
}

impl Default for HydrationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl HydrationGate {
    /// A gate that is not hydrating; [`HydrationGate::finished`] resolves
    /// immediately until [`HydrationGate::begin`] is called.
    pub fn new() -> Self {
        let (done, _) = watch::channel(true);
        Self {
            state: Mutex::default(),
            done,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_hydrating(&self) -> bool {
        self.lock().hydrating
    }

    /// Enter the hydrating state.
    pub fn begin(&self) {
        self.lock().hydrating = true;
        self.done.send_replace(false);
    }

    /// Open a gate. Outside of hydration the release does nothing.
    pub fn defer(gate: &Arc<HydrationGate>) -> HydrationRelease {
        let mut state = gate.lock();
        if !state.hydrating {
            return HydrationRelease {
                gate: Weak::new(),
                id: 0,
            };
        }
        state.next_id += 1;
        let id = state.next_id;
        state.open.insert(id);
        debug!(gate = id, outstanding = state.open.len(), "hydration deferred");
        HydrationRelease {
            gate: Arc::downgrade(gate),
            id,
        }
    }

    /// Number of gates still open.
    pub fn outstanding(&self) -> usize {
        self.lock().open.len()
    }

    fn release(&self, id: u64) {
        let finished = {
            let mut state = self.lock();
            if !state.open.remove(&id) {
                return;
            }
            let finished = state.hydrating && state.open.is_empty();
            if finished {
                state.hydrating = false;
            }
            finished
        };
        if finished {
            debug!("hydration complete");
            self.done.send_replace(true);
        }
    }

    /// Close every outstanding gate at once.
    pub fn force_release(&self) {
        let forced = {
            let mut state = self.lock();
            let forced = state.open.len();
            state.open.clear();
            state.hydrating = false;
            forced
        };
        if forced > 0 {
            warn!(gates = forced, "hydration gates force-released");
        }
        self.done.send_replace(true);
    }

    /// Resolves once hydration has completed.
    pub async fn finished(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Holds one hydration gate open until released or dropped.
#[must_use = "dropping the release closes the gate immediately"]
pub struct HydrationRelease {
    gate: Weak<HydrationGate>,
    id: u64,
}

impl HydrationRelease {
    /// Close the gate. Calling it again (or dropping afterwards) is a no-op.
    pub fn release(&mut self) {
        if let Some(gate) = self.gate.upgrade() {
            gate.release(self.id);
        }
        self.gate = Weak::new();
    }
}

impl Drop for HydrationRelease {
    fn drop(&mut self) {
        self.release();
    }
}
