use crate::store::SessionStore;
use async_trait::async_trait;
use baitline_core::Clock;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The durable store granted the claim.
    Granted,
    /// Someone else holds the claim; do not send.
    Denied,
    /// The store was unreachable; only the process-local flag guards this send.
    Degraded,
    /// This process already delivered while the store was down, and the
    /// claim has now been recorded in the store. Finish without sending.
    Recovered,
}

impl ClaimOutcome {
    /// Whether the caller may proceed with delivery.
    pub fn is_granted(self) -> bool {
        matches!(self, ClaimOutcome::Granted | ClaimOutcome::Degraded)
    }
}

/// At-most-one-holder guard per session id.
#[async_trait]
pub trait ClaimOnce: Send + Sync {
    async fn claim(&self, session_id: &str) -> ClaimOutcome;

    /// Report a successful delivery made under `outcome`.
    async fn settle(&self, _session_id: &str, _outcome: ClaimOutcome) {}

    /// Give the claim back after a failed delivery. Best-effort.
    async fn release(&self, session_id: &str);
}

// ---------------------------------------------------------------------------
// LocalClaims
// ---------------------------------------------------------------------------

/// Process-local claim markers, for deployments with a single process and
/// no shared store.
#[derive(Default)]
pub struct LocalClaims {
    held: Mutex<HashSet<String>>,
}

impl LocalClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the marker; `false` if it was already set.
    pub fn try_mark(&self, session_id: &str) -> bool {
        self.held.lock().insert(session_id.to_string())
    }

    pub fn unmark(&self, session_id: &str) {
        self.held.lock().remove(session_id);
    }

    pub fn is_marked(&self, session_id: &str) -> bool {
        self.held.lock().contains(session_id)
    }
}

#[async_trait]
impl ClaimOnce for LocalClaims {
    async fn claim(&self, session_id: &str) -> ClaimOutcome {
        if self.try_mark(session_id) {
            ClaimOutcome::Granted
        } else {
            ClaimOutcome::Denied
        }
    }

    async fn release(&self, session_id: &str) {
        self.unmark(session_id);
    }
}

// ---------------------------------------------------------------------------
// StoreClaims
// ---------------------------------------------------------------------------

/// Why [`StoreClaims`] holds a marker for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    /// A delivery attempt is running.
    InFlight,
    /// Delivered while the store was down; the store does not know yet.
    Unrecorded,
}

/// Two-level claim: an optimistic in-process marker, then the store's atomic
/// `try_claim`.
///
/// While the store is reachable its answer is final and markers only live
/// for the duration of a delivery. When it is not, the local marker alone
/// decides and the claim is reported as [`ClaimOutcome::Degraded`]. A
/// degraded delivery keeps its marker until a later claim finds the store
/// reachable again and records the claim there
/// ([`ClaimOutcome::Recovered`]).
pub struct StoreClaims {
    store: Arc<dyn SessionStore>,
    markers: Mutex<HashMap<String, Marker>>,
    clock: Arc<dyn Clock>,
}

impl StoreClaims {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            markers: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Sessions with a marker held, in flight or awaiting recording.
    pub fn held(&self) -> usize {
        self.markers.lock().len()
    }

    /// Degraded deliveries the store has not recorded yet.
    pub fn unrecorded(&self) -> usize {
        self.markers
            .lock()
            .values()
            .filter(|m| **m == Marker::Unrecorded)
            .count()
    }

    fn set(&self, session_id: &str, marker: Marker) {
        self.markers.lock().insert(session_id.to_string(), marker);
    }

    fn clear(&self, session_id: &str) {
        self.markers.lock().remove(session_id);
    }

    async fn record_unrecorded(&self, session_id: &str) -> ClaimOutcome {
        match self.store.try_claim(session_id, self.clock.now()).await {
            Ok(true) => {
                self.clear(session_id);
                info!(
                    session_id = %session_id,
                    "Recorded claim for a delivery made while the store was unreachable"
                );
                ClaimOutcome::Recovered
            }
            Ok(false) => {
                self.clear(session_id);
                ClaimOutcome::Denied
            }
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Degraded delivery still unrecorded");
                ClaimOutcome::Denied
            }
        }
    }
}

#[async_trait]
impl ClaimOnce for StoreClaims {
    async fn claim(&self, session_id: &str) -> ClaimOutcome {
        let previous = {
            let mut markers = self.markers.lock();
            match markers.get(session_id) {
                Some(marker) => Some(*marker),
                None => {
                    markers.insert(session_id.to_string(), Marker::InFlight);
                    None
                }
            }
        };
        match previous {
            Some(Marker::Unrecorded) => return self.record_unrecorded(session_id).await,
            Some(Marker::InFlight) => return ClaimOutcome::Denied,
            None => {}
        }

        match self.store.try_claim(session_id, self.clock.now()).await {
            Ok(true) => ClaimOutcome::Granted,
            Ok(false) => {
                self.clear(session_id);
                ClaimOutcome::Denied
            }
            Err(e) if e.is_unavailable() => {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    "Store unreachable, claim guarded by local flag only (degraded)"
                );
                ClaimOutcome::Degraded
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Claim failed");
                self.clear(session_id);
                ClaimOutcome::Denied
            }
        }
    }

    async fn settle(&self, session_id: &str, outcome: ClaimOutcome) {
        if outcome == ClaimOutcome::Degraded {
            self.set(session_id, Marker::Unrecorded);
        } else {
            self.clear(session_id);
        }
    }

    async fn release(&self, session_id: &str) {
        self.clear(session_id);
        if let Err(e) = self.store.release_claim(session_id).await {
            warn!(session_id = %session_id, error = %e, "Failed to release claim");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
