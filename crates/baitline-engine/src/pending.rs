//! Final-result dispatches started from the request path.
//!
//! The turn response is returned before delivery finishes, so every
//! dispatch the manager starts is registered here by session id and
//! drained on shutdown.

use crate::dispatcher::Dispatch;
use baitline_core::Session;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Running dispatches, at most one per session.
#[derive(Clone, Default)]
pub struct PendingDispatches {
    running: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl PendingDispatches {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `session` in the background.
    ///
    /// Returns `false` without spawning when a dispatch for the same session
    /// is still running in this process.
    pub fn start(&self, dispatcher: Arc<dyn Dispatch>, session: Session) -> bool {
        let mut running = self.running.lock();
        running.retain(|_, handle| !handle.is_finished());
        if running.contains_key(&session.session_id) {
            debug!(session_id = %session.session_id, "Dispatch already running");
            return false;
        }

        let session_id = session.session_id.clone();
        let handle = tokio::spawn(async move {
            if !dispatcher.dispatch(&session).await {
                debug!(
                    session_id = %session.session_id,
                    "Delivery failed, left to the inactivity sweep"
                );
            }
        });
        running.insert(session_id, handle);
        true
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.running
            .lock()
            .get(session_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn len(&self) -> usize {
        let mut running = self.running.lock();
        running.retain(|_, handle| !handle.is_finished());
        running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every registered dispatch to finish.
    pub async fn drain(&self) {
        let running: HashMap<_, _> = std::mem::take(&mut *self.running.lock());
        if running.is_empty() {
            return;
        }

        info!(count = running.len(), "Waiting for in-flight final-result dispatches");
        for (session_id, handle) in running {
            if let Err(e) = handle.await {
                warn!(session_id = %session_id, error = %e, "Dispatch task panicked");
            }
        }
        info!("In-flight dispatches finished");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Holds every dispatch until released, counting calls.
    struct Gated {
        calls: AtomicUsize,
        gate: Semaphore,
    }

    #[async_trait]
    impl Dispatch for Gated {
        async fn dispatch(&self, _session: &Session) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _pass = self.gate.acquire().await.unwrap();
            true
        }
    }

    fn gated() -> Arc<Gated> {
        Arc::new(Gated {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        })
    }

    fn session(id: &str) -> Session {
        Session::new(id, chrono::Utc::now())
    }

    #[tokio::test]
    async fn one_dispatch_per_session_at_a_time() {
        let dispatcher = gated();
        let pending = PendingDispatches::new();

        assert!(pending.start(dispatcher.clone(), session("s1")));
        assert!(!pending.start(dispatcher.clone(), session("s1")));
        assert!(pending.start(dispatcher.clone(), session("s2")));
        assert_eq!(pending.len(), 2);
        assert!(pending.is_running("s1"));

        dispatcher.gate.add_permits(2);
        pending.drain().await;

        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
        assert!(pending.is_empty());
        assert!(!pending.is_running("s1"));
    }

    #[tokio::test]
    async fn finished_dispatch_can_be_started_again() {
        let dispatcher = gated();
        let pending = PendingDispatches::new();

        assert!(pending.start(dispatcher.clone(), session("s1")));
        dispatcher.gate.add_permits(1);
        pending.drain().await;

        assert!(pending.start(dispatcher.clone(), session("s1")));
        dispatcher.gate.add_permits(1);
        pending.drain().await;
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn drain_with_nothing_running_returns() {
        PendingDispatches::new().drain().await;
    }
}
