use crate::dispatcher::Dispatch;
use baitline_core::{BaitlineResult, Clock};
use baitline_session::SessionStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Timing of the inactivity sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// A scam session idle for longer than this is finalized by the sweep.
    #[serde(default = "default_inactivity_threshold_secs")]
    pub inactivity_threshold_secs: u64,
    /// Maximum sessions handled per sweep.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

fn default_interval_secs() -> u64 {
    30
}
fn default_inactivity_threshold_secs() -> u64 {
    90
}
fn default_batch_limit() -> usize {
    100
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            inactivity_threshold_secs: default_inactivity_threshold_secs(),
            batch_limit: default_batch_limit(),
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Stale sessions returned by the store.
    pub found: usize,
    /// Sessions the dispatcher reported as finished.
    pub delivered: usize,
    /// Sessions whose delivery failed and stay eligible for the next sweep.
    pub failed: usize,
}

/// Finalizes scam sessions that went quiet before reaching a terminal verdict.
pub struct InactivityMonitor {
    store: Arc<dyn SessionStore>,
    dispatcher: Arc<dyn Dispatch>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
}

impl InactivityMonitor {
    pub fn new(
        store: Arc<dyn SessionStore>,
        dispatcher: Arc<dyn Dispatch>,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            config,
        }
    }

    /// Run one sweep to completion.
    pub async fn sweep(&self) -> BaitlineResult<SweepReport> {
        self.sweep_until(&CancellationToken::new()).await
    }

    /// Run one sweep, stopping between sessions once `cancel` fires.
    ///
    /// A dispatch that already started is allowed to finish so its claim is
    /// either kept (delivered) or released (failed), never left dangling.
    pub async fn sweep_until(&self, cancel: &CancellationToken) -> BaitlineResult<SweepReport> {
        let threshold = chrono::Duration::seconds(
            i64::try_from(self.config.inactivity_threshold_secs).unwrap_or(i64::MAX),
        );
        let cutoff = self.clock.now() - threshold;
        let stale = self
            .store
            .find_stale(cutoff, self.config.batch_limit)
            .await?;

        let mut report = SweepReport {
            found: stale.len(),
            ..Default::default()
        };
        if stale.is_empty() {
            return Ok(report);
        }
        info!(count = stale.len(), "Found inactive sessions awaiting final result");

        for mut session in stale {
            if cancel.is_cancelled() {
                break;
            }
            if session.engagement_metrics.is_none() {
                session.refresh_metrics();
            }
            info!(session_id = %session.session_id, "Finalizing inactive session");
            if self.dispatcher.dispatch(&session).await {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(
            found = report.found,
            delivered = report.delivered,
            failed = report.failed,
            "Inactivity sweep finished"
        );
        Ok(report)
    }

    /// Spawn the periodic sweep loop.
    pub fn start(self: Arc<Self>) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interval = Duration::from_secs(self.config.interval_secs.max(1));

        info!(
            interval_secs = self.config.interval_secs,
            inactivity_threshold_secs = self.config.inactivity_threshold_secs,
            "Inactivity monitor started"
        );

        let join = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => {}
                }
                if let Err(e) = self.sweep_until(&token).await {
                    error!(error = %e, "Inactivity sweep failed");
                }
            }
            info!("Inactivity monitor stopped");
        });

        MonitorHandle { cancel, join }
    }
}

/// Handle to a running monitor loop.
pub struct MonitorHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "Inactivity monitor task panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use baitline_core::{ManualClock, Session};
    use baitline_session::MemorySessionStore;
    use parking_lot::Mutex;

    /// Records every dispatch and answers with a fixed result.
    struct Recorder {
        seen: Mutex<Vec<Session>>,
        answer: bool,
    }

    #[async_trait]
    impl Dispatch for Recorder {
        async fn dispatch(&self, session: &Session) -> bool {
            self.seen.lock().push(session.clone());
            self.answer
        }
    }

    fn recorder(answer: bool) -> Arc<Recorder> {
        Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            answer,
        })
    }

    #[tokio::test]
    async fn sweep_fills_missing_metrics_and_counts() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemorySessionStore::new());

        let mut s = Session::new("quiet", clock.now());
        s.scam_detected = true;
        s.total_messages = 4;
        store.upsert(&s).await.unwrap();
        clock.advance(Duration::from_secs(120));

        let rec = recorder(false);
        let monitor = InactivityMonitor::new(
            store,
            rec.clone(),
            clock,
            MonitorConfig::default(),
        );

        let report = monitor.sweep().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                found: 1,
                delivered: 0,
                failed: 1
            }
        );
        let seen = rec.seen.lock();
        let metrics = seen[0].engagement_metrics.unwrap();
        assert_eq!(metrics.total_messages_exchanged, 4);
    }

    #[tokio::test]
    async fn cancelled_sweep_dispatches_nothing() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemorySessionStore::new());
        let mut s = Session::new("quiet", clock.now());
        s.scam_detected = true;
        store.upsert(&s).await.unwrap();
        clock.advance(Duration::from_secs(120));

        let rec = recorder(true);
        let monitor = InactivityMonitor::new(store, rec.clone(), clock, MonitorConfig::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = monitor.sweep_until(&cancel).await.unwrap();
        assert_eq!(report.found, 1);
        assert!(rec.seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_sweeps_once_per_interval_until_shutdown() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemorySessionStore::new());
        let mut s = Session::new("quiet", clock.now());
        s.scam_detected = true;
        store.upsert(&s).await.unwrap();
        clock.advance(Duration::from_secs(120));

        // Failing deliveries keep the session eligible on every pass.
        let rec = recorder(false);
        let monitor = Arc::new(InactivityMonitor::new(
            store,
            rec.clone(),
            clock,
            MonitorConfig {
                interval_secs: 30,
                ..Default::default()
            },
        ));

        let handle = monitor.start();
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert!(handle.is_running());
        // Passes at 0 s, 30 s and 60 s.
        assert_eq!(rec.seen.lock().len(), 3);

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(rec.seen.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_does_not_wait_for_the_next_tick() {
        let monitor = Arc::new(InactivityMonitor::new(
            Arc::new(MemorySessionStore::new()),
            recorder(true),
            Arc::new(ManualClock::default()),
            MonitorConfig {
                interval_secs: 3600,
                ..Default::default()
            },
        ));

        let handle = monitor.start();
        tokio::task::yield_now().await;
        let before = tokio::time::Instant::now();
        handle.shutdown().await;
        assert!(before.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unavailable_store_fails_the_sweep() {
        let store = Arc::new(MemorySessionStore::new());
        store.set_available(false);
        let monitor = InactivityMonitor::new(
            store,
            recorder(true),
            Arc::new(ManualClock::default()),
            MonitorConfig::default(),
        );
        assert!(monitor.sweep().await.unwrap_err().is_unavailable());
    }
}
