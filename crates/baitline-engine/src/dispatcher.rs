use async_trait::async_trait;
use baitline_core::{
    BaitlineError, BaitlineResult, CallbackPayload, CallbackRecord, Clock, Session, SessionStatus,
};
use baitline_session::{CallbackLog, ClaimOnce, ClaimOutcome, SessionCache, SessionStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where and how the final result is delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Evaluator endpoint receiving the final-result POST.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Deliver even for sessions that were never flagged as scams.
    #[serde(default)]
    pub testing_mode: bool,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout_secs(),
            testing_mode: false,
        }
    }
}

/// Something that can finish a session by delivering its final result.
///
/// Returns `true` when nothing further is needed for this session (delivered
/// now, delivered by someone else, or never deliverable) and `false`
/// when delivery failed and should be retried later.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, session: &Session) -> bool;
}

/// Exactly-once webhook delivery of a session's final result.
///
/// Both the request path and the inactivity monitor call into the same
/// dispatcher; the [`ClaimOnce`] guard picks the single winner.
pub struct CallbackDispatcher {
    http: reqwest::Client,
    config: CallbackConfig,
    claims: Arc<dyn ClaimOnce>,
    store: Arc<dyn SessionStore>,
    log: Arc<dyn CallbackLog>,
    cache: Option<Arc<SessionCache>>,
    clock: Arc<dyn Clock>,
}

impl CallbackDispatcher {
    pub fn new(
        config: CallbackConfig,
        claims: Arc<dyn ClaimOnce>,
        store: Arc<dyn SessionStore>,
        log: Arc<dyn CallbackLog>,
        clock: Arc<dyn Clock>,
    ) -> BaitlineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BaitlineError::Http(e.to_string()))?;
        Ok(Self {
            http,
            config,
            claims,
            store,
            log,
            cache: None,
            clock,
        })
    }

    /// Evict delivered sessions from this cache.
    pub fn with_cache(mut self, cache: Arc<SessionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// POST the payload and fill in the outcome on `record`.
    async fn send(&self, payload: &CallbackPayload, record: &mut CallbackRecord) {
        let result = self
            .http
            .post(&self.config.url)
            .json(payload)
            .send()
            .await;

        match result {
            Ok(resp) => {
                let status = resp.status();
                record.response_status = Some(status.as_u16());
                record.response_body = resp.text().await.ok();
                record.success = status.is_success();
                if !record.success {
                    record.error = Some(format!("evaluator answered {status}"));
                }
            }
            Err(e) if e.is_timeout() => {
                record.error = Some(format!(
                    "timed out after {}s",
                    self.config.timeout_secs
                ));
            }
            Err(e) => {
                record.error = Some(e.to_string());
            }
        }
    }

    /// Mark the session completed in the store.
    ///
    /// Starts from the freshest stored record so a turn that landed while
    /// the POST was in flight is not lost; `snapshot` is the fallback when
    /// the store cannot be read.
    async fn finalize(&self, snapshot: &Session) {
        let session_id = snapshot.session_id.as_str();
        let mut completed = match self.store.find_by_id(session_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => snapshot.clone(),
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Re-read before completion failed");
                snapshot.clone()
            }
        };
        completed.status = SessionStatus::Completed;
        if completed.engagement_metrics.is_none() {
            completed.refresh_metrics();
        }
        if let Err(e) = self.store.upsert(&completed).await {
            warn!(
                session_id = %session_id,
                error = %e,
                "Delivered but could not persist completed session"
            );
        }
        if let Some(cache) = &self.cache {
            cache.delete(&snapshot.session_id);
        }
    }
}

#[async_trait]
impl Dispatch for CallbackDispatcher {
    async fn dispatch(&self, session: &Session) -> bool {
        let session_id = session.session_id.as_str();

        if !session.scam_detected && !self.config.testing_mode {
            debug!(session_id = %session_id, "No scam detected, nothing to deliver");
            return true;
        }

        let payload = CallbackPayload::from_session(session);

        let outcome = self.claims.claim(session_id).await;
        if outcome == ClaimOutcome::Recovered {
            self.finalize(session).await;
            return true;
        }
        if !outcome.is_granted() {
            debug!(session_id = %session_id, "Final result already claimed elsewhere");
            return true;
        }

        let mut record = CallbackRecord::attempt(&payload, &self.config.url, self.clock.now());
        self.send(&payload, &mut record).await;

        if let Err(e) = self.log.append(&record).await {
            warn!(session_id = %session_id, error = %e, "Failed to record callback attempt");
        }

        if !record.success {
            error!(
                session_id = %session_id,
                status = ?record.response_status,
                error = record.error.as_deref().unwrap_or("unknown"),
                "Final result delivery failed"
            );
            self.claims.release(session_id).await;
            return false;
        }

        self.claims.settle(session_id, outcome).await;
        self.finalize(session).await;
        info!(
            session_id = %session_id,
            degraded = outcome == ClaimOutcome::Degraded,
            messages = payload.total_messages_exchanged,
            intel_items = session.intel_item_count(),
            "Final result delivered"
        );
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
