use crate::dispatcher::Dispatch;
use crate::pending::PendingDispatches;
use crate::policy::{note_intel_progress, note_red_flags, note_reply, SaturationPolicy, Verdict};
use baitline_core::{
    BaitlineResult, ChannelMetadata, Classification, Classifier, Clock, ConversationMessage,
    EngagementMetrics, Extractor, Intelligence, Reply, Responder, Session, DEFAULT_PER_CATEGORY_CAP,
};
use baitline_session::{SessionCache, SessionStore};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// One inbound message together with the context the channel supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub session_id: String,
    pub message: ConversationMessage,
    #[serde(default)]
    pub conversation_history: Vec<ConversationMessage>,
    #[serde(default)]
    pub metadata: Option<ChannelMetadata>,
}

/// The answer returned to the channel for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub status: String,
    pub session_id: String,
    pub scam_detected: bool,
    pub reply: Option<String>,
    pub should_continue: bool,
    pub engagement_metrics: EngagementMetrics,
    pub extracted_intelligence: Intelligence,
    pub agent_notes: String,
}

impl TurnOutcome {
    fn from_session(session: &Session, reply: Option<String>, should_continue: bool) -> Self {
        Self {
            status: "success".to_string(),
            session_id: session.session_id.clone(),
            scam_detected: session.scam_detected,
            reply,
            should_continue,
            engagement_metrics: session.current_metrics(),
            extracted_intelligence: session.extracted_intelligence.clone(),
            agent_notes: session
                .agent_notes
                .trim_matches(|c: char| c == ' ' || c == '|')
                .to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The three content collaborators consulted on every turn.
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn Classifier>,
    pub responder: Arc<dyn Responder>,
    pub extractor: Arc<dyn Extractor>,
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Per-call budget for each collaborator.
    pub collaborator_timeout: Duration,
    pub per_category_cap: usize,
    pub cache_ttl: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout: Duration::from_secs(30),
            per_category_cap: DEFAULT_PER_CATEGORY_CAP,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Request-path turn processor.
///
/// Loads the session (cache, then store, then new), consults the
/// collaborators, updates counters and metrics, asks the saturation policy
/// for a verdict, persists, and hands terminal sessions to the dispatcher on
/// a tracked background task so the response is never held up by delivery.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cache: Option<Arc<SessionCache>>,
    collaborators: Collaborators,
    policy: SaturationPolicy,
    dispatcher: Arc<dyn Dispatch>,
    pending: PendingDispatches,
    clock: Arc<dyn Clock>,
    config: ManagerConfig,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        collaborators: Collaborators,
        policy: SaturationPolicy,
        dispatcher: Arc<dyn Dispatch>,
        clock: Arc<dyn Clock>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            store,
            cache: None,
            collaborators,
            policy,
            dispatcher,
            pending: PendingDispatches::new(),
            clock,
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<SessionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_pending(mut self, pending: PendingDispatches) -> Self {
        self.pending = pending;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn cache(&self) -> Option<&Arc<SessionCache>> {
        self.cache.as_ref()
    }

    pub fn pending(&self) -> &PendingDispatches {
        &self.pending
    }

    /// Cache first, then the durable store. A store failure reads as a miss.
    pub async fn load(&self, session_id: &str) -> Option<Session> {
        if let Some(cache) = &self.cache {
            if let Some(session) = cache.get(&session_id.to_string()) {
                return Some(session);
            }
        }
        match self.store.find_by_id(session_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Store lookup failed, treating as new");
                None
            }
        }
    }

    async fn bounded<T>(
        &self,
        what: &'static str,
        session_id: &str,
        call: impl Future<Output = BaitlineResult<T>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.config.collaborator_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(session_id = %session_id, collaborator = what, error = %e, "Collaborator failed");
                None
            }
            Err(_) => {
                warn!(
                    session_id = %session_id,
                    collaborator = what,
                    timeout_secs = self.config.collaborator_timeout.as_secs(),
                    "Collaborator timed out"
                );
                None
            }
        }
    }

    /// Process one inbound message.
    pub async fn handle_turn(&self, request: TurnRequest) -> TurnOutcome {
        let now = self.clock.now();
        let session_id = request.session_id.clone();

        let mut session = match self.load(&session_id).await {
            Some(existing) => existing,
            None => {
                info!(session_id = %session_id, "Creating new session");
                let mut fresh = Session::new(session_id.clone(), now);
                if let Some(metadata) = &request.metadata {
                    fresh.metadata = metadata.clone();
                }
                fresh
            }
        };

        if !session.is_active() {
            debug!(session_id = %session_id, "Session already completed");
            return TurnOutcome::from_session(&session, None, false);
        }

        let metadata = request
            .metadata
            .clone()
            .unwrap_or_else(|| session.metadata.clone());
        let mut history = if request.conversation_history.is_empty() {
            session.conversation_history.clone()
        } else {
            request.conversation_history.clone()
        };

        // Classification.
        let classification = self
            .bounded(
                "classifier",
                &session_id,
                self.collaborators
                    .classifier
                    .classify(&request.message, &history, &metadata),
            )
            .await
            .unwrap_or_else(Classification::nothing_new);

        if classification.is_scam {
            if !session.scam_detected {
                info!(
                    session_id = %session_id,
                    confidence = classification.confidence,
                    "Scam detected"
                );
            }
            session.mark_scam();
            session.confidence_level = Some(classification.confidence);
            if classification.scam_type.is_some() {
                session.scam_type = classification.scam_type.clone();
            }
        }

        // Persona reply, only once the conversation is known to be a scam.
        let reply: Option<Reply> = if session.scam_detected {
            self.bounded(
                "responder",
                &session_id,
                self.collaborators
                    .responder
                    .respond(&request.message, &history, &session, &metadata),
            )
            .await
        } else {
            None
        };

        history.push(request.message.clone());

        // Extraction over everything said so far.
        if let Some(found) = self
            .bounded(
                "extractor",
                &session_id,
                self.collaborators
                    .extractor
                    .extract(&history, &session.extracted_intelligence),
            )
            .await
        {
            session
                .extracted_intelligence
                .merge(&found, self.config.per_category_cap);
        }

        if let Some(reply) = &reply {
            history.push(ConversationMessage::user(reply.text.clone(), now));
            note_reply(&mut session, &reply.text);
            session.upstream_stop = !reply.should_continue;
        }

        session.conversation_history = history;
        session.total_messages = u32::try_from(session.conversation_history.len()).unwrap_or(u32::MAX);
        session.metadata = metadata;
        if !classification.indicators.is_empty() {
            session.append_note(&classification.indicators.join(", "));
        }
        note_red_flags(&mut session, classification.indicators.len());
        note_intel_progress(&mut session);
        session.touch(now);
        session.refresh_metrics();

        let verdict = self.policy.decide(&session);

        // While the store is down the cache carries the session on its own.
        let still_active = match self.store.upsert(&session).await {
            Ok(stored) => stored.is_active(),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to persist session");
                true
            }
        };
        if let Some(cache) = &self.cache {
            if still_active {
                cache.set(session_id.clone(), session.clone(), self.config.cache_ttl);
            } else {
                // Completed by a dispatch that finished during this turn.
                cache.delete(&session_id);
            }
        }

        if let Verdict::Terminate(reason) = verdict {
            info!(
                session_id = %session_id,
                reason = %reason,
                messages = session.total_messages,
                "Conversation finished"
            );
            self.pending.start(self.dispatcher.clone(), session.clone());
        }

        TurnOutcome::from_session(
            &session,
            reply.map(|r| r.text),
            !verdict.is_terminal(),
        )
    }
}
