#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use baitline_core::{
    BaitlineError, BaitlineResult, ChannelMetadata, Classification, Classifier, Clock,
    ConversationMessage, Extractor, IntelCategory, Intelligence, ManualClock, Reply, Responder,
    Session, SessionStatus,
};
use baitline_engine::{
    CallbackConfig, CallbackDispatcher, Collaborators, Dispatch, InactivityMonitor,
    ManagerConfig, MonitorConfig, SaturationPolicy, SaturationThresholds, SessionManager,
    SweepReport, TurnRequest,
};
use baitline_session::{
    CallbackLog, MemoryCallbackLog, MemorySessionStore, SessionCache, SessionStore, StoreClaims,
    TtlCache,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Test collaborators
// ---------------------------------------------------------------------------

/// Flags anything mentioning "blocked" or "otp".
struct KeywordStub;

#[async_trait]
impl Classifier for KeywordStub {
    async fn classify(
        &self,
        message: &ConversationMessage,
        _history: &[ConversationMessage],
        _metadata: &ChannelMetadata,
    ) -> BaitlineResult<Classification> {
        let text = message.text.to_lowercase();
        let indicators: Vec<String> = ["blocked", "otp"]
            .iter()
            .filter(|k| text.contains(*k))
            .map(|k| k.to_string())
            .collect();
        Ok(Classification {
            is_scam: !indicators.is_empty(),
            confidence: 0.9,
            indicators,
            scam_type: Some("bank_fraud".into()),
        })
    }
}

struct SlowClassifier;

#[async_trait]
impl Classifier for SlowClassifier {
    async fn classify(
        &self,
        _message: &ConversationMessage,
        _history: &[ConversationMessage],
        _metadata: &ChannelMetadata,
    ) -> BaitlineResult<Classification> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Classification {
            is_scam: true,
            confidence: 1.0,
            indicators: vec!["late".into()],
            scam_type: None,
        })
    }
}

struct AskingResponder;

#[async_trait]
impl Responder for AskingResponder {
    async fn respond(
        &self,
        _message: &ConversationMessage,
        _history: &[ConversationMessage],
        _session: &Session,
        _metadata: &ChannelMetadata,
    ) -> BaitlineResult<Reply> {
        Ok(Reply {
            text: "Oh no, which bank is this?".into(),
            should_continue: true,
        })
    }
}

/// Reports only UPI handles in the latest scammer message, ignoring `current`.
struct ForgetfulExtractor;

#[async_trait]
impl Extractor for ForgetfulExtractor {
    async fn extract(
        &self,
        history: &[ConversationMessage],
        _current: &Intelligence,
    ) -> BaitlineResult<Intelligence> {
        let mut intel = Intelligence::new();
        if let Some(last) = history.last() {
            for word in last.text.split_whitespace() {
                if word.contains("@ybl") || word.contains("@paytm") {
                    intel.insert(IntelCategory::UpiIds, word, 20);
                }
            }
        }
        Ok(intel)
    }
}

struct BrokenExtractor;

#[async_trait]
impl Extractor for BrokenExtractor {
    async fn extract(
        &self,
        _history: &[ConversationMessage],
        _current: &Intelligence,
    ) -> BaitlineResult<Intelligence> {
        Err(BaitlineError::Collaborator("model unavailable".into()))
    }
}

/// Completes the session in the store while the turn is being processed,
/// the way a background dispatch finishing mid-turn would.
struct CompletesMidTurn {
    store: Arc<MemorySessionStore>,
    session_id: String,
}

#[async_trait]
impl Classifier for CompletesMidTurn {
    async fn classify(
        &self,
        _message: &ConversationMessage,
        _history: &[ConversationMessage],
        _metadata: &ChannelMetadata,
    ) -> BaitlineResult<Classification> {
        if let Some(mut stored) = self.store.find_by_id(&self.session_id).await? {
            stored.status = SessionStatus::Completed;
            self.store.upsert(&stored).await?;
        }
        Ok(Classification::nothing_new())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemorySessionStore>,
    log: Arc<MemoryCallbackLog>,
    cache: Arc<SessionCache>,
    dispatcher: Arc<CallbackDispatcher>,
}

impl Harness {
    fn new(url: String) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemorySessionStore::new());
        let log = Arc::new(MemoryCallbackLog::new());
        let cache: Arc<SessionCache> =
            Arc::new(TtlCache::new(64, Duration::from_secs(300), clock.clone()));
        let claims = Arc::new(StoreClaims::new(store.clone(), clock.clone()));
        let dispatcher = Arc::new(
            CallbackDispatcher::new(
                CallbackConfig {
                    url,
                    timeout_secs: 2,
                    testing_mode: false,
                },
                claims,
                store.clone(),
                log.clone(),
                clock.clone(),
            )
            .unwrap()
            .with_cache(cache.clone()),
        );
        Self {
            clock,
            store,
            log,
            cache,
            dispatcher,
        }
    }

    fn monitor(&self) -> InactivityMonitor {
        InactivityMonitor::new(
            self.store.clone(),
            self.dispatcher.clone(),
            self.clock.clone(),
            MonitorConfig::default(),
        )
    }

    fn manager(&self, collaborators: Collaborators, thresholds: SaturationThresholds) -> SessionManager {
        SessionManager::new(
            self.store.clone(),
            collaborators,
            SaturationPolicy::new(thresholds),
            self.dispatcher.clone(),
            self.clock.clone(),
            ManagerConfig {
                collaborator_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        )
        .with_cache(self.cache.clone())
    }

    async fn seed_scam(&self, id: &str) -> Session {
        let mut s = Session::new(id, self.clock.now());
        s.scam_detected = true;
        s.total_messages = 6;
        s.append_note("urgency");
        self.store.upsert(&s).await.unwrap();
        s
    }
}

fn default_collaborators() -> Collaborators {
    Collaborators {
        classifier: Arc::new(KeywordStub),
        responder: Arc::new(AskingResponder),
        extractor: Arc::new(ForgetfulExtractor),
    }
}

fn turn(id: &str, text: &str) -> TurnRequest {
    TurnRequest {
        session_id: id.into(),
        message: ConversationMessage::scammer(text, Utc::now()),
        conversation_history: Vec::new(),
        metadata: None,
    }
}

async fn mock_evaluator(status: u16, delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status).set_delay(delay))
        .expect(1)
        .mount(&server)
        .await;
    server
}

// ---------------------------------------------------------------------------
// Exactly-once delivery
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatches_deliver_once() {
    let server = mock_evaluator(200, Duration::from_millis(100)).await;
    let h = Harness::new(server.uri());
    let session = h.seed_scam("race").await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let dispatcher = h.dispatcher.clone();
            let session = session.clone();
            tokio::spawn(async move { dispatcher.dispatch(&session).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    let records = h.log.for_session("race").await.unwrap();
    assert_eq!(records.iter().filter(|r| r.success).count(), 1);
    assert_eq!(records.len(), 1);
    let stored = h.store.find_by_id("race").await.unwrap().unwrap();
    assert!(stored.callback_sent);
    assert_eq!(stored.status, SessionStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_path_and_monitor_race_for_one_delivery() {
    let server = mock_evaluator(200, Duration::from_millis(50)).await;
    let h = Harness::new(server.uri());
    let session = h.seed_scam("contested").await;
    h.clock.advance(Duration::from_secs(200));

    let monitor = h.monitor();
    let dispatcher = h.dispatcher.clone();
    let from_request = tokio::spawn(async move { dispatcher.dispatch(&session).await });
    let report = monitor.sweep().await.unwrap();

    assert!(from_request.await.unwrap());
    assert_eq!(report.failed, 0);
    assert_eq!(h.log.for_session("contested").await.unwrap().len(), 1);
}

#[tokio::test]
async fn delivery_during_an_outage_is_recorded_once_the_store_returns() {
    let server = mock_evaluator(200, Duration::ZERO).await;
    let h = Harness::new(server.uri());
    let session = h.seed_scam("outage").await;

    h.store.set_available(false);
    assert!(h.dispatcher.dispatch(&session).await);
    assert_eq!(h.log.all().len(), 1);

    h.store.set_available(true);
    h.clock.advance(Duration::from_secs(200));
    let monitor = h.monitor();

    let first = monitor.sweep().await.unwrap();
    assert_eq!(first.found, 1);
    assert_eq!(first.failed, 0);
    let stored = h.store.find_by_id("outage").await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert!(stored.callback_sent);

    for _ in 0..2 {
        assert_eq!(monitor.sweep().await.unwrap(), SweepReport::default());
    }
    // The evaluator saw exactly one POST (checked by the mock on drop).
    assert_eq!(h.log.all().len(), 1);
}

// ---------------------------------------------------------------------------
// Inactivity sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_session_is_finalized_once() {
    let server = mock_evaluator(200, Duration::ZERO).await;
    let h = Harness::new(server.uri());
    h.seed_scam("quiet").await;
    h.clock.advance(Duration::from_secs(200));

    let monitor = h.monitor();
    let first = monitor.sweep().await.unwrap();
    assert_eq!(
        first,
        SweepReport {
            found: 1,
            delivered: 1,
            failed: 0
        }
    );

    let stored = h.store.find_by_id("quiet").await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert!(stored.callback_sent);
    assert_eq!(
        stored.engagement_metrics.unwrap().engagement_duration_seconds,
        0,
        "duration comes from the session's own timestamps"
    );

    let second = monitor.sweep().await.unwrap();
    assert_eq!(second, SweepReport::default());
}

#[tokio::test]
async fn recent_session_is_left_alone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let h = Harness::new(server.uri());
    h.seed_scam("chatty").await;
    h.clock.advance(Duration::from_secs(60));

    assert_eq!(h.monitor().sweep().await.unwrap().found, 0);
}

#[tokio::test]
async fn failed_delivery_is_retried_by_next_sweep() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::new(server.uri());
    h.seed_scam("flaky").await;
    h.clock.advance(Duration::from_secs(200));
    let monitor = h.monitor();

    let first = monitor.sweep().await.unwrap();
    assert_eq!(first.failed, 1);
    let stored = h.store.find_by_id("flaky").await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Active);
    assert!(!stored.callback_sent);

    let second = monitor.sweep().await.unwrap();
    assert_eq!(second.delivered, 1);

    let records = h.log.for_session("flaky").await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(!records[0].success);
    assert!(records[1].success);
}

// ---------------------------------------------------------------------------
// Request path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn benign_message_gets_no_reply() {
    let h = Harness::new("http://127.0.0.1:9/unused".into());
    let manager = h.manager(default_collaborators(), SaturationThresholds::default());

    let out = manager.handle_turn(turn("b1", "Hi, are we still on for lunch?")).await;
    assert!(!out.scam_detected);
    assert!(out.reply.is_none());
    assert!(out.should_continue);
    assert_eq!(out.engagement_metrics.total_messages_exchanged, 1);

    let stored = h.store.find_by_id("b1").await.unwrap().unwrap();
    assert_eq!(stored.conversation_history.len(), 1);
}

#[tokio::test]
async fn scam_turn_engages_and_accumulates() {
    let h = Harness::new("http://127.0.0.1:9/unused".into());
    let manager = h.manager(default_collaborators(), SaturationThresholds::default());

    let out = manager
        .handle_turn(turn("s1", "Your account is blocked. Pay to fraud@ybl now"))
        .await;
    assert!(out.scam_detected);
    assert_eq!(out.reply.as_deref(), Some("Oh no, which bank is this?"));
    assert!(out.should_continue);
    assert_eq!(out.agent_notes, "blocked");
    assert!(out
        .extracted_intelligence
        .contains(IntelCategory::UpiIds, "fraud@ybl"));

    h.clock.advance(Duration::from_secs(20));
    let out = manager
        .handle_turn(turn("s1", "Share the OTP or send to alt@paytm"))
        .await;

    // The extractor forgot fraud@ybl; the session must not.
    assert!(out
        .extracted_intelligence
        .contains(IntelCategory::UpiIds, "fraud@ybl"));
    assert!(out
        .extracted_intelligence
        .contains(IntelCategory::UpiIds, "alt@paytm"));
    assert_eq!(out.agent_notes, "blocked | otp");
    assert_eq!(out.engagement_metrics.total_messages_exchanged, 4);
    assert_eq!(out.engagement_metrics.engagement_duration_seconds, 20);

    let stored = h.store.find_by_id("s1").await.unwrap().unwrap();
    assert_eq!(stored.questions_asked, 2);
    assert_eq!(stored.red_flag_count, 2);
}

#[tokio::test]
async fn terminal_turn_dispatches_in_background() {
    let server = mock_evaluator(200, Duration::ZERO).await;
    let h = Harness::new(server.uri());
    let manager = h.manager(
        default_collaborators(),
        SaturationThresholds {
            max_messages: 4,
            ..Default::default()
        },
    );

    let first = manager.handle_turn(turn("t1", "Account blocked!")).await;
    assert!(first.should_continue);

    let last = manager.handle_turn(turn("t1", "Send OTP now")).await;
    assert!(!last.should_continue);

    manager.pending().drain().await;

    let stored = h.store.find_by_id("t1").await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert!(h.cache.get(&"t1".to_string()).is_none());

    // Completed sessions are answered without re-engagement or re-delivery.
    let after = manager.handle_turn(turn("t1", "Hello??")).await;
    assert!(!after.should_continue);
    assert!(after.reply.is_none());
    manager.pending().drain().await;
    assert_eq!(h.log.all().len(), 1);
}

#[tokio::test]
async fn collaborator_failures_mean_nothing_new() {
    let h = Harness::new("http://127.0.0.1:9/unused".into());
    let manager = h.manager(
        Collaborators {
            classifier: Arc::new(SlowClassifier),
            responder: Arc::new(AskingResponder),
            extractor: Arc::new(BrokenExtractor),
        },
        SaturationThresholds::default(),
    );

    let out = manager
        .handle_turn(turn("slow", "Your account is blocked"))
        .await;
    assert!(!out.scam_detected, "timed-out classification is ignored");
    assert!(out.reply.is_none());
    assert!(out.should_continue);
    assert!(out.extracted_intelligence.is_empty());
}

#[tokio::test]
async fn store_outage_does_not_fail_the_turn() {
    let h = Harness::new("http://127.0.0.1:9/unused".into());
    let manager = h.manager(default_collaborators(), SaturationThresholds::default());
    h.store.set_available(false);

    let out = manager.handle_turn(turn("o1", "Account blocked")).await;
    assert!(out.scam_detected);
    assert!(out.reply.is_some());

    // The cache still carries the session while the store is down.
    assert!(h.cache.get(&"o1".to_string()).is_some());
}

#[tokio::test]
async fn completion_during_a_turn_is_not_undone_by_the_cache() {
    let h = Harness::new("http://127.0.0.1:9/unused".into());
    let seeded = h.seed_scam("mid").await;
    h.cache.insert("mid".into(), seeded);
    let manager = h.manager(
        Collaborators {
            classifier: Arc::new(CompletesMidTurn {
                store: h.store.clone(),
                session_id: "mid".into(),
            }),
            responder: Arc::new(AskingResponder),
            extractor: Arc::new(ForgetfulExtractor),
        },
        SaturationThresholds::default(),
    );

    manager.handle_turn(turn("mid", "Account blocked")).await;
    assert!(h.cache.get(&"mid".to_string()).is_none());

    let after = manager.handle_turn(turn("mid", "Hello??")).await;
    assert!(!after.should_continue);
    assert!(after.reply.is_none());
}
