use crate::intelligence::Intelligence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`Session`]. Ordered so that `max` never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The conversation is still being engaged.
    Active,
    /// The final result has been delivered.
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => f.write_str("active"),
            SessionStatus::Completed => f.write_str("completed"),
        }
    }
}

/// Who authored a [`ConversationMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The suspected fraudster.
    Scammer,
    /// Our persona.
    User,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn scammer(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: Sender::Scammer,
            text: text.into(),
            timestamp,
        }
    }

    pub fn user(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
            timestamp,
        }
    }
}

/// Channel context supplied with inbound messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_channel() -> String {
    "SMS".to_string()
}
fn default_language() -> String {
    "English".to_string()
}
fn default_locale() -> String {
    "IN".to_string()
}

impl Default for ChannelMetadata {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            language: default_language(),
            locale: default_locale(),
        }
    }
}

/// Duration and volume of an engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementMetrics {
    pub engagement_duration_seconds: u64,
    pub total_messages_exchanged: u32,
}

/// The persistent state of one tracked conversation.
///
/// A few fields carry invariants that the stores enforce on every write:
/// `status` never goes back from `Completed`, `scam_detected` never goes
/// back to `false`, and `callback_sent`/`callback_sent_at` are owned by the
/// claim primitive (see [`Session::merge_durable_fields`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub status: SessionStatus,
    pub scam_detected: bool,
    #[serde(default)]
    pub scam_type: Option<String>,
    #[serde(default)]
    pub confidence_level: Option<f64>,
    #[serde(default)]
    pub extracted_intelligence: Intelligence,
    #[serde(default)]
    pub engagement_metrics: Option<EngagementMetrics>,
    #[serde(default)]
    pub total_messages: u32,
    #[serde(default)]
    pub red_flag_count: u32,
    #[serde(default)]
    pub questions_asked: u32,
    #[serde(default)]
    pub turns_since_last_intel: u32,
    #[serde(default)]
    pub last_intel_count: u32,
    /// The responder's most recent "do not continue" signal.
    #[serde(default)]
    pub upstream_stop: bool,
    #[serde(default)]
    pub callback_sent: bool,
    #[serde(default)]
    pub callback_sent_at: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    #[serde(default)]
    pub agent_notes: String,
    #[serde(default)]
    pub conversation_history: Vec<ConversationMessage>,
    #[serde(default)]
    pub metadata: ChannelMetadata,
}

impl Session {
    /// A fresh, active session whose clock starts at `start`.
    pub fn new(session_id: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Active,
            scam_detected: false,
            scam_type: None,
            confidence_level: None,
            extracted_intelligence: Intelligence::new(),
            engagement_metrics: None,
            total_messages: 0,
            red_flag_count: 0,
            questions_asked: 0,
            turns_since_last_intel: 0,
            last_intel_count: 0,
            upstream_stop: false,
            callback_sent: false,
            callback_sent_at: None,
            start_time: start,
            last_update_time: start,
            agent_notes: String::new(),
            conversation_history: Vec::new(),
            metadata: ChannelMetadata::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Flag the conversation as a scam. Sticky.
    pub fn mark_scam(&mut self) {
        self.scam_detected = true;
    }

    /// Advance `last_update_time`; older timestamps are ignored.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_update_time {
            self.last_update_time = at;
        }
    }

    /// Append to the pipe-joined audit trail.
    pub fn append_note(&mut self, note: &str) {
        let note = note.trim();
        if note.is_empty() {
            return;
        }
        if self.agent_notes.is_empty() {
            self.agent_notes = note.to_string();
        } else {
            self.agent_notes.push_str(" | ");
            self.agent_notes.push_str(note);
        }
    }

    /// Derive metrics from the timestamps and message count.
    pub fn compute_metrics(&self) -> EngagementMetrics {
        let seconds = (self.last_update_time - self.start_time).num_seconds().max(0);
        EngagementMetrics {
            engagement_duration_seconds: u64::try_from(seconds).unwrap_or_default(),
            total_messages_exchanged: self.total_messages,
        }
    }

    /// Recompute and store metrics.
    pub fn refresh_metrics(&mut self) -> EngagementMetrics {
        let metrics = self.compute_metrics();
        self.engagement_metrics = Some(metrics);
        metrics
    }

    /// Stored metrics if present, otherwise derived ones.
    pub fn current_metrics(&self) -> EngagementMetrics {
        self.engagement_metrics
            .unwrap_or_else(|| self.compute_metrics())
    }

    pub fn intel_item_count(&self) -> usize {
        self.extracted_intelligence.item_count()
    }

    /// Reconcile a snapshot about to be written with the record already stored.
    ///
    /// The claim fields always come from `stored`; `status` and
    /// `scam_detected` take whichever side is further along; intelligence is
    /// the union of both sides; and `last_update_time` never moves backwards.
    /// When `stored` saw a later turn than this snapshot, its conversation
    /// progress (history, notes, counters, metrics) wins over ours.
    pub fn merge_durable_fields(&mut self, stored: &Session) {
        self.callback_sent = stored.callback_sent;
        self.callback_sent_at = stored.callback_sent_at;
        self.status = self.status.max(stored.status);
        self.scam_detected |= stored.scam_detected;

        if stored.last_update_time > self.last_update_time {
            self.adopt_progress(stored);
        }
        self.extracted_intelligence
            .absorb(&stored.extracted_intelligence);
        self.start_time = self.start_time.min(stored.start_time);
        self.touch(stored.last_update_time);
    }

    fn adopt_progress(&mut self, newer: &Session) {
        self.scam_type.clone_from(&newer.scam_type);
        self.confidence_level = newer.confidence_level;
        self.engagement_metrics = newer.engagement_metrics;
        self.total_messages = newer.total_messages;
        self.red_flag_count = newer.red_flag_count;
        self.questions_asked = newer.questions_asked;
        self.turns_since_last_intel = newer.turns_since_last_intel;
        self.last_intel_count = newer.last_intel_count;
        self.upstream_stop = newer.upstream_stop;
        self.agent_notes.clone_from(&newer.agent_notes);
        self.conversation_history
            .clone_from(&newer.conversation_history);
        self.metadata.clone_from(&newer.metadata);
    }
}
