//! Contracts for the collaborators that produce message content.
//!
//! The session core never inspects how these work. A failed or timed-out
//! call is treated as "nothing new this turn".

use crate::error::BaitlineResult;
use crate::intelligence::Intelligence;
use crate::session::{ChannelMetadata, ConversationMessage, Session};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Verdict of a [`Classifier`] on the current message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub is_scam: bool,
    pub confidence: f64,
    pub indicators: Vec<String>,
    pub scam_type: Option<String>,
}

impl Classification {
    /// The "no new information" result.
    pub fn nothing_new() -> Self {
        Self::default()
    }
}

/// Output of a [`Responder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub text: String,
    pub should_continue: bool,
}

/// Decides whether a message is a scam attempt.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        message: &ConversationMessage,
        history: &[ConversationMessage],
        metadata: &ChannelMetadata,
    ) -> BaitlineResult<Classification>;
}

/// Produces the persona's next message.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(
        &self,
        message: &ConversationMessage,
        history: &[ConversationMessage],
        session: &Session,
        metadata: &ChannelMetadata,
    ) -> BaitlineResult<Reply>;
}

/// Pulls structured intelligence out of a conversation.
///
/// Implementations should return a superset of `current`; the core merges
/// the result into the session anyway, so a lossy extractor cannot shrink
/// what was already gathered.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        history: &[ConversationMessage],
        current: &Intelligence,
    ) -> BaitlineResult<Intelligence>;
}
