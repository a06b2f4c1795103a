use crate::intelligence::Intelligence;
use crate::session::{EngagementMetrics, Session};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The final-result document POSTed to the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub session_id: String,
    pub scam_detected: bool,
    pub scam_type: Option<String>,
    pub confidence_level: Option<f64>,
    pub total_messages_exchanged: u32,
    pub engagement_metrics: EngagementMetrics,
    pub extracted_intelligence: Intelligence,
    pub agent_notes: String,
}

impl CallbackPayload {
    /// Build the payload from a session snapshot. Pure.
    pub fn from_session(session: &Session) -> Self {
        let metrics = session.current_metrics();
        Self {
            session_id: session.session_id.clone(),
            scam_detected: session.scam_detected,
            scam_type: session.scam_type.clone(),
            confidence_level: session.confidence_level,
            total_messages_exchanged: metrics.total_messages_exchanged,
            engagement_metrics: metrics,
            extracted_intelligence: session.extracted_intelligence.clone(),
            agent_notes: session
                .agent_notes
                .trim_matches(|c: char| c == ' ' || c == '|')
                .to_string(),
        }
    }
}

/// Audit entry for one dispatch attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRecord {
    pub id: Uuid,
    pub session_id: String,
    pub target_url: String,
    pub sent_payload: serde_json::Value,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub sent_time: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

impl CallbackRecord {
    /// Start a record for an attempt against `target_url`.
    pub fn attempt(
        payload: &CallbackPayload,
        target_url: impl Into<String>,
        sent_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: payload.session_id.clone(),
            target_url: target_url.into(),
            sent_payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            response_status: None,
            response_body: None,
            sent_time,
            success: false,
            error: None,
        }
    }
}
