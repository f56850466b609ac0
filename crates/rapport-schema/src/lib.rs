use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one tracked conversation.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one participant across conversations.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn default_kind() -> String {
    "text".to_string()
}

fn default_trace_id() -> Uuid {
    Uuid::new_v4()
}

/// One message entering the pipeline through the ingestion boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(default = "default_trace_id")]
    pub trace_id: Uuid,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub text: String,
    pub at: DateTime<Utc>,
    #[serde(default = "default_kind")]
    pub kind: String,
}

/// Per-interaction observation feeding the graph and the trust scorer.
///
/// Producers fill whatever they know; every numeric field defaults to 0.0
/// so a sparse payload is always accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionSignal {
    #[serde(default)]
    pub sentiment: f64,
    #[serde(default)]
    pub engagement: f64,
    /// Seconds between this message and the previous one from the other side.
    #[serde(default)]
    pub response_time: f64,
    #[serde(default)]
    pub response_time_score: f64,
    #[serde(default)]
    pub sentiment_consistency: f64,
    #[serde(default)]
    pub engagement_level: f64,
    #[serde(default)]
    pub message_clarity: f64,
    #[serde(default)]
    pub response_relevance: f64,
    #[serde(default)]
    pub emotional_alignment: f64,
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Wall clock is used when absent.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

impl Default for InteractionSignal {
    fn default() -> Self {
        Self {
            sentiment: 0.0,
            engagement: 0.0,
            response_time: 0.0,
            response_time_score: 0.0,
            sentiment_consistency: 0.0,
            engagement_level: 0.0,
            message_clarity: 0.0,
            response_relevance: 0.0,
            emotional_alignment: 0.0,
            kind: default_kind(),
            at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusMessage {
    MessageAccepted {
        trace_id: Uuid,
        conversation_id: ConversationId,
    },
    AnalysisCompleted {
        trace_id: Uuid,
        conversation_id: ConversationId,
        user_id: UserId,
    },
    AnalysisFailed {
        trace_id: Uuid,
        conversation_id: ConversationId,
        error: String,
    },
    AssessmentCompleted {
        user_id: UserId,
        iq_score: f64,
        percentile: f64,
    },
    PersonalityCompleted {
        user_id: UserId,
    },
    MaintenanceSwept {
        sessions_evicted: usize,
        reports_evicted: usize,
    },
}
