//! Pure scoring math over one relationship record. The smoothing factors
//! keep scores bounded: trust stays in [0, 1] and sentiment in [-1, 1]
//! for any input stream.

use chrono::{DateTime, Utc};
use rapport_schema::{InteractionSignal, UserId};
use serde::{Deserialize, Serialize};

/// Neutral prior for a freshly opened relationship.
pub const INITIAL_TRUST: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub owner: UserId,
    pub related: UserId,
    pub relation_type: String,
    pub trust_score: f64,
    pub avg_sentiment: f64,
    pub conversation_count: u64,
    pub last_interaction: Option<DateTime<Utc>>,
}

impl RelationshipRecord {
    pub fn new(owner: UserId, related: UserId, relation_type: impl Into<String>) -> Self {
        Self {
            owner,
            related,
            relation_type: relation_type.into(),
            trust_score: INITIAL_TRUST,
            avg_sentiment: 0.0,
            conversation_count: 0,
            last_interaction: None,
        }
    }
}

/// 90% of the previous trust plus 10% of the signal's quality blend
/// (response time 0.3, sentiment consistency 0.3, engagement 0.4).
pub fn updated_trust(record: &RelationshipRecord, signal: &InteractionSignal) -> f64 {
    let interaction_quality = 0.3 * signal.response_time_score
        + 0.3 * signal.sentiment_consistency
        + 0.4 * signal.engagement_level;
    (0.9 * record.trust_score + 0.1 * interaction_quality).clamp(0.0, 1.0)
}

/// 80/20 smoothing toward the incoming sentiment.
pub fn updated_sentiment(record: &RelationshipRecord, signal: &InteractionSignal) -> f64 {
    (0.8 * record.avg_sentiment + 0.2 * signal.sentiment).clamp(-1.0, 1.0)
}

/// Stateless snapshot of communication quality: clarity 0.3, relevance 0.3,
/// emotional alignment 0.4.
pub fn communication_quality(signal: &InteractionSignal) -> f64 {
    (0.3 * signal.message_clarity
        + 0.3 * signal.response_relevance
        + 0.4 * signal.emotional_alignment)
        .clamp(0.0, 1.0)
}

/// Folds one signal into the record.
pub fn apply_signal(record: &mut RelationshipRecord, signal: &InteractionSignal) {
    record.trust_score = updated_trust(record, signal);
    record.avg_sentiment = updated_sentiment(record, signal);
    record.conversation_count += 1;
    record.last_interaction = Some(signal.at.unwrap_or_else(Utc::now));
}
