use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rapport_schema::{InteractionSignal, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::stats;

/// Cumulative digest of one directed edge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub interaction_count: u64,
    pub avg_sentiment: f64,
    pub avg_engagement: f64,
    pub last_interaction: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct InteractionEvent {
    at: DateTime<Utc>,
    sentiment: f64,
    engagement: f64,
    response_time: f64,
}

#[derive(Debug, Default)]
struct PairLedger {
    events: Vec<InteractionEvent>,
    edge: RelationshipEdge,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentimentTrend {
    /// Least-squares slope over the recent window, chronological order.
    pub slope: f64,
    /// Population standard deviation of recent sentiment.
    pub volatility: f64,
    /// Most recent sentiment value.
    pub current: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsePatterns {
    pub avg_response_seconds: f64,
    /// 1 - stdev/mean of reply gaps; 0 with fewer than two gaps.
    pub consistency: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipMetrics {
    /// Events per day over the rolling window.
    pub interaction_frequency: f64,
    pub sentiment_trend: SentimentTrend,
    pub engagement_quality: f64,
    pub response_patterns: ResponsePatterns,
    pub relationship_strength: f64,
}

struct WindowEvent {
    at: DateTime<Utc>,
    sentiment: f64,
    engagement: f64,
    response_time: f64,
    forward: bool,
}

/// Directed weighted interaction graph. Each ordered pair owns a ledger of
/// recent events plus a cumulative edge; metrics merge both directions over
/// a rolling window.
pub struct InteractionGraph {
    pairs: RwLock<HashMap<(UserId, UserId), Arc<Mutex<PairLedger>>>>,
    window: Duration,
}

impl InteractionGraph {
    pub fn new(window_days: i64) -> Self {
        Self {
            pairs: RwLock::new(HashMap::new()),
            window: Duration::days(window_days),
        }
    }

    /// Records one interaction from `from` to `to` and returns metrics
    /// recomputed over the fresh window. Edge means fold the new value in
    /// before the count moves, so they stay within the input domain.
    pub async fn track(
        &self,
        from: UserId,
        to: UserId,
        signal: &InteractionSignal,
    ) -> RelationshipMetrics {
        let at = signal.at.unwrap_or_else(Utc::now);
        let slot = {
            let pairs = self.pairs.read().await;
            pairs.get(&(from, to)).cloned()
        };
        let slot = match slot {
            Some(slot) => slot,
            None => {
                let mut pairs = self.pairs.write().await;
                pairs
                    .entry((from, to))
                    .or_insert_with(|| Arc::new(Mutex::new(PairLedger::default())))
                    .clone()
            }
        };

        {
            let mut ledger = slot.lock().await;
            let n = ledger.edge.interaction_count as f64;
            ledger.edge.avg_sentiment = (ledger.edge.avg_sentiment * n + signal.sentiment) / (n + 1.0);
            ledger.edge.avg_engagement =
                (ledger.edge.avg_engagement * n + signal.engagement) / (n + 1.0);
            ledger.edge.interaction_count += 1;
            ledger.edge.last_interaction = Some(at);
            ledger.events.push(InteractionEvent {
                at,
                sentiment: signal.sentiment,
                engagement: signal.engagement,
                response_time: signal.response_time,
            });
            // Events past the window can no longer affect metrics; the edge
            // keeps the cumulative history.
            let horizon = Utc::now() - self.window;
            ledger.events.retain(|e| e.at >= horizon);
        }

        self.metrics(from, to).await.unwrap_or_default()
    }

    pub async fn edge(&self, from: UserId, to: UserId) -> Option<RelationshipEdge> {
        let slot = {
            let pairs = self.pairs.read().await;
            pairs.get(&(from, to)).cloned()
        };
        match slot {
            Some(slot) => Some(slot.lock().await.edge.clone()),
            None => None,
        }
    }

    async fn direction_events(&self, from: UserId, to: UserId, horizon: DateTime<Utc>, forward: bool) -> Vec<WindowEvent> {
        let slot = {
            let pairs = self.pairs.read().await;
            pairs.get(&(from, to)).cloned()
        };
        let Some(slot) = slot else {
            return Vec::new();
        };
        let ledger = slot.lock().await;
        ledger
            .events
            .iter()
            .filter(|e| e.at >= horizon)
            .map(|e| WindowEvent {
                at: e.at,
                sentiment: e.sentiment,
                engagement: e.engagement,
                response_time: e.response_time,
                forward,
            })
            .collect()
    }

    /// Windowed metrics over both directions between `a` and `b`. `None`
    /// when no event falls inside the window.
    pub async fn metrics(&self, a: UserId, b: UserId) -> Option<RelationshipMetrics> {
        let horizon = Utc::now() - self.window;
        let mut merged = self.direction_events(a, b, horizon, true).await;
        merged.extend(self.direction_events(b, a, horizon, false).await);
        if merged.is_empty() {
            return None;
        }
        merged.sort_by_key(|e| e.at);

        let window_days = self.window.num_days().max(1) as f64;
        let interaction_frequency = merged.len() as f64 / window_days;

        let sentiments: Vec<f64> = merged.iter().map(|e| e.sentiment).collect();
        let sentiment_trend = SentimentTrend {
            slope: stats::linear_slope(&sentiments),
            volatility: stats::std_dev(&sentiments),
            current: *sentiments.last().unwrap_or(&0.0),
        };

        let engagements: Vec<f64> = merged.iter().map(|e| e.engagement).collect();
        let max_rt = merged
            .iter()
            .map(|e| e.response_time)
            .fold(0.0_f64, f64::max);
        let time_component = if max_rt > 0.0 {
            let normalized: Vec<f64> = merged
                .iter()
                .map(|e| 1.0 - e.response_time / max_rt)
                .collect();
            stats::mean(&normalized)
        } else {
            1.0
        };
        let engagement_quality = 0.7 * stats::mean(&engagements) + 0.3 * time_component;

        let mut gaps: Vec<f64> = Vec::new();
        for pair in merged.windows(2) {
            if pair[0].forward != pair[1].forward {
                gaps.push((pair[1].at - pair[0].at).num_milliseconds() as f64 / 1000.0);
            }
        }
        let avg_gap = stats::mean(&gaps);
        let response_patterns = ResponsePatterns {
            avg_response_seconds: avg_gap,
            consistency: if gaps.len() < 2 || avg_gap == 0.0 {
                0.0
            } else {
                (1.0 - stats::std_dev(&gaps) / avg_gap).max(0.0)
            },
        };

        let relationship_strength = self.strength(a, b).await;

        Some(RelationshipMetrics {
            interaction_frequency,
            sentiment_trend,
            engagement_quality,
            response_patterns,
            relationship_strength,
        })
    }

    /// Strength over the cumulative directed edges: count balance,
    /// sentiment harmony and engagement harmony at 0.3/0.4/0.3. Zero when
    /// `a` has never interacted with `b`.
    async fn strength(&self, a: UserId, b: UserId) -> f64 {
        let Some(forward) = self.edge(a, b).await else {
            return 0.0;
        };
        let reverse = self.edge(b, a).await.unwrap_or_default();

        let fc = forward.interaction_count as f64;
        let rc = reverse.interaction_count as f64;
        let balance = if fc.max(rc) > 0.0 {
            fc.min(rc) / fc.max(rc)
        } else {
            0.0
        };
        let sentiment_harmony =
            (1.0 - (forward.avg_sentiment - reverse.avg_sentiment).abs() / 2.0).max(0.0);
        let engagement_harmony =
            (1.0 - (forward.avg_engagement - reverse.avg_engagement).abs()).max(0.0);

        0.3 * balance + 0.4 * sentiment_harmony + 0.3 * engagement_harmony
    }
}
