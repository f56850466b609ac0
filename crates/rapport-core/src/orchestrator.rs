use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rapport_bus::BusPublisher;
use rapport_provider::{
    CognitiveIndicators, RenderedPanel, TextAnalyzer, TextInsights, Visualizer,
};
use rapport_schema::{BusMessage, ConversationId, InteractionSignal, MessageEvent, UserId};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::graph::{InteractionGraph, RelationshipMetrics};
use crate::profile::ProfileBook;
use crate::session::{participant_activity, ParticipantActivity, SessionSnapshot, SessionTracker};
use crate::stats;
use crate::trust;

#[derive(Debug, Clone, Serialize)]
pub struct ConversationMetricsReport {
    pub message_count: usize,
    pub participant_count: usize,
    /// Mean message length in characters.
    pub avg_message_length: f64,
    pub duration_seconds: f64,
    pub messages_per_minute: f64,
    pub participants: Vec<ParticipantActivity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipUpdate {
    pub with_user: UserId,
    pub trust_score: f64,
    pub avg_sentiment: f64,
    pub communication_quality: f64,
    pub metrics: RelationshipMetrics,
}

/// Merged output of one analysis pass, cached per conversation.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub trace_id: Uuid,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub generated_at: DateTime<Utc>,
    pub conversation: ConversationMetricsReport,
    pub relationships: Vec<RelationshipUpdate>,
    pub cognitive: CognitiveIndicators,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<UserId>,
    pub suggestion: String,
    pub reason: String,
}

/// Cached analysis plus the rendered artifact and advice derived from it.
#[derive(Debug, Clone)]
pub struct FullReport {
    pub analysis: AnalysisReport,
    pub recommendations: Vec<Recommendation>,
    pub panel: RenderedPanel,
}

struct CachedReport {
    report: AnalysisReport,
    cached_at: DateTime<Utc>,
}

/// Runs the three analysis passes for one message concurrently and merges
/// them. All three must succeed; the first failure cancels the rest and
/// surfaces to the caller, so a report never carries silent zeros.
pub struct AnalysisOrchestrator {
    sessions: Arc<SessionTracker>,
    graph: Arc<InteractionGraph>,
    profiles: Arc<ProfileBook>,
    analyzer: Arc<dyn TextAnalyzer>,
    visualizer: Arc<dyn Visualizer>,
    publisher: BusPublisher,
    reports: RwLock<HashMap<ConversationId, CachedReport>>,
    collaborator_timeout: StdDuration,
    cache_cap: usize,
}

impl AnalysisOrchestrator {
    pub fn new(
        sessions: Arc<SessionTracker>,
        graph: Arc<InteractionGraph>,
        profiles: Arc<ProfileBook>,
        analyzer: Arc<dyn TextAnalyzer>,
        visualizer: Arc<dyn Visualizer>,
        publisher: BusPublisher,
        config: &CoreConfig,
    ) -> Self {
        Self {
            sessions,
            graph,
            profiles,
            analyzer,
            visualizer,
            publisher,
            reports: RwLock::new(HashMap::new()),
            collaborator_timeout: StdDuration::from_secs(config.collaborator_timeout_secs),
            cache_cap: config.report_cache_cap,
        }
    }

    /// Records the message, scores its text, fans out into conversation,
    /// relationship and cognitive analysis, and caches the merged report.
    pub async fn ingest(&self, event: MessageEvent) -> Result<AnalysisReport> {
        self.sessions.record(event.clone()).await;
        let snapshot = self.sessions.snapshot(&event.conversation_id).await?;

        let insights = self.scored_text(&event.text).await?;
        let activity = participant_activity(&snapshot.messages);

        let conversation_task =
            async { Ok::<_, CoreError>(conversation_report(&snapshot, &activity)) };
        let relationships_task = async {
            self.relationship_updates(&event, &snapshot, &activity, &insights)
                .await
                .map_err(|err| CoreError::PartialFailure {
                    task: "relationships",
                    error: err.to_string(),
                })
        };
        let cognitive_task = async {
            let texts: Vec<String> = snapshot
                .messages
                .iter()
                .filter(|m| m.user_id == event.user_id)
                .map(|m| m.text.clone())
                .collect();
            match timeout(self.collaborator_timeout, self.analyzer.cognitive_profile(&texts)).await
            {
                Ok(Ok(indicators)) => Ok(indicators),
                Ok(Err(err)) => Err(CoreError::PartialFailure {
                    task: "cognitive",
                    error: err.to_string(),
                }),
                Err(_) => Err(CoreError::PartialFailure {
                    task: "cognitive",
                    error: format!(
                        "timed out after {}s",
                        self.collaborator_timeout.as_secs()
                    ),
                }),
            }
        };

        let (conversation, relationships, cognitive) =
            tokio::try_join!(conversation_task, relationships_task, cognitive_task)?;

        let report = AnalysisReport {
            trace_id: event.trace_id,
            conversation_id: event.conversation_id.clone(),
            user_id: event.user_id,
            generated_at: Utc::now(),
            conversation,
            relationships,
            cognitive,
        };
        self.cache_report(report.clone()).await;

        let _ = self
            .publisher
            .publish(BusMessage::AnalysisCompleted {
                trace_id: event.trace_id,
                conversation_id: event.conversation_id.clone(),
                user_id: event.user_id,
            })
            .await;
        debug!(trace_id = %event.trace_id, conversation = %event.conversation_id, "analysis cached");
        Ok(report)
    }

    /// Rendered artifact plus rule-based advice for the latest cached
    /// analysis of `conversation_id`.
    pub async fn report(
        &self,
        conversation_id: &ConversationId,
        user_id: UserId,
    ) -> Result<FullReport> {
        let analysis = self
            .cached(conversation_id)
            .await
            .ok_or_else(|| CoreError::ReportNotFound(conversation_id.clone()))?;
        let recommendations = recommendations(&analysis);

        let payload = serde_json::json!({
            "user_id": user_id,
            "conversation": analysis.conversation,
            "relationships": analysis.relationships,
        });
        let panel = match timeout(self.collaborator_timeout, self.visualizer.render(&payload)).await
        {
            Ok(Ok(panel)) => panel,
            Ok(Err(err)) => return Err(CoreError::Collaborator(err.to_string())),
            Err(_) => {
                return Err(CoreError::CollaboratorTimeout(
                    self.collaborator_timeout.as_secs(),
                ))
            }
        };

        Ok(FullReport {
            analysis,
            recommendations,
            panel,
        })
    }

    pub async fn cached(&self, conversation_id: &ConversationId) -> Option<AnalysisReport> {
        let reports = self.reports.read().await;
        reports.get(conversation_id).map(|c| c.report.clone())
    }

    /// Drops cached reports older than `max_age`, returning how many went.
    pub async fn evict_reports(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut reports = self.reports.write().await;
        let before = reports.len();
        reports.retain(|_, cached| now - cached.cached_at < max_age);
        let evicted = before - reports.len();
        if evicted > 0 {
            debug!(evicted, "evicted cached reports");
        }
        evicted
    }

    async fn scored_text(&self, text: &str) -> Result<TextInsights> {
        match timeout(self.collaborator_timeout, self.analyzer.analyze(text)).await {
            Ok(Ok(insights)) => Ok(insights),
            Ok(Err(err)) => Err(CoreError::Collaborator(err.to_string())),
            Err(_) => Err(CoreError::CollaboratorTimeout(
                self.collaborator_timeout.as_secs(),
            )),
        }
    }

    async fn relationship_updates(
        &self,
        event: &MessageEvent,
        snapshot: &SessionSnapshot,
        activity: &[ParticipantActivity],
        insights: &TextInsights,
    ) -> Result<Vec<RelationshipUpdate>> {
        let mut updates = Vec::new();
        for &participant in &snapshot.participants {
            if participant == event.user_id {
                continue;
            }
            self.profiles
                .open_relation(event.user_id, participant, "conversation")
                .await;
            let prior = self.profiles.relation(event.user_id, participant).await?;
            let signal = derive_signal(event, insights, activity, prior.avg_sentiment);

            let metrics = self.graph.track(event.user_id, participant, &signal).await;
            let record = self
                .profiles
                .update_relation(event.user_id, participant, &signal)
                .await?;

            updates.push(RelationshipUpdate {
                with_user: participant,
                trust_score: record.trust_score,
                avg_sentiment: record.avg_sentiment,
                communication_quality: trust::communication_quality(&signal),
                metrics,
            });
        }
        Ok(updates)
    }

    async fn cache_report(&self, report: AnalysisReport) {
        let mut reports = self.reports.write().await;
        reports.insert(
            report.conversation_id.clone(),
            CachedReport {
                report,
                cached_at: Utc::now(),
            },
        );
        while reports.len() > self.cache_cap {
            let oldest = reports
                .iter()
                .min_by_key(|(_, cached)| cached.cached_at)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    reports.remove(&id);
                }
                None => break,
            }
        }
    }
}

fn conversation_report(
    snapshot: &SessionSnapshot,
    activity: &[ParticipantActivity],
) -> ConversationMetricsReport {
    let lengths: Vec<f64> = snapshot
        .messages
        .iter()
        .map(|m| m.text.chars().count() as f64)
        .collect();
    let duration =
        (snapshot.last_update - snapshot.start_time).num_milliseconds() as f64 / 1000.0;
    let count = snapshot.messages.len();

    ConversationMetricsReport {
        message_count: count,
        participant_count: snapshot.participants.len(),
        avg_message_length: stats::mean(&lengths),
        duration_seconds: duration,
        messages_per_minute: if duration > 0.0 {
            count as f64 / (duration / 60.0)
        } else {
            0.0
        },
        participants: activity.to_vec(),
    }
}

/// Builds the interaction signal for one sender from the scored text and
/// the session's activity figures.
fn derive_signal(
    event: &MessageEvent,
    insights: &TextInsights,
    activity: &[ParticipantActivity],
    prior_avg_sentiment: f64,
) -> InteractionSignal {
    let sender = activity.iter().find(|a| a.user_id == event.user_id);
    let engagement = sender.map(|a| a.share).unwrap_or(0.0);
    let response_time = sender.map(|a| a.avg_response_seconds).unwrap_or(0.0);
    let sentiment = insights.signed_sentiment();

    InteractionSignal {
        sentiment,
        engagement,
        response_time,
        response_time_score: (1.0 - response_time / 60.0).clamp(0.0, 1.0),
        sentiment_consistency: 1.0 - (sentiment - prior_avg_sentiment).abs() / 2.0,
        engagement_level: engagement,
        message_clarity: insights.lexical.lexical_diversity,
        response_relevance: insights.sentiment.score,
        emotional_alignment: (1.0 - insights.toxicity).clamp(0.0, 1.0),
        kind: event.kind.clone(),
        at: Some(event.at),
    }
}

fn recommendations(analysis: &AnalysisReport) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();
    if analysis.conversation.avg_message_length < 10.0 {
        recommendations.push(Recommendation {
            category: "communication".to_string(),
            participant_id: None,
            suggestion: "Try to provide more detailed responses".to_string(),
            reason: "Short messages may limit effective communication".to_string(),
        });
    }
    for relationship in &analysis.relationships {
        if relationship.trust_score < 0.5 {
            recommendations.push(Recommendation {
                category: "relationship".to_string(),
                participant_id: Some(relationship.with_user),
                suggestion: "Focus on building trust through consistent communication"
                    .to_string(),
                reason: "Trust levels could be improved".to_string(),
            });
        }
    }
    recommendations
}
