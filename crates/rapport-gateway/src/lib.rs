use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{bail, Result};
use chrono::Duration;
use rapport_bus::BusPublisher;
use rapport_core::{
    AnalysisOrchestrator, AnalysisReport, AssessmentEngine, AssessmentReport, CoreConfig,
    FullReport, NextQuestion, PersonalityEngine, PersonalityItem, PersonalityProgress,
    ProfileBook, ScoreOutcome, SessionTracker,
};
use rapport_schema::{BusMessage, ConversationId, MessageEvent, UserId};
use rapport_store::{ProfileRecord, SnapshotStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    pub sessions_evicted: usize,
    pub reports_evicted: usize,
}

/// Ingestion boundary over the analysis core. Owns the persistence hook:
/// every state transition that must survive a restart is written through
/// the attached store, and `restore` replays it on startup.
pub struct Gateway {
    sessions: Arc<SessionTracker>,
    orchestrator: Arc<AnalysisOrchestrator>,
    profiles: Arc<ProfileBook>,
    assessments: Arc<AssessmentEngine>,
    personality: Arc<PersonalityEngine>,
    store: Option<SnapshotStore>,
    bus: BusPublisher,
    config: CoreConfig,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionTracker>,
        orchestrator: Arc<AnalysisOrchestrator>,
        profiles: Arc<ProfileBook>,
        assessments: Arc<AssessmentEngine>,
        personality: Arc<PersonalityEngine>,
        store: Option<SnapshotStore>,
        bus: BusPublisher,
        config: CoreConfig,
    ) -> Self {
        Self {
            sessions,
            orchestrator,
            profiles,
            assessments,
            personality,
            store,
            bus,
            config,
        }
    }

    pub async fn ingest_message(&self, event: MessageEvent) -> Result<AnalysisReport> {
        if event.text.trim().is_empty() {
            bail!("empty message text");
        }

        let trace_id = event.trace_id;
        let conversation_id = event.conversation_id.clone();

        let _ = self
            .bus
            .publish(BusMessage::MessageAccepted {
                trace_id,
                conversation_id: conversation_id.clone(),
            })
            .await;

        let report = match self.orchestrator.ingest(event).await {
            Ok(report) => report,
            Err(err) => {
                let _ = self
                    .bus
                    .publish(BusMessage::AnalysisFailed {
                        trace_id,
                        conversation_id,
                        error: err.to_string(),
                    })
                    .await;
                return Err(err.into());
            }
        };

        self.persist_conversation(&report).await?;
        Ok(report)
    }

    pub async fn next_question(&self, user: UserId) -> NextQuestion {
        self.assessments.next_question(user).await
    }

    pub async fn submit_answer(
        &self,
        user: UserId,
        question_id: &str,
        answer: &str,
        response_seconds: f64,
    ) -> Result<ScoreOutcome> {
        let outcome = self
            .assessments
            .score_response(user, question_id, answer, response_seconds)
            .await?;

        if let Some(store) = &self.store {
            if let Some(state) = self.assessments.snapshot(user).await {
                store.upsert_assessment(state).await?;
            }
        }

        if outcome.completed {
            let report = self.assessments.final_score(user).await?;
            self.profiles.record_iq(user, report.iq_score).await;
            self.persist_profile(user).await?;
            let _ = self
                .bus
                .publish(BusMessage::AssessmentCompleted {
                    user_id: user,
                    iq_score: report.iq_score,
                    percentile: report.percentile,
                })
                .await;
            info!(user = %user, iq = report.iq_score, "assessment completed");
        }

        Ok(outcome)
    }

    pub async fn assessment_report(&self, user: UserId) -> Result<AssessmentReport> {
        Ok(self.assessments.final_score(user).await?)
    }

    pub async fn next_personality_item(&self, user: UserId) -> Option<PersonalityItem> {
        self.personality.next_item(user).await
    }

    pub async fn submit_personality_rating(
        &self,
        user: UserId,
        item_id: &str,
        rating: u8,
    ) -> Result<PersonalityProgress> {
        let progress = self.personality.record_rating(user, item_id, rating).await?;

        if let Some(traits) = &progress.traits {
            self.profiles.record_traits(user, traits.clone()).await;
            self.persist_profile(user).await?;
            let _ = self
                .bus
                .publish(BusMessage::PersonalityCompleted { user_id: user })
                .await;
            info!(user = %user, "personality inventory completed");
        }

        Ok(progress)
    }

    pub async fn report(&self, conversation: &ConversationId, user: UserId) -> Result<FullReport> {
        Ok(self.orchestrator.report(conversation, user).await?)
    }

    /// Replays persisted state into the in-memory core. Call once on
    /// startup, before ingestion begins.
    pub async fn restore(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let snapshots = store.load_sessions().await?;
        let sessions = snapshots.len();
        for snapshot in snapshots {
            self.sessions.restore(snapshot).await;
        }

        let records = store.load_relationships().await?;
        let relationships = records.len();
        for record in records {
            self.profiles.restore_relation(record).await;
        }

        let rows = store.load_profiles().await?;
        let profiles = rows.len();
        for row in rows {
            self.profiles
                .restore_profile(row.user_id, row.iq_score, row.assessment_completed, row.big_five)
                .await;
        }

        let states = store.load_assessments().await?;
        let assessments = states.len();
        for state in states {
            self.assessments.restore(state).await;
        }

        info!(sessions, relationships, profiles, assessments, "state restored");
        Ok(())
    }

    /// One TTL pass over sessions and the report cache. Swept sessions are
    /// also removed from the store so a later replay does not resurrect
    /// them.
    pub async fn sweep(&self) -> SweepOutcome {
        let session_ttl = Duration::seconds(self.config.session_ttl_secs as i64);
        let report_ttl = Duration::seconds(self.config.report_ttl_secs as i64);

        let evicted = self.sessions.evict(session_ttl).await;
        let reports_evicted = self.orchestrator.evict_reports(report_ttl).await;

        if let Some(store) = &self.store {
            for id in &evicted {
                if let Err(err) = store.delete_session(id).await {
                    warn!(conversation = %id, error = %err, "failed to drop swept session");
                }
            }
        }

        let outcome = SweepOutcome {
            sessions_evicted: evicted.len(),
            reports_evicted,
        };
        if outcome.sessions_evicted > 0 || outcome.reports_evicted > 0 {
            let _ = self
                .bus
                .publish(BusMessage::MaintenanceSwept {
                    sessions_evicted: outcome.sessions_evicted,
                    reports_evicted: outcome.reports_evicted,
                })
                .await;
            info!(
                sessions = outcome.sessions_evicted,
                reports = outcome.reports_evicted,
                "maintenance sweep"
            );
        }
        outcome
    }

    async fn persist_conversation(&self, report: &AnalysisReport) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let snapshot = self.sessions.snapshot(&report.conversation_id).await?;
        store.upsert_session(snapshot).await?;

        for update in &report.relationships {
            let record = self.profiles.relation(report.user_id, update.with_user).await?;
            store.upsert_relationship(record).await?;
        }
        Ok(())
    }

    async fn persist_profile(&self, user: UserId) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let profile = self.profiles.profile(user).await?;
        store
            .upsert_profile(ProfileRecord {
                user_id: profile.user_id,
                iq_score: profile.iq_score,
                assessment_completed: profile.assessment_completed,
                big_five: profile.big_five,
                updated_at: profile.updated_at,
            })
            .await?;
        Ok(())
    }
}

pub fn spawn_maintenance(
    gateway: Arc<Gateway>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = StdDuration::from_secs(gateway.config.sweep_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        // The first tick fires immediately; consume it so sweeps start one
        // full period after spawn.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    gateway.sweep().await;
                }
                _ = shutdown.cancelled() => {
                    debug!("maintenance loop stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rapport_bus::{EventBus, Topic};
    use rapport_core::{InteractionGraph, QuestionBank};
    use rapport_provider::{StubTextAnalyzer, StubVisualizer, TextAnalyzer, Visualizer};
    use tokio::time::{timeout, Duration as TokioDuration};
    use uuid::Uuid;

    struct Parts {
        gateway: Arc<Gateway>,
        bus: Arc<EventBus>,
        store: SnapshotStore,
        sessions: Arc<SessionTracker>,
        profiles: Arc<ProfileBook>,
    }

    fn make_parts(config: CoreConfig) -> Parts {
        let bus = Arc::new(EventBus::new(config.bus_capacity));
        let publisher = bus.publisher();
        let sessions = Arc::new(SessionTracker::new());
        let graph = Arc::new(InteractionGraph::new(config.metrics_window_days));
        let profiles = Arc::new(ProfileBook::new());
        let analyzer: Arc<dyn TextAnalyzer> = Arc::new(StubTextAnalyzer);
        let visualizer: Arc<dyn Visualizer> = Arc::new(StubVisualizer);
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            Arc::clone(&sessions),
            graph,
            Arc::clone(&profiles),
            analyzer,
            visualizer,
            publisher.clone(),
            &config,
        ));
        let assessments = Arc::new(AssessmentEngine::with_seed(
            QuestionBank::builtin(),
            config.assessment.clone(),
            7,
        ));
        let personality = Arc::new(PersonalityEngine::with_builtin_items());
        let store = SnapshotStore::open_in_memory().expect("store");
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&sessions),
            orchestrator,
            Arc::clone(&profiles),
            assessments,
            personality,
            Some(store.clone()),
            publisher,
            config,
        ));
        Parts {
            gateway,
            bus,
            store,
            sessions,
            profiles,
        }
    }

    fn wide_config() -> CoreConfig {
        let mut config = CoreConfig::default();
        config.assessment.band_width = 1.0;
        config
    }

    fn event_at(
        conversation: &str,
        user: i64,
        text: &str,
        at: chrono::DateTime<Utc>,
    ) -> MessageEvent {
        MessageEvent {
            trace_id: Uuid::new_v4(),
            conversation_id: ConversationId(conversation.to_string()),
            user_id: UserId(user),
            text: text.to_string(),
            at,
            kind: "text".to_string(),
        }
    }

    fn event(conversation: &str, user: i64, text: &str) -> MessageEvent {
        event_at(conversation, user, text, Utc::now())
    }

    #[tokio::test]
    async fn ingest_rejects_blank_text() {
        let parts = make_parts(CoreConfig::default());
        let mut accepted = parts.bus.subscribe(Topic::MessageAccepted).await;

        let result = parts.gateway.ingest_message(event("chat:1", 1, "   ")).await;
        assert!(result.is_err());

        let silent = timeout(TokioDuration::from_millis(50), accepted.recv()).await;
        assert!(silent.is_err());
    }

    #[tokio::test]
    async fn ingest_publishes_accepted_and_persists() {
        let parts = make_parts(CoreConfig::default());
        let mut accepted = parts.bus.subscribe(Topic::MessageAccepted).await;

        parts
            .gateway
            .ingest_message(event("chat:1", 1, "morning all"))
            .await
            .expect("first ingest");
        let report = parts
            .gateway
            .ingest_message(event("chat:1", 2, "hey, how is the rollout going?"))
            .await
            .expect("second ingest");

        assert_eq!(report.relationships.len(), 1);
        assert_eq!(report.relationships[0].with_user, UserId(1));

        let got = timeout(TokioDuration::from_millis(100), accepted.recv())
            .await
            .expect("accepted event")
            .expect("open channel");
        assert!(matches!(got, BusMessage::MessageAccepted { .. }));

        let sessions = parts.store.load_sessions().await.expect("sessions");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].messages.len(), 2);

        let relationships = parts.store.load_relationships().await.expect("relationships");
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].owner, UserId(2));
        assert_eq!(relationships[0].related, UserId(1));
    }

    #[tokio::test]
    async fn report_passthrough_served_from_cache() {
        let parts = make_parts(CoreConfig::default());
        parts
            .gateway
            .ingest_message(event("chat:7", 1, "summary please"))
            .await
            .expect("ingest");

        let full = parts
            .gateway
            .report(&ConversationId("chat:7".into()), UserId(1))
            .await
            .expect("report");
        assert_eq!(full.analysis.conversation.message_count, 1);
        assert!(!full.panel.data.is_empty());
    }

    #[tokio::test]
    async fn completed_assessment_lands_in_profile_and_store() {
        let parts = make_parts(wide_config());
        let mut completed = parts.bus.subscribe(Topic::AssessmentCompleted).await;
        let user = UserId(9);

        let mut answered = 0;
        while answered < 20 {
            let question = match parts.gateway.next_question(user).await {
                NextQuestion::Question(q) => q,
                NextQuestion::Exhausted => panic!("bank exhausted before completion"),
            };
            let outcome = parts
                .gateway
                .submit_answer(user, &question.id, &question.answer, 10.0)
                .await
                .expect("submit");
            answered += 1;
            assert_eq!(outcome.completed, answered == 20);
        }

        let got = timeout(TokioDuration::from_millis(100), completed.recv())
            .await
            .expect("completion event")
            .expect("open channel");
        let BusMessage::AssessmentCompleted {
            user_id,
            iq_score,
            percentile,
        } = got
        else {
            panic!("unexpected message: {got:?}");
        };
        assert_eq!(user_id, user);
        assert!(iq_score > 100.0);
        assert!(percentile > 50.0);

        let profile = parts.profiles.profile(user).await.expect("profile");
        assert!(profile.assessment_completed);
        assert!(profile.iq_score.is_some());

        let report = parts.gateway.assessment_report(user).await.expect("report");
        assert!(report.completed);
        assert_eq!(report.responses, 20);

        let states = parts.store.load_assessments().await.expect("states");
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].responses.len(), 20);

        let rows = parts.store.load_profiles().await.expect("profiles");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].assessment_completed);
    }

    #[tokio::test]
    async fn completed_personality_inventory_updates_profile() {
        let parts = make_parts(CoreConfig::default());
        let mut done = parts.bus.subscribe(Topic::PersonalityCompleted).await;
        let user = UserId(4);

        let mut last = None;
        while let Some(item) = parts.gateway.next_personality_item(user).await {
            last = Some(
                parts
                    .gateway
                    .submit_personality_rating(user, &item.id, 4)
                    .await
                    .expect("rating"),
            );
        }
        let progress = last.expect("at least one item");
        assert_eq!(progress.answered, 10);
        assert!(progress.traits.is_some());

        let got = timeout(TokioDuration::from_millis(100), done.recv())
            .await
            .expect("completion event")
            .expect("open channel");
        assert!(matches!(got, BusMessage::PersonalityCompleted { user_id } if user_id == user));

        let rows = parts.store.load_profiles().await.expect("profiles");
        assert_eq!(rows.len(), 1);
        let traits = rows[0].big_five.as_ref().expect("traits");
        // All 4s with one reverse-scored item per trait averages to 3.0.
        assert!((traits.openness - 3.0).abs() < 1e-9);
        assert!((traits.neuroticism - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sweep_clears_stale_sessions_and_reports() {
        let mut config = CoreConfig::default();
        config.report_ttl_secs = 0;
        let parts = make_parts(config);
        let mut swept = parts.bus.subscribe(Topic::MaintenanceSwept).await;

        let stale = Utc::now() - Duration::hours(25);
        parts
            .gateway
            .ingest_message(event_at("chat:old", 1, "ancient history", stale))
            .await
            .expect("ingest");

        let outcome = parts.gateway.sweep().await;
        assert_eq!(outcome.sessions_evicted, 1);
        assert_eq!(outcome.reports_evicted, 1);
        assert_eq!(parts.sessions.count().await, 0);
        assert!(parts.store.load_sessions().await.expect("sessions").is_empty());

        let got = timeout(TokioDuration::from_millis(100), swept.recv())
            .await
            .expect("sweep event")
            .expect("open channel");
        let BusMessage::MaintenanceSwept {
            sessions_evicted,
            reports_evicted,
        } = got
        else {
            panic!("unexpected message: {got:?}");
        };
        assert_eq!(sessions_evicted, 1);
        assert_eq!(reports_evicted, 1);
    }

    #[tokio::test]
    async fn sweep_leaves_fresh_state_alone() {
        let parts = make_parts(CoreConfig::default());
        parts
            .gateway
            .ingest_message(event("chat:live", 1, "still here"))
            .await
            .expect("ingest");

        let outcome = parts.gateway.sweep().await;
        assert_eq!(outcome.sessions_evicted, 0);
        assert_eq!(outcome.reports_evicted, 0);
        assert_eq!(parts.sessions.count().await, 1);
        assert_eq!(parts.store.load_sessions().await.expect("sessions").len(), 1);
    }

    #[tokio::test]
    async fn maintenance_loop_stops_on_cancel() {
        let mut config = CoreConfig::default();
        config.sweep_interval_secs = 3_600;
        let parts = make_parts(config);

        let shutdown = CancellationToken::new();
        let handle = spawn_maintenance(Arc::clone(&parts.gateway), shutdown.clone());

        shutdown.cancel();
        timeout(TokioDuration::from_millis(200), handle)
            .await
            .expect("loop exits")
            .expect("clean join");
    }

    #[tokio::test]
    async fn gateway_runs_without_attached_store() {
        let config = CoreConfig::default();
        let bus = EventBus::new(config.bus_capacity);
        let publisher = bus.publisher();
        let sessions = Arc::new(SessionTracker::new());
        let graph = Arc::new(InteractionGraph::new(config.metrics_window_days));
        let profiles = Arc::new(ProfileBook::new());
        let analyzer: Arc<dyn TextAnalyzer> = Arc::new(StubTextAnalyzer);
        let visualizer: Arc<dyn Visualizer> = Arc::new(StubVisualizer);
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            Arc::clone(&sessions),
            graph,
            Arc::clone(&profiles),
            analyzer,
            visualizer,
            publisher.clone(),
            &config,
        ));
        let assessments = Arc::new(AssessmentEngine::with_seed(
            QuestionBank::builtin(),
            config.assessment.clone(),
            3,
        ));
        let gateway = Gateway::new(
            sessions,
            orchestrator,
            profiles,
            assessments,
            Arc::new(PersonalityEngine::with_builtin_items()),
            None,
            publisher,
            config,
        );

        gateway.restore().await.expect("no-op restore");
        let report = gateway
            .ingest_message(event("chat:free", 1, "standalone mode"))
            .await
            .expect("ingest");
        assert_eq!(report.conversation.message_count, 1);
    }
}
