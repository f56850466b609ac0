use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rapport_bus::{EventBus, Topic};
use rapport_core::config::CoreConfig;
use rapport_core::graph::InteractionGraph;
use rapport_core::orchestrator::AnalysisOrchestrator;
use rapport_core::profile::ProfileBook;
use rapport_core::session::SessionTracker;
use rapport_provider::{StubTextAnalyzer, StubVisualizer};
use rapport_schema::{BusMessage, ConversationId, InteractionSignal, MessageEvent, UserId};
use uuid::Uuid;

fn event(conversation: &str, user: i64, text: &str, at: DateTime<Utc>) -> MessageEvent {
    MessageEvent {
        trace_id: Uuid::new_v4(),
        conversation_id: ConversationId(conversation.to_string()),
        user_id: UserId(user),
        text: text.to_string(),
        at,
        kind: "text".to_string(),
    }
}

fn signal(sentiment: f64) -> InteractionSignal {
    InteractionSignal {
        sentiment,
        engagement: 0.6,
        response_time: 10.0,
        ..InteractionSignal::default()
    }
}

#[tokio::test]
async fn conversation_flows_from_ingest_to_rendered_report() {
    let config = CoreConfig::default();
    let bus = EventBus::new(config.bus_capacity);
    let mut completed = bus.subscribe(Topic::AnalysisCompleted).await;

    let sessions = Arc::new(SessionTracker::new());
    let profiles = Arc::new(ProfileBook::new());
    let orchestrator = AnalysisOrchestrator::new(
        sessions.clone(),
        Arc::new(InteractionGraph::new(config.metrics_window_days)),
        profiles.clone(),
        Arc::new(StubTextAnalyzer),
        Arc::new(StubVisualizer),
        bus.publisher(),
        &config,
    );

    let t0 = Utc.with_ymd_and_hms(2025, 4, 7, 14, 0, 0).unwrap();
    let script: &[(i64, &str)] = &[
        (1, "hey, did the deployment finish?"),
        (2, "yes, all good, thanks for checking!"),
        (3, "great work everyone"),
        (1, "awesome, closing the ticket then"),
        (2, "sounds good"),
        (3, "see you tomorrow"),
    ];

    let mut last = None;
    for (i, (user, text)) in script.iter().enumerate() {
        let report = orchestrator
            .ingest(event(
                "chat:standup",
                *user,
                text,
                t0 + Duration::seconds(30 * i as i64),
            ))
            .await
            .unwrap();
        last = Some(report);
    }

    let report = last.unwrap();
    assert_eq!(report.user_id, UserId(3));
    assert_eq!(report.conversation.message_count, 6);
    assert_eq!(report.conversation.participant_count, 3);
    assert_eq!(report.relationships.len(), 2);
    for relationship in &report.relationships {
        assert!((0.0..=1.0).contains(&relationship.trust_score));
        assert!((0.0..=1.0).contains(&relationship.communication_quality));
        assert!((-1.0..=1.0).contains(&relationship.avg_sentiment));
    }

    for _ in 0..script.len() {
        assert!(matches!(
            completed.recv().await,
            Some(BusMessage::AnalysisCompleted { .. })
        ));
    }

    let full = orchestrator
        .report(&ConversationId("chat:standup".into()), UserId(3))
        .await
        .unwrap();
    assert!(!full.panel.data.is_empty());
    assert_eq!(full.analysis.conversation.message_count, 6);

    let metrics = sessions
        .metrics(&ConversationId("chat:standup".into()))
        .await
        .unwrap();
    assert_eq!(metrics.total_messages, 6);
    assert_eq!(metrics.participant_count, 3);

    let profile = profiles.profile(UserId(3)).await.unwrap();
    assert_eq!(profile.relationships.len(), 2);
}

#[tokio::test]
async fn strength_is_symmetric_for_mirrored_edges() {
    let graph = InteractionGraph::new(30);
    for _ in 0..3 {
        graph.track(UserId(1), UserId(2), &signal(0.4)).await;
        graph.track(UserId(2), UserId(1), &signal(0.4)).await;
    }

    let ab = graph.metrics(UserId(1), UserId(2)).await.unwrap();
    let ba = graph.metrics(UserId(2), UserId(1)).await.unwrap();
    assert!((ab.relationship_strength - ba.relationship_strength).abs() < 1e-12);
    // Identical mirrored edges: full balance and harmony.
    assert!((ab.relationship_strength - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn edge_sentiment_mean_matches_arithmetic_mean() {
    let graph = InteractionGraph::new(30);
    let values = [0.9, -0.2, 0.5, 0.1, 0.7];
    for value in values {
        graph.track(UserId(1), UserId(2), &signal(value)).await;
    }

    let edge = graph.edge(UserId(1), UserId(2)).await.unwrap();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    assert!((edge.avg_sentiment - mean).abs() < 1e-9);
    assert_eq!(edge.interaction_count, 5);
}

#[tokio::test]
async fn trust_stays_bounded_for_extreme_signal_sequences() {
    let profiles = ProfileBook::new();
    profiles
        .open_relation(UserId(1), UserId(2), "conversation")
        .await;

    for i in 0..500 {
        let extreme = if i % 2 == 0 { 1.0 } else { 0.0 };
        let signal = InteractionSignal {
            sentiment: if i % 2 == 0 { 1.0 } else { -1.0 },
            response_time_score: extreme,
            sentiment_consistency: extreme,
            engagement_level: extreme,
            ..InteractionSignal::default()
        };
        let record = profiles
            .update_relation(UserId(1), UserId(2), &signal)
            .await
            .unwrap();
        assert!((0.0..=1.0).contains(&record.trust_score));
        assert!((-1.0..=1.0).contains(&record.avg_sentiment));
    }
}
