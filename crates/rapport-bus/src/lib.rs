use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use rapport_schema::BusMessage;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum Topic {
    MessageAccepted,
    AnalysisCompleted,
    AnalysisFailed,
    AssessmentCompleted,
    PersonalityCompleted,
    MaintenanceSwept,
}

impl Topic {
    pub fn from_message(msg: &BusMessage) -> Self {
        match msg {
            BusMessage::MessageAccepted { .. } => Topic::MessageAccepted,
            BusMessage::AnalysisCompleted { .. } => Topic::AnalysisCompleted,
            BusMessage::AnalysisFailed { .. } => Topic::AnalysisFailed,
            BusMessage::AssessmentCompleted { .. } => Topic::AssessmentCompleted,
            BusMessage::PersonalityCompleted { .. } => Topic::PersonalityCompleted,
            BusMessage::MaintenanceSwept { .. } => Topic::MaintenanceSwept,
        }
    }
}

type Subscriber = mpsc::Sender<BusMessage>;

pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        subs.entry(topic).or_default().push(tx);
        rx
    }

    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        let topic = Topic::from_message(&msg);
        let subs = self.subscribers.read().await;
        if let Some(subscribers) = subs.get(&topic) {
            for tx in subscribers {
                let _ = tx.try_send(msg.clone());
            }
        }
        Ok(())
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            subscribers: self.subscribers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BusPublisher {
    subscribers: Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>,
}

impl BusPublisher {
    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        let topic = Topic::from_message(&msg);
        let subs = self.subscribers.read().await;
        if let Some(subscribers) = subs.get(&topic) {
            for tx in subscribers {
                let _ = tx.try_send(msg.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapport_schema::{ConversationId, UserId};
    use tokio::time::{timeout, Duration};
    use uuid::Uuid;

    fn analysis_completed_message() -> BusMessage {
        BusMessage::AnalysisCompleted {
            trace_id: Uuid::new_v4(),
            conversation_id: ConversationId("chat:123".to_string()),
            user_id: UserId(456),
        }
    }

    #[tokio::test]
    async fn publish_to_no_subscribers_succeeds() {
        let bus = EventBus::new(8);
        let msg = BusMessage::MessageAccepted {
            trace_id: Uuid::new_v4(),
            conversation_id: ConversationId("chat:1".into()),
        };

        let result = bus.publish(msg).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(Topic::AnalysisCompleted).await;

        bus.publish(analysis_completed_message()).await.unwrap();

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received, BusMessage::AnalysisCompleted { .. }));
    }

    #[tokio::test]
    async fn multiple_subscribers_same_topic() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe(Topic::AnalysisCompleted).await;
        let mut rx2 = bus.subscribe(Topic::AnalysisCompleted).await;

        bus.publish(analysis_completed_message()).await.unwrap();

        let got1 = timeout(Duration::from_millis(100), rx1.recv())
            .await
            .unwrap()
            .unwrap();
        let got2 = timeout(Duration::from_millis(100), rx2.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(got1, BusMessage::AnalysisCompleted { .. }));
        assert!(matches!(got2, BusMessage::AnalysisCompleted { .. }));
    }

    #[tokio::test]
    async fn different_topics_no_crosstalk() {
        let bus = EventBus::new(8);
        let mut completed_rx = bus.subscribe(Topic::AnalysisCompleted).await;

        let msg = BusMessage::AnalysisFailed {
            trace_id: Uuid::new_v4(),
            conversation_id: ConversationId("chat:1".into()),
            error: "test".into(),
        };
        bus.publish(msg).await.unwrap();

        let received = timeout(Duration::from_millis(100), completed_rx.recv()).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn bus_publisher_clone_works() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(Topic::AnalysisCompleted).await;
        let publisher = bus.publisher();
        let publisher_clone = publisher.clone();

        publisher_clone
            .publish(analysis_completed_message())
            .await
            .unwrap();

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received, BusMessage::AnalysisCompleted { .. }));
    }

    #[tokio::test]
    async fn channel_backpressure_drops_when_full() {
        let bus = EventBus::new(1);
        let mut rx = bus.subscribe(Topic::AnalysisCompleted).await;

        bus.publish(analysis_completed_message()).await.unwrap();
        bus.publish(analysis_completed_message()).await.unwrap();

        let first = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(first.is_ok());

        let second = timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn topic_from_message_covers_all_variants() {
        let trace_id = Uuid::new_v4();
        let conversation_id = ConversationId("chat:1".to_string());

        let cases: Vec<(BusMessage, Topic)> = vec![
            (
                BusMessage::MessageAccepted {
                    trace_id,
                    conversation_id: conversation_id.clone(),
                },
                Topic::MessageAccepted,
            ),
            (
                BusMessage::AnalysisCompleted {
                    trace_id,
                    conversation_id: conversation_id.clone(),
                    user_id: UserId(1),
                },
                Topic::AnalysisCompleted,
            ),
            (
                BusMessage::AnalysisFailed {
                    trace_id,
                    conversation_id,
                    error: "e".into(),
                },
                Topic::AnalysisFailed,
            ),
            (
                BusMessage::AssessmentCompleted {
                    user_id: UserId(1),
                    iq_score: 100.0,
                    percentile: 50.0,
                },
                Topic::AssessmentCompleted,
            ),
            (
                BusMessage::PersonalityCompleted { user_id: UserId(1) },
                Topic::PersonalityCompleted,
            ),
            (
                BusMessage::MaintenanceSwept {
                    sessions_evicted: 0,
                    reports_evicted: 0,
                },
                Topic::MaintenanceSwept,
            ),
        ];

        for (msg, expected_topic) in cases {
            assert_eq!(Topic::from_message(&msg), expected_topic);
        }
    }
}
