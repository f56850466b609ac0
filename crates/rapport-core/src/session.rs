use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rapport_schema::{ConversationId, MessageEvent, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{CoreError, Result};

/// Point-in-time copy of one session, also the persistence exchange shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub conversation_id: ConversationId,
    pub messages: Vec<MessageEvent>,
    pub participants: Vec<UserId>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub conversation_id: ConversationId,
    pub participant_count: usize,
    pub message_count: usize,
    pub duration_seconds: f64,
    pub active_participants: Vec<UserId>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantCount {
    pub user_id: UserId,
    pub messages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub total_messages: usize,
    pub participant_count: usize,
    pub average_messages_per_participant: f64,
    pub messages_per_minute: f64,
    pub duration_seconds: f64,
    pub per_participant: Vec<ParticipantCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub summary: SessionSummary,
    pub messages: Vec<MessageEvent>,
    pub metrics: SessionMetrics,
}

/// Per-participant activity figures over one message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantActivity {
    pub user_id: UserId,
    pub messages: usize,
    /// Fraction of the session's messages sent by this participant.
    pub share: f64,
    /// Mean seconds to reply after a different sender. 0 when the
    /// participant never replied.
    pub avg_response_seconds: f64,
}

/// Message share and reply latency per participant, sorted by user id.
/// Shared by the conversation-metrics task and signal derivation.
pub fn participant_activity(messages: &[MessageEvent]) -> Vec<ParticipantActivity> {
    let total = messages.len();
    let mut counts: HashMap<UserId, usize> = HashMap::new();
    let mut gaps: HashMap<UserId, Vec<f64>> = HashMap::new();

    for message in messages {
        *counts.entry(message.user_id).or_default() += 1;
    }
    for pair in messages.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if prev.user_id != cur.user_id {
            let gap = (cur.at - prev.at).num_milliseconds() as f64 / 1000.0;
            gaps.entry(cur.user_id).or_default().push(gap.max(0.0));
        }
    }

    let mut activity: Vec<ParticipantActivity> = counts
        .into_iter()
        .map(|(user_id, messages)| {
            let replies = gaps.get(&user_id).map(Vec::as_slice).unwrap_or(&[]);
            ParticipantActivity {
                user_id,
                messages,
                share: if total == 0 {
                    0.0
                } else {
                    messages as f64 / total as f64
                },
                avg_response_seconds: crate::stats::mean(replies),
            }
        })
        .collect();
    activity.sort_by_key(|a| a.user_id);
    activity
}

#[derive(Debug)]
struct SessionState {
    messages: Vec<MessageEvent>,
    participants: HashSet<UserId>,
    start_time: DateTime<Utc>,
    last_update: DateTime<Utc>,
}

impl SessionState {
    fn new(first: &MessageEvent) -> Self {
        Self {
            messages: Vec::new(),
            participants: HashSet::new(),
            start_time: first.at,
            last_update: first.at,
        }
    }

    fn push(&mut self, event: MessageEvent) {
        self.participants.insert(event.user_id);
        if event.at > self.last_update {
            self.last_update = event.at;
        }
        if event.at < self.start_time {
            self.start_time = event.at;
        }
        self.messages.push(event);
    }

    fn snapshot(&self, id: &ConversationId) -> SessionSnapshot {
        let mut participants: Vec<UserId> = self.participants.iter().copied().collect();
        participants.sort();
        SessionSnapshot {
            conversation_id: id.clone(),
            messages: self.messages.clone(),
            participants,
            start_time: self.start_time,
            last_update: self.last_update,
        }
    }

    fn duration_seconds(&self) -> f64 {
        (self.last_update - self.start_time).num_milliseconds() as f64 / 1000.0
    }

    fn metrics(&self) -> SessionMetrics {
        let total = self.messages.len();
        let participant_count = self.participants.len();
        let duration = self.duration_seconds();

        let mut counts: HashMap<UserId, usize> = HashMap::new();
        for message in &self.messages {
            *counts.entry(message.user_id).or_default() += 1;
        }
        let mut per_participant: Vec<ParticipantCount> = counts
            .into_iter()
            .map(|(user_id, messages)| ParticipantCount { user_id, messages })
            .collect();
        per_participant.sort_by_key(|c| c.user_id);

        SessionMetrics {
            total_messages: total,
            participant_count,
            average_messages_per_participant: if participant_count == 0 {
                0.0
            } else {
                total as f64 / participant_count as f64
            },
            messages_per_minute: if duration > 0.0 {
                total as f64 / (duration / 60.0)
            } else {
                0.0
            },
            duration_seconds: duration,
            per_participant,
        }
    }
}

/// Keyed store of live sessions. Each session sits behind its own lock so
/// traffic on one conversation never stalls another.
pub struct SessionTracker {
    sessions: RwLock<HashMap<ConversationId, Arc<Mutex<SessionState>>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Appends one message, creating the session on first sight.
    /// Timestamps come from the event, not the wall clock.
    pub async fn record(&self, event: MessageEvent) {
        let slot = {
            let sessions = self.sessions.read().await;
            sessions.get(&event.conversation_id).cloned()
        };
        let slot = match slot {
            Some(slot) => slot,
            None => {
                let mut sessions = self.sessions.write().await;
                sessions
                    .entry(event.conversation_id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(SessionState::new(&event))))
                    .clone()
            }
        };
        let mut state = slot.lock().await;
        state.push(event);
    }

    async fn with_state<T>(
        &self,
        id: &ConversationId,
        f: impl FnOnce(&SessionState) -> T,
    ) -> Result<T> {
        let slot = {
            let sessions = self.sessions.read().await;
            sessions.get(id).cloned()
        };
        match slot {
            Some(slot) => {
                let state = slot.lock().await;
                Ok(f(&state))
            }
            None => Err(CoreError::SessionNotFound(id.clone())),
        }
    }

    pub async fn snapshot(&self, id: &ConversationId) -> Result<SessionSnapshot> {
        self.with_state(id, |state| state.snapshot(id)).await
    }

    pub async fn summary(&self, id: &ConversationId) -> Result<SessionSummary> {
        self.with_state(id, |state| {
            let mut active: Vec<UserId> = state.participants.iter().copied().collect();
            active.sort();
            SessionSummary {
                conversation_id: id.clone(),
                participant_count: state.participants.len(),
                message_count: state.messages.len(),
                duration_seconds: state.duration_seconds(),
                active_participants: active,
                start_time: state.start_time,
                last_update: state.last_update,
            }
        })
        .await
    }

    pub async fn metrics(&self, id: &ConversationId) -> Result<SessionMetrics> {
        self.with_state(id, |state| state.metrics()).await
    }

    pub async fn export(&self, id: &ConversationId) -> Result<SessionExport> {
        let summary = self.summary(id).await?;
        self.with_state(id, |state| SessionExport {
            summary,
            messages: state.messages.clone(),
            metrics: state.metrics(),
        })
        .await
    }

    pub async fn active(&self) -> Vec<ConversationId> {
        let sessions = self.sessions.read().await;
        sessions.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Removes sessions whose last update is older than `max_age` and
    /// returns their ids. Expired ids are collected under a read lock first;
    /// removal re-checks each entry and skips sessions that are busy or
    /// freshly touched.
    pub async fn evict(&self, max_age: Duration) -> Vec<ConversationId> {
        let now = Utc::now();
        let mut expired: Vec<ConversationId> = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, slot) in sessions.iter() {
                let state = slot.lock().await;
                if now - state.last_update >= max_age {
                    expired.push(id.clone());
                }
            }
        }
        if expired.is_empty() {
            return Vec::new();
        }

        let mut evicted = Vec::new();
        let mut sessions = self.sessions.write().await;
        for id in expired {
            if let Some(slot) = sessions.get(&id).cloned() {
                match slot.try_lock() {
                    Ok(state) => {
                        if now - state.last_update >= max_age {
                            drop(state);
                            sessions.remove(&id);
                            evicted.push(id);
                        }
                    }
                    Err(_) => {
                        // A record is in flight; leave it for the next sweep.
                    }
                }
            }
        }
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "evicted idle sessions");
        }
        evicted
    }

    /// Rehydrates one session from a persisted snapshot. Existing state for
    /// the same conversation is replaced.
    pub async fn restore(&self, snapshot: SessionSnapshot) {
        let state = SessionState {
            participants: snapshot.participants.iter().copied().collect(),
            start_time: snapshot.start_time,
            last_update: snapshot.last_update,
            messages: snapshot.messages,
        };
        let mut sessions = self.sessions.write().await;
        sessions.insert(snapshot.conversation_id, Arc::new(Mutex::new(state)));
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}
