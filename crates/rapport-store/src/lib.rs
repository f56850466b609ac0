pub mod migrations;

use crate::migrations::run_migrations;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rapport_core::assessment::AssessmentState;
use rapport_core::personality::BigFiveTraits;
use rapport_core::session::SessionSnapshot;
use rapport_core::trust::RelationshipRecord;
use rapport_schema::{ConversationId, UserId};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::task;

/// Profile scalars as they live in sqlite. Relationship records are kept
/// in their own table keyed by (owner, related).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub user_id: UserId,
    pub iq_score: Option<f64>,
    pub assessment_completed: bool,
    pub big_five: Option<BigFiveTraits>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SnapshotStore {
    db: Arc<Mutex<Connection>>,
}

impl SnapshotStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn upsert_session(&self, snapshot: SessionSnapshot) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let messages = serde_json::to_string(&snapshot.messages)?;
            let participants = serde_json::to_string(&snapshot.participants)?;
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO sessions (conversation_id, messages, participants, start_time, last_update)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(conversation_id) DO UPDATE SET
                    messages = excluded.messages,
                    participants = excluded.participants,
                    start_time = excluded.start_time,
                    last_update = excluded.last_update
                "#,
                params![
                    snapshot.conversation_id.0,
                    messages,
                    participants,
                    snapshot.start_time.to_rfc3339(),
                    snapshot.last_update.to_rfc3339(),
                ],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    pub async fn load_sessions(&self) -> Result<Vec<SessionSnapshot>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT conversation_id, messages, participants, start_time, last_update
                FROM sessions
                ORDER BY last_update DESC
                "#,
            )?;
            let rows = stmt.query_map([], row_to_snapshot)?;
            let mut snapshots = Vec::new();
            for row in rows {
                snapshots.push(row?);
            }
            Ok::<Vec<SessionSnapshot>, anyhow::Error>(snapshots)
        })
        .await?
    }

    pub async fn delete_session(&self, conversation: &ConversationId) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let key = conversation.0.clone();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let deleted = conn.execute(
                "DELETE FROM sessions WHERE conversation_id = ?1",
                params![key],
            )?;
            Ok::<bool, anyhow::Error>(deleted > 0)
        })
        .await?
    }

    pub async fn upsert_relationship(&self, record: RelationshipRecord) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO relationships (
                    owner, related, relation_type, trust_score, avg_sentiment,
                    conversation_count, last_interaction
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(owner, related) DO UPDATE SET
                    relation_type = excluded.relation_type,
                    trust_score = excluded.trust_score,
                    avg_sentiment = excluded.avg_sentiment,
                    conversation_count = excluded.conversation_count,
                    last_interaction = excluded.last_interaction
                "#,
                params![
                    record.owner.0,
                    record.related.0,
                    record.relation_type,
                    record.trust_score,
                    record.avg_sentiment,
                    record.conversation_count as i64,
                    record.last_interaction.map(|at| at.to_rfc3339()),
                ],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    pub async fn load_relationships(&self) -> Result<Vec<RelationshipRecord>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT owner, related, relation_type, trust_score, avg_sentiment,
                       conversation_count, last_interaction
                FROM relationships
                ORDER BY owner, related
                "#,
            )?;
            let rows = stmt.query_map([], row_to_relationship)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok::<Vec<RelationshipRecord>, anyhow::Error>(records)
        })
        .await?
    }

    pub async fn upsert_profile(&self, record: ProfileRecord) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let big_five = match &record.big_five {
                Some(traits) => Some(serde_json::to_string(traits)?),
                None => None,
            };
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO profiles (user_id, iq_score, assessment_completed, big_five, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(user_id) DO UPDATE SET
                    iq_score = excluded.iq_score,
                    assessment_completed = excluded.assessment_completed,
                    big_five = excluded.big_five,
                    updated_at = excluded.updated_at
                "#,
                params![
                    record.user_id.0,
                    record.iq_score,
                    record.assessment_completed,
                    big_five,
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    pub async fn load_profiles(&self) -> Result<Vec<ProfileRecord>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT user_id, iq_score, assessment_completed, big_five, updated_at
                FROM profiles
                ORDER BY user_id
                "#,
            )?;
            let rows = stmt.query_map([], row_to_profile)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok::<Vec<ProfileRecord>, anyhow::Error>(records)
        })
        .await?
    }

    pub async fn upsert_assessment(&self, state: AssessmentState) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let payload = serde_json::to_string(&state)?;
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO assessments (user_id, state, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(user_id) DO UPDATE SET
                    state = excluded.state,
                    updated_at = excluded.updated_at
                "#,
                params![state.user_id.0, payload, Utc::now().to_rfc3339()],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    pub async fn load_assessments(&self) -> Result<Vec<AssessmentState>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare("SELECT state FROM assessments ORDER BY user_id")?;
            let rows = stmt.query_map([], |row| {
                let raw: String = row.get(0)?;
                parse_json_sql::<AssessmentState>(&raw)
            })?;
            let mut states = Vec::new();
            for row in rows {
                states.push(row?);
            }
            Ok::<Vec<AssessmentState>, anyhow::Error>(states)
        })
        .await?
    }
}

fn parse_datetime_sql(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json_sql<T: serde::de::DeserializeOwned>(raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<SessionSnapshot> {
    let messages_raw: String = row.get(1)?;
    let participants_raw: String = row.get(2)?;
    let start_time_raw: String = row.get(3)?;
    let last_update_raw: String = row.get(4)?;

    Ok(SessionSnapshot {
        conversation_id: ConversationId(row.get(0)?),
        messages: parse_json_sql(&messages_raw)?,
        participants: parse_json_sql(&participants_raw)?,
        start_time: parse_datetime_sql(&start_time_raw)?,
        last_update: parse_datetime_sql(&last_update_raw)?,
    })
}

fn row_to_relationship(row: &Row<'_>) -> rusqlite::Result<RelationshipRecord> {
    let count: i64 = row.get(5)?;
    let last_interaction_raw: Option<String> = row.get(6)?;
    let last_interaction = match last_interaction_raw {
        Some(raw) => Some(parse_datetime_sql(&raw)?),
        None => None,
    };

    Ok(RelationshipRecord {
        owner: UserId(row.get(0)?),
        related: UserId(row.get(1)?),
        relation_type: row.get(2)?,
        trust_score: row.get(3)?,
        avg_sentiment: row.get(4)?,
        conversation_count: count as u64,
        last_interaction,
    })
}

fn row_to_profile(row: &Row<'_>) -> rusqlite::Result<ProfileRecord> {
    let big_five_raw: Option<String> = row.get(3)?;
    let big_five = match big_five_raw {
        Some(raw) => Some(parse_json_sql(&raw)?),
        None => None,
    };
    let updated_at_raw: String = row.get(4)?;

    Ok(ProfileRecord {
        user_id: UserId(row.get(0)?),
        iq_score: row.get(1)?,
        assessment_completed: row.get(2)?,
        big_five,
        updated_at: parse_datetime_sql(&updated_at_raw)?,
    })
}
