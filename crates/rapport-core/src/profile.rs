use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rapport_schema::{InteractionSignal, UserId};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::personality::BigFiveTraits;
use crate::trust::{self, RelationshipRecord};

/// Per-user profile: assessment results plus the relationship records this
/// user owns toward others.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: UserId,
    /// None until the first completed assessment; later assessments fold
    /// in at 80/20.
    pub iq_score: Option<f64>,
    pub assessment_completed: bool,
    pub big_five: Option<BigFiveTraits>,
    pub relationships: HashMap<UserId, RelationshipRecord>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            iq_score: None,
            assessment_completed: false,
            big_five: None,
            relationships: HashMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Keyed store of profiles, one lock per user.
pub struct ProfileBook {
    profiles: RwLock<HashMap<UserId, Arc<Mutex<UserProfile>>>>,
}

impl ProfileBook {
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, user: UserId) -> Arc<Mutex<UserProfile>> {
        {
            let profiles = self.profiles.read().await;
            if let Some(slot) = profiles.get(&user) {
                return slot.clone();
            }
        }
        let mut profiles = self.profiles.write().await;
        profiles
            .entry(user)
            .or_insert_with(|| Arc::new(Mutex::new(UserProfile::new(user))))
            .clone()
    }

    /// Opens a relationship record if it does not exist yet. The record
    /// starts at the neutral trust prior.
    pub async fn open_relation(&self, owner: UserId, related: UserId, relation_type: &str) {
        let slot = self.slot(owner).await;
        let mut profile = slot.lock().await;
        profile
            .relationships
            .entry(related)
            .or_insert_with(|| RelationshipRecord::new(owner, related, relation_type));
    }

    /// Applies one interaction signal to an existing record and returns the
    /// updated copy.
    pub async fn update_relation(
        &self,
        owner: UserId,
        related: UserId,
        signal: &InteractionSignal,
    ) -> Result<RelationshipRecord> {
        let slot = self.slot(owner).await;
        let mut profile = slot.lock().await;
        let record = profile
            .relationships
            .get_mut(&related)
            .ok_or(CoreError::RelationNotFound { owner, related })?;
        trust::apply_signal(record, signal);
        let updated = record.clone();
        profile.updated_at = Utc::now();
        Ok(updated)
    }

    pub async fn relation(&self, owner: UserId, related: UserId) -> Result<RelationshipRecord> {
        let profiles = self.profiles.read().await;
        let slot = profiles
            .get(&owner)
            .ok_or(CoreError::RelationNotFound { owner, related })?
            .clone();
        drop(profiles);
        let profile = slot.lock().await;
        profile
            .relationships
            .get(&related)
            .cloned()
            .ok_or(CoreError::RelationNotFound { owner, related })
    }

    pub async fn profile(&self, user: UserId) -> Result<UserProfile> {
        let profiles = self.profiles.read().await;
        let slot = profiles
            .get(&user)
            .ok_or(CoreError::ProfileNotFound(user))?
            .clone();
        drop(profiles);
        let profile = slot.lock().await;
        Ok(profile.clone())
    }

    /// Folds a completed assessment into the profile. The first result is
    /// taken as-is; later ones smooth at 80/20.
    pub async fn record_iq(&self, user: UserId, iq_score: f64) -> f64 {
        let slot = self.slot(user).await;
        let mut profile = slot.lock().await;
        let folded = match profile.iq_score {
            Some(previous) => 0.8 * previous + 0.2 * iq_score,
            None => iq_score,
        };
        profile.iq_score = Some(folded);
        profile.assessment_completed = true;
        profile.updated_at = Utc::now();
        debug!(user = %user, iq = folded, "recorded assessment result");
        folded
    }

    pub async fn record_traits(&self, user: UserId, traits: BigFiveTraits) {
        let slot = self.slot(user).await;
        let mut profile = slot.lock().await;
        profile.big_five = Some(traits);
        profile.updated_at = Utc::now();
    }

    pub async fn count(&self) -> usize {
        self.profiles.read().await.len()
    }

    /// Rehydrates profile scalars from persistence.
    pub async fn restore_profile(
        &self,
        user: UserId,
        iq_score: Option<f64>,
        assessment_completed: bool,
        big_five: Option<BigFiveTraits>,
    ) {
        let slot = self.slot(user).await;
        let mut profile = slot.lock().await;
        profile.iq_score = iq_score;
        profile.assessment_completed = assessment_completed;
        profile.big_five = big_five;
    }

    /// Rehydrates one relationship record from persistence.
    pub async fn restore_relation(&self, record: RelationshipRecord) {
        let slot = self.slot(record.owner).await;
        let mut profile = slot.lock().await;
        profile.relationships.insert(record.related, record);
    }
}

impl Default for ProfileBook {
    fn default() -> Self {
        Self::new()
    }
}
