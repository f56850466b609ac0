use std::collections::HashMap;
use std::sync::Arc;

use rapport_schema::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::{CoreError, Result};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitKind {
    Openness,
    Conscientiousness,
    Extraversion,
    Agreeableness,
    Neuroticism,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalityItem {
    pub id: String,
    pub prompt: String,
    pub trait_kind: TraitKind,
    pub reverse_scored: bool,
}

/// Trait scores on the 1..=5 rating scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigFiveTraits {
    pub openness: f64,
    pub conscientiousness: f64,
    pub extraversion: f64,
    pub agreeableness: f64,
    pub neuroticism: f64,
}

#[derive(Debug, Clone)]
pub struct PersonalityProgress {
    pub answered: usize,
    pub total: usize,
    /// Present once every item has a rating.
    pub traits: Option<BigFiveTraits>,
}

#[derive(Debug, Default)]
struct ItemRatings {
    ratings: HashMap<String, u8>,
}

/// Sequential Big Five questionnaire. Items are served in fixed order;
/// scoring reverses marked items as `6 - rating` and averages per trait.
pub struct PersonalityEngine {
    items: Vec<PersonalityItem>,
    states: RwLock<HashMap<UserId, Arc<Mutex<ItemRatings>>>>,
}

impl PersonalityEngine {
    pub fn new(items: Vec<PersonalityItem>) -> Self {
        Self {
            items,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_builtin_items() -> Self {
        Self::new(builtin_items())
    }

    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    async fn slot(&self, user: UserId) -> Arc<Mutex<ItemRatings>> {
        {
            let states = self.states.read().await;
            if let Some(slot) = states.get(&user) {
                return slot.clone();
            }
        }
        let mut states = self.states.write().await;
        states.entry(user).or_default().clone()
    }

    /// First unanswered item in questionnaire order, None once complete.
    pub async fn next_item(&self, user: UserId) -> Option<PersonalityItem> {
        let slot = self.slot(user).await;
        let state = slot.lock().await;
        self.items
            .iter()
            .find(|item| !state.ratings.contains_key(&item.id))
            .cloned()
    }

    pub async fn record_rating(
        &self,
        user: UserId,
        item_id: &str,
        rating: u8,
    ) -> Result<PersonalityProgress> {
        if !(1..=5).contains(&rating) {
            return Err(CoreError::InvalidRating(rating));
        }
        if !self.items.iter().any(|item| item.id == item_id) {
            return Err(CoreError::ItemNotFound(item_id.to_string()));
        }

        let slot = self.slot(user).await;
        let mut state = slot.lock().await;
        state.ratings.insert(item_id.to_string(), rating);

        let answered = state.ratings.len();
        let total = self.items.len();
        let traits = if answered >= total {
            Some(self.score(&state.ratings))
        } else {
            None
        };
        Ok(PersonalityProgress {
            answered,
            total,
            traits,
        })
    }

    fn score(&self, ratings: &HashMap<String, u8>) -> BigFiveTraits {
        let mut buckets: HashMap<TraitKind, Vec<f64>> = HashMap::new();
        for item in &self.items {
            if let Some(&rating) = ratings.get(&item.id) {
                let score = if item.reverse_scored {
                    6.0 - rating as f64
                } else {
                    rating as f64
                };
                buckets.entry(item.trait_kind).or_default().push(score);
            }
        }
        let trait_mean = |kind: TraitKind| {
            buckets
                .get(&kind)
                .map(|scores| stats::mean(scores))
                .unwrap_or(0.0)
        };
        BigFiveTraits {
            openness: trait_mean(TraitKind::Openness),
            conscientiousness: trait_mean(TraitKind::Conscientiousness),
            extraversion: trait_mean(TraitKind::Extraversion),
            agreeableness: trait_mean(TraitKind::Agreeableness),
            neuroticism: trait_mean(TraitKind::Neuroticism),
        }
    }
}

fn item(id: &str, prompt: &str, trait_kind: TraitKind, reverse_scored: bool) -> PersonalityItem {
    PersonalityItem {
        id: id.to_string(),
        prompt: prompt.to_string(),
        trait_kind,
        reverse_scored,
    }
}

pub fn builtin_items() -> Vec<PersonalityItem> {
    vec![
        item(
            "O1",
            "I enjoy trying new experiences and learning new things",
            TraitKind::Openness,
            false,
        ),
        item(
            "O2",
            "I prefer routine and familiar experiences",
            TraitKind::Openness,
            true,
        ),
        item(
            "C1",
            "I am always prepared and organized",
            TraitKind::Conscientiousness,
            false,
        ),
        item(
            "C2",
            "I often leave tasks unfinished",
            TraitKind::Conscientiousness,
            true,
        ),
        item(
            "E1",
            "I feel energized when talking to many people",
            TraitKind::Extraversion,
            false,
        ),
        item(
            "E2",
            "I prefer to spend time alone rather than in groups",
            TraitKind::Extraversion,
            true,
        ),
        item(
            "A1",
            "I am considerate of other people's feelings",
            TraitKind::Agreeableness,
            false,
        ),
        item(
            "A2",
            "I tend to find fault with others",
            TraitKind::Agreeableness,
            true,
        ),
        item(
            "N1",
            "I often feel tense or worried",
            TraitKind::Neuroticism,
            false,
        ),
        item(
            "N2",
            "I stay calm under pressure",
            TraitKind::Neuroticism,
            true,
        ),
    ]
}
