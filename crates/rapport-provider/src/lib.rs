pub mod http;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use http::{HttpTextAnalyzer, HttpVisualizer};

/// Classifier output for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentScore {
    /// "positive", "negative" or "neutral".
    pub label: String,
    /// Classifier confidence in [0, 1].
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalMetrics {
    pub word_count: usize,
    pub unique_words: usize,
    pub lexical_diversity: f64,
    pub avg_word_length: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternCounts {
    pub questions: usize,
    pub exclamations: usize,
}

/// Already-scored numeric payload for one message text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextInsights {
    pub sentiment: SentimentScore,
    pub lexical: LexicalMetrics,
    pub patterns: PatternCounts,
    #[serde(default)]
    pub toxicity: f64,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl TextInsights {
    /// Confidence signed by label: negative labels map below zero,
    /// neutral to zero.
    pub fn signed_sentiment(&self) -> f64 {
        match self.sentiment.label.to_ascii_lowercase().as_str() {
            "negative" => -self.sentiment.score,
            "neutral" => 0.0,
            _ => self.sentiment.score,
        }
    }
}

/// Aggregate language indicators over a user's message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitiveIndicators {
    pub vocabulary_size: usize,
    pub lexical_diversity: f64,
    pub avg_word_complexity: f64,
    pub topic_consistency: f64,
}

/// Opaque rendered artifact returned by the visualization service.
#[derive(Debug, Clone)]
pub struct RenderedPanel {
    pub mime_type: String,
    pub data: Bytes,
}

#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<TextInsights>;
    async fn cognitive_profile(&self, texts: &[String]) -> Result<CognitiveIndicators>;
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait Visualizer: Send + Sync {
    async fn render(&self, report: &serde_json::Value) -> Result<RenderedPanel>;
}

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "love", "thanks", "thank", "happy", "nice", "awesome", "yes",
];
const NEGATIVE_WORDS: &[&str] = &[
    "bad", "hate", "awful", "terrible", "angry", "wrong", "no", "never",
];

/// Deterministic analyzer for tests and offline runs. Scores are crude
/// keyword counts, stable for a given input.
pub struct StubTextAnalyzer;

impl StubTextAnalyzer {
    fn lexical(text: &str) -> LexicalMetrics {
        let words: Vec<&str> = text.split_whitespace().collect();
        let unique: HashSet<String> = words
            .iter()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        let word_count = words.len();
        let total_len: usize = words.iter().map(|w| w.chars().count()).sum();
        LexicalMetrics {
            word_count,
            unique_words: unique.len(),
            lexical_diversity: if word_count == 0 {
                0.0
            } else {
                unique.len() as f64 / word_count as f64
            },
            avg_word_length: if word_count == 0 {
                0.0
            } else {
                total_len as f64 / word_count as f64
            },
        }
    }
}

#[async_trait]
impl TextAnalyzer for StubTextAnalyzer {
    async fn analyze(&self, text: &str) -> Result<TextInsights> {
        let lower = text.to_lowercase();
        let hits = |lexicon: &[&str]| {
            lexicon
                .iter()
                .filter(|w| lower.split_whitespace().any(|t| t.trim_matches(|c: char| !c.is_alphanumeric()) == **w))
                .count()
        };
        let positive = hits(POSITIVE_WORDS);
        let negative = hits(NEGATIVE_WORDS);
        let sentiment = if positive > negative {
            SentimentScore {
                label: "positive".into(),
                score: (0.6 + 0.1 * (positive - negative) as f64).min(0.95),
            }
        } else if negative > positive {
            SentimentScore {
                label: "negative".into(),
                score: (0.6 + 0.1 * (negative - positive) as f64).min(0.95),
            }
        } else {
            SentimentScore {
                label: "neutral".into(),
                score: 0.5,
            }
        };

        Ok(TextInsights {
            sentiment,
            lexical: Self::lexical(text),
            patterns: PatternCounts {
                questions: text.matches('?').count(),
                exclamations: text.matches('!').count(),
            },
            toxicity: 0.0,
            suggestions: vec![],
        })
    }

    async fn cognitive_profile(&self, texts: &[String]) -> Result<CognitiveIndicators> {
        let mut vocabulary: HashSet<String> = HashSet::new();
        let mut word_count = 0usize;
        let mut total_len = 0usize;
        for text in texts {
            for word in text.split_whitespace() {
                let cleaned = word
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase();
                if cleaned.is_empty() {
                    continue;
                }
                total_len += cleaned.chars().count();
                word_count += 1;
                vocabulary.insert(cleaned);
            }
        }
        let avg_len = if word_count == 0 {
            0.0
        } else {
            total_len as f64 / word_count as f64
        };
        Ok(CognitiveIndicators {
            vocabulary_size: vocabulary.len(),
            lexical_diversity: if word_count == 0 {
                0.0
            } else {
                vocabulary.len() as f64 / word_count as f64
            },
            avg_word_complexity: (avg_len / 10.0).min(1.0),
            topic_consistency: if texts.len() < 2 { 1.0 } else { 0.5 },
        })
    }
}

/// Deterministic renderer for tests: echoes a tiny payload instead of a
/// real chart.
pub struct StubVisualizer;

#[async_trait]
impl Visualizer for StubVisualizer {
    async fn render(&self, report: &serde_json::Value) -> Result<RenderedPanel> {
        let body = serde_json::to_vec(report)?;
        Ok(RenderedPanel {
            mime_type: "application/json".into(),
            data: Bytes::from(body),
        })
    }
}
