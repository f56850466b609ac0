use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::bail;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rapport_schema::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::{self, AssessmentConfig};
use crate::error::{CoreError, Result};
use crate::stats;

// Tolerates drift from repeated step adjustments when matching the band.
const BAND_TOLERANCE: f64 = 1e-9;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    Logical,
    Memory,
    Numerical,
    Pattern,
    Spatial,
    Verbal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentQuestion {
    pub id: String,
    pub category: QuestionCategory,
    pub prompt: String,
    pub options: Vec<String>,
    pub answer: String,
    pub difficulty: f64,
    #[serde(default = "default_time_limit")]
    pub time_limit_secs: f64,
}

fn default_time_limit() -> f64 {
    60.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentResponse {
    pub question_id: String,
    pub category: QuestionCategory,
    pub correct: bool,
    pub response_seconds: f64,
    pub difficulty: f64,
    pub performance: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    NotStarted,
    InProgress,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentState {
    pub user_id: UserId,
    pub status: AssessmentStatus,
    pub current_difficulty: f64,
    pub responses: Vec<AssessmentResponse>,
    pub answered: HashSet<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AssessmentState {
    fn new(user_id: UserId, initial_difficulty: f64) -> Self {
        Self {
            user_id,
            status: AssessmentStatus::NotStarted,
            current_difficulty: initial_difficulty,
            responses: Vec::new(),
            answered: HashSet::new(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Outcome of serving the next item. Running out of suitable questions
/// is a normal end of session, not a failure.
#[derive(Debug, Clone)]
pub enum NextQuestion {
    Question(AssessmentQuestion),
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct ScoreOutcome {
    pub correct: bool,
    pub performance: f64,
    pub current_difficulty: f64,
    pub completed: bool,
    pub responses_recorded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentReport {
    pub user_id: UserId,
    pub iq_score: f64,
    pub percentile: f64,
    pub avg_performance: f64,
    pub consistency: f64,
    pub difficulty_progression: f64,
    pub responses: usize,
    pub category_scores: BTreeMap<QuestionCategory, f64>,
    pub completed: bool,
}

pub struct QuestionBank {
    questions: Vec<AssessmentQuestion>,
    by_id: HashMap<String, usize>,
}

impl QuestionBank {
    pub fn from_questions(questions: Vec<AssessmentQuestion>) -> anyhow::Result<Self> {
        let mut by_id = HashMap::with_capacity(questions.len());
        for (idx, question) in questions.iter().enumerate() {
            if by_id.insert(question.id.clone(), idx).is_some() {
                bail!("duplicate question id: {}", question.id);
            }
        }
        Ok(Self { questions, by_id })
    }

    /// Loads every `.yaml` file in `dir`; each file holds a `questions` list.
    pub fn from_yaml_dir(dir: &Path) -> anyhow::Result<Self> {
        let files: Vec<QuestionFile> = config::read_yaml_dir(dir)?;
        let questions = files.into_iter().flat_map(|f| f.questions).collect();
        Self::from_questions(questions)
    }

    pub fn builtin() -> Self {
        let questions = builtin_questions();
        let by_id = questions
            .iter()
            .enumerate()
            .map(|(idx, question)| (question.id.clone(), idx))
            .collect();
        Self { questions, by_id }
    }

    pub fn get(&self, id: &str) -> Option<&AssessmentQuestion> {
        self.by_id.get(id).map(|&idx| &self.questions[idx])
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &AssessmentQuestion> {
        self.questions.iter()
    }
}

#[derive(Debug, Deserialize)]
struct QuestionFile {
    questions: Vec<AssessmentQuestion>,
}

/// Serves difficulty-banded questions and adapts the working difficulty
/// from a sliding window of recent performance.
pub struct AssessmentEngine {
    bank: QuestionBank,
    config: AssessmentConfig,
    states: RwLock<HashMap<UserId, Arc<Mutex<AssessmentState>>>>,
    rng: Mutex<StdRng>,
}

impl AssessmentEngine {
    pub fn new(bank: QuestionBank, config: AssessmentConfig) -> Self {
        Self::with_rng(bank, config, StdRng::from_entropy())
    }

    pub fn with_seed(bank: QuestionBank, config: AssessmentConfig, seed: u64) -> Self {
        Self::with_rng(bank, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(bank: QuestionBank, config: AssessmentConfig, rng: StdRng) -> Self {
        Self {
            bank,
            config,
            states: RwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    pub fn bank(&self) -> &QuestionBank {
        &self.bank
    }

    async fn slot(&self, user: UserId) -> Arc<Mutex<AssessmentState>> {
        {
            let states = self.states.read().await;
            if let Some(slot) = states.get(&user) {
                return slot.clone();
            }
        }
        let mut states = self.states.write().await;
        states
            .entry(user)
            .or_insert_with(|| {
                Arc::new(Mutex::new(AssessmentState::new(
                    user,
                    self.config.initial_difficulty,
                )))
            })
            .clone()
    }

    /// Next unanswered question within the difficulty band, balancing
    /// categories toward the least-covered one.
    pub async fn next_question(&self, user: UserId) -> NextQuestion {
        let slot = self.slot(user).await;
        let mut state = slot.lock().await;

        if state.status == AssessmentStatus::Complete {
            return NextQuestion::Exhausted;
        }
        if state.status == AssessmentStatus::NotStarted {
            state.status = AssessmentStatus::InProgress;
            state.started_at = Some(Utc::now());
        }

        let band = self.config.band_width + BAND_TOLERANCE;
        let candidates: Vec<&AssessmentQuestion> = self
            .bank
            .iter()
            .filter(|q| !state.answered.contains(&q.id))
            .filter(|q| (q.difficulty - state.current_difficulty).abs() <= band)
            .collect();
        if candidates.is_empty() {
            return NextQuestion::Exhausted;
        }

        let mut seen_per_category: HashMap<QuestionCategory, usize> = HashMap::new();
        for response in &state.responses {
            *seen_per_category.entry(response.category).or_default() += 1;
        }
        let target = candidates
            .iter()
            .map(|q| q.category)
            .min_by_key(|cat| (seen_per_category.get(cat).copied().unwrap_or(0), *cat));
        let Some(target) = target else {
            return NextQuestion::Exhausted;
        };

        let pool: Vec<&AssessmentQuestion> = candidates
            .into_iter()
            .filter(|q| q.category == target)
            .collect();
        let mut rng = self.rng.lock().await;
        let pick = pool[rng.gen_range(0..pool.len())].clone();
        NextQuestion::Question(pick)
    }

    pub async fn score_response(
        &self,
        user: UserId,
        question_id: &str,
        answer: &str,
        response_seconds: f64,
    ) -> Result<ScoreOutcome> {
        let question = self
            .bank
            .get(question_id)
            .ok_or_else(|| CoreError::QuestionNotFound(question_id.to_string()))?
            .clone();

        let slot = self.slot(user).await;
        let mut state = slot.lock().await;
        if state.status == AssessmentStatus::Complete {
            return Err(CoreError::AssessmentComplete(user));
        }
        if state.status == AssessmentStatus::NotStarted {
            state.status = AssessmentStatus::InProgress;
            state.started_at = Some(Utc::now());
        }

        let correct = answer.trim() == question.answer;
        let time_factor = if response_seconds > 0.0 {
            (question.time_limit_secs / response_seconds).min(1.0)
        } else {
            0.0
        };
        let performance = (correct as u8) as f64 + 0.2 * time_factor + 0.3 * question.difficulty;

        state.answered.insert(question.id.clone());
        state.responses.push(AssessmentResponse {
            question_id: question.id.clone(),
            category: question.category,
            correct,
            response_seconds,
            difficulty: question.difficulty,
            performance,
            at: Utc::now(),
        });

        let window = self.config.adjust_window.min(state.responses.len());
        let recent: Vec<f64> = state.responses[state.responses.len() - window..]
            .iter()
            .map(|r| r.performance)
            .collect();
        let recent_mean = stats::mean(&recent);
        if recent_mean > self.config.raise_threshold {
            state.current_difficulty = (state.current_difficulty + self.config.difficulty_step)
                .min(self.config.difficulty_ceiling);
        } else if recent_mean < self.config.lower_threshold {
            state.current_difficulty = (state.current_difficulty - self.config.difficulty_step)
                .max(self.config.difficulty_floor);
        }

        let completed = state.responses.len() >= self.config.session_length;
        if completed {
            state.status = AssessmentStatus::Complete;
            state.completed_at = Some(Utc::now());
            debug!(user = %user, responses = state.responses.len(), "assessment complete");
        }

        Ok(ScoreOutcome {
            correct,
            performance,
            current_difficulty: state.current_difficulty,
            completed,
            responses_recorded: state.responses.len(),
        })
    }

    /// Aggregate score over everything answered so far.
    pub async fn final_score(&self, user: UserId) -> Result<AssessmentReport> {
        let slot = self.slot(user).await;
        let state = slot.lock().await;
        if state.responses.is_empty() {
            return Err(CoreError::NoData(user));
        }

        let performances: Vec<f64> = state.responses.iter().map(|r| r.performance).collect();
        let difficulties: Vec<f64> = state.responses.iter().map(|r| r.difficulty).collect();
        let avg_performance = stats::mean(&performances);
        let consistency = (1.0 - stats::std_dev(&performances)).max(0.0);

        let span = self.config.difficulty_ceiling - self.config.difficulty_floor;
        let steps = (state.responses.len() - 1) as f64;
        let difficulty_progression = if span > 0.0 {
            (stats::linear_slope(&difficulties) * steps / span).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let iq_score =
            100.0 + 30.0 * avg_performance + 10.0 * consistency + 10.0 * difficulty_progression;
        let percentile = stats::normal_cdf((iq_score - 100.0) / 15.0) * 100.0;

        let mut per_category: BTreeMap<QuestionCategory, Vec<f64>> = BTreeMap::new();
        for response in &state.responses {
            per_category
                .entry(response.category)
                .or_default()
                .push(response.performance);
        }
        let category_scores = per_category
            .into_iter()
            .map(|(cat, scores)| (cat, stats::mean(&scores)))
            .collect();

        Ok(AssessmentReport {
            user_id: user,
            iq_score,
            percentile,
            avg_performance,
            consistency,
            difficulty_progression,
            responses: state.responses.len(),
            category_scores,
            completed: state.status == AssessmentStatus::Complete,
        })
    }

    pub async fn status(&self, user: UserId) -> AssessmentStatus {
        let states = self.states.read().await;
        match states.get(&user) {
            Some(slot) => slot.lock().await.status,
            None => AssessmentStatus::NotStarted,
        }
    }

    pub async fn snapshot(&self, user: UserId) -> Option<AssessmentState> {
        let states = self.states.read().await;
        match states.get(&user) {
            Some(slot) => Some(slot.lock().await.clone()),
            None => None,
        }
    }

    /// Reinstalls a previously captured state, replacing any in-memory one.
    pub async fn restore(&self, state: AssessmentState) {
        let mut states = self.states.write().await;
        states.insert(state.user_id, Arc::new(Mutex::new(state)));
    }
}

fn q(
    id: &str,
    category: QuestionCategory,
    prompt: &str,
    options: &[&str],
    answer: &str,
    difficulty: f64,
    time_limit_secs: f64,
) -> AssessmentQuestion {
    AssessmentQuestion {
        id: id.to_string(),
        category,
        prompt: prompt.to_string(),
        options: options.iter().map(|s| s.to_string()).collect(),
        answer: answer.to_string(),
        difficulty,
        time_limit_secs,
    }
}

fn builtin_questions() -> Vec<AssessmentQuestion> {
    use QuestionCategory::*;
    vec![
        q(
            "L1",
            Logical,
            "All roses are flowers. Some flowers fade quickly. Does it follow that some roses fade quickly?",
            &["yes", "no"],
            "no",
            0.3,
            30.0,
        ),
        q(
            "L2",
            Logical,
            "Every zorp is a blick and no blick is green. Can a zorp be green?",
            &["yes", "no"],
            "no",
            0.5,
            45.0,
        ),
        q(
            "L3",
            Logical,
            "Anna is taller than Ben and Ben is taller than Cara. Who is shortest?",
            &["Anna", "Ben", "Cara"],
            "Cara",
            0.6,
            45.0,
        ),
        q(
            "L4",
            Logical,
            "If it rains the match is cancelled. The match was not cancelled. Did it rain?",
            &["yes", "no", "cannot say"],
            "no",
            0.8,
            60.0,
        ),
        q(
            "M1",
            Memory,
            "Which digit appeared twice in the sequence 3 7 1 7 9?",
            &["3", "7", "1", "9"],
            "7",
            0.3,
            30.0,
        ),
        q(
            "M2",
            Memory,
            "Recall the list: apple, chair, river. Which word came second?",
            &["apple", "chair", "river"],
            "chair",
            0.5,
            45.0,
        ),
        q(
            "M3",
            Memory,
            "In the sequence K Q M Q P, which letter occurred twice?",
            &["K", "Q", "M", "P"],
            "Q",
            0.6,
            45.0,
        ),
        q(
            "M4",
            Memory,
            "Which pair appeared in the list 41-cat, 17-sun, 98-oak?",
            &["17-sun", "17-oak", "41-sun", "98-cat"],
            "17-sun",
            0.8,
            60.0,
        ),
        q(
            "N1",
            Numerical,
            "What is 15% of 200?",
            &["20", "25", "30", "35"],
            "30",
            0.3,
            30.0,
        ),
        q(
            "N2",
            Numerical,
            "A train covers 180 km in 2 hours. What is its average speed in km/h?",
            &["80", "90", "100", "110"],
            "90",
            0.5,
            45.0,
        ),
        q(
            "N3",
            Numerical,
            "If 3x + 7 = 25, what is x?",
            &["4", "5", "6", "7"],
            "6",
            0.6,
            45.0,
        ),
        q(
            "N4",
            Numerical,
            "What is the next prime number after 89?",
            &["91", "93", "97", "99"],
            "97",
            0.8,
            60.0,
        ),
        q(
            "P1",
            Pattern,
            "Complete the sequence: 1, 2, 4, 8, __",
            &["12", "14", "16", "18"],
            "16",
            0.3,
            30.0,
        ),
        q(
            "P2",
            Pattern,
            "Complete the sequence: 2, 6, 12, 20, __",
            &["30", "28", "32", "36"],
            "30",
            0.5,
            30.0,
        ),
        q(
            "P3",
            Pattern,
            "Complete the sequence: 1, 1, 2, 3, 5, 8, __",
            &["11", "12", "13", "14"],
            "13",
            0.6,
            45.0,
        ),
        q(
            "P4",
            Pattern,
            "Complete the sequence: 3, 5, 9, 17, 33, __",
            &["49", "57", "65", "66"],
            "65",
            0.8,
            60.0,
        ),
        q(
            "S1",
            Spatial,
            "How many faces does a cube have?",
            &["4", "6", "8", "12"],
            "6",
            0.3,
            30.0,
        ),
        q(
            "S2",
            Spatial,
            "A clock shows 3:00. What is the angle in degrees between the hands?",
            &["45", "60", "90", "120"],
            "90",
            0.5,
            45.0,
        ),
        q(
            "S3",
            Spatial,
            "How many edges does a cube have?",
            &["8", "10", "12", "16"],
            "12",
            0.6,
            45.0,
        ),
        q(
            "S4",
            Spatial,
            "A painted cube is cut into 27 small cubes. How many have exactly two painted faces?",
            &["6", "8", "12", "24"],
            "12",
            0.8,
            60.0,
        ),
        q(
            "V1",
            Verbal,
            "Which word is a synonym of 'rapid'?",
            &["slow", "quick", "late", "heavy"],
            "quick",
            0.3,
            30.0,
        ),
        q(
            "V2",
            Verbal,
            "Book is to reading as fork is to __",
            &["drawing", "eating", "writing", "cooking"],
            "eating",
            0.5,
            30.0,
        ),
        q(
            "V3",
            Verbal,
            "Which word does not belong: oak, maple, rose, birch?",
            &["oak", "maple", "rose", "birch"],
            "rose",
            0.6,
            45.0,
        ),
        q(
            "V4",
            Verbal,
            "What is the opposite of 'ephemeral'?",
            &["transient", "permanent", "fleeting", "brief"],
            "permanent",
            0.7,
            60.0,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_bank(count: usize, difficulty: f64) -> QuestionBank {
        let questions = (0..count)
            .map(|i| {
                q(
                    &format!("Q{i}"),
                    QuestionCategory::Numerical,
                    "What is 2 + 2?",
                    &["3", "4"],
                    "4",
                    difficulty,
                    30.0,
                )
            })
            .collect();
        QuestionBank::from_questions(questions).unwrap()
    }

    fn wide_config(session_length: usize) -> AssessmentConfig {
        AssessmentConfig {
            band_width: 1.0,
            session_length,
            ..AssessmentConfig::default()
        }
    }

    #[tokio::test]
    async fn first_question_sits_inside_the_band() {
        let engine =
            AssessmentEngine::with_seed(QuestionBank::builtin(), AssessmentConfig::default(), 7);
        match engine.next_question(UserId(1)).await {
            NextQuestion::Question(question) => {
                assert!((question.difficulty - 0.5).abs() <= 0.1 + BAND_TOLERANCE);
            }
            NextQuestion::Exhausted => panic!("builtin bank has questions at 0.5"),
        }
    }

    #[tokio::test]
    async fn categories_are_balanced_toward_least_covered() {
        let questions = vec![
            q("A1", QuestionCategory::Logical, "p", &["x"], "x", 0.5, 30.0),
            q("A2", QuestionCategory::Logical, "p", &["x"], "x", 0.5, 30.0),
            q("B1", QuestionCategory::Verbal, "p", &["x"], "x", 0.5, 30.0),
            q("B2", QuestionCategory::Verbal, "p", &["x"], "x", 0.5, 30.0),
        ];
        let bank = QuestionBank::from_questions(questions).unwrap();
        let engine = AssessmentEngine::with_seed(bank, wide_config(20), 11);

        // Both categories unseen: ordering breaks the tie toward Logical.
        let first = match engine.next_question(UserId(1)).await {
            NextQuestion::Question(question) => question,
            NextQuestion::Exhausted => panic!("bank not empty"),
        };
        assert_eq!(first.category, QuestionCategory::Logical);
        engine
            .score_response(UserId(1), &first.id, "x", 5.0)
            .await
            .unwrap();

        let second = match engine.next_question(UserId(1)).await {
            NextQuestion::Question(question) => question,
            NextQuestion::Exhausted => panic!("bank not empty"),
        };
        assert_eq!(second.category, QuestionCategory::Verbal);
    }

    #[tokio::test]
    async fn exhausted_once_every_candidate_is_answered() {
        let bank = uniform_bank(2, 0.5);
        let engine = AssessmentEngine::with_seed(bank, wide_config(20), 3);

        for _ in 0..2 {
            match engine.next_question(UserId(1)).await {
                NextQuestion::Question(question) => {
                    engine
                        .score_response(UserId(1), &question.id, "4", 10.0)
                        .await
                        .unwrap();
                }
                NextQuestion::Exhausted => panic!("two questions available"),
            }
        }
        assert!(matches!(
            engine.next_question(UserId(1)).await,
            NextQuestion::Exhausted
        ));
    }

    #[tokio::test]
    async fn strong_answers_raise_difficulty_and_weak_answers_lower_it() {
        let engine = AssessmentEngine::with_seed(uniform_bank(4, 0.5), wide_config(20), 5);

        // Correct and fast: performance 1.0 + 0.2 + 0.15 = 1.35 > 0.7.
        let outcome = engine
            .score_response(UserId(1), "Q0", "4", 1.0)
            .await
            .unwrap();
        assert!(outcome.correct);
        assert!((outcome.current_difficulty - 0.6).abs() < 1e-9);

        // Wrong and slow for another user: 0.0 + 0.2 * (30/300) + 0.15 = 0.17 < 0.3.
        let outcome = engine
            .score_response(UserId(2), "Q0", "3", 300.0)
            .await
            .unwrap();
        assert!(!outcome.correct);
        assert!((outcome.current_difficulty - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn difficulty_stays_clamped_over_long_sessions() {
        let config = AssessmentConfig {
            band_width: 1.0,
            session_length: 5000,
            ..AssessmentConfig::default()
        };
        let engine = AssessmentEngine::with_seed(uniform_bank(1, 0.5), config.clone(), 9);

        for _ in 0..1000 {
            let outcome = engine
                .score_response(UserId(1), "Q0", "4", 1.0)
                .await
                .unwrap();
            assert!(outcome.current_difficulty <= config.difficulty_ceiling + 1e-9);
        }
        let state = engine.snapshot(UserId(1)).await.unwrap();
        assert!((state.current_difficulty - config.difficulty_ceiling).abs() < 1e-9);

        for _ in 0..1000 {
            let outcome = engine
                .score_response(UserId(2), "Q0", "3", 600.0)
                .await
                .unwrap();
            assert!(outcome.current_difficulty >= config.difficulty_floor - 1e-9);
        }
        let state = engine.snapshot(UserId(2)).await.unwrap();
        assert!((state.current_difficulty - config.difficulty_floor).abs() < 1e-9);
    }

    #[tokio::test]
    async fn session_completes_on_the_final_response() {
        let engine = AssessmentEngine::with_seed(uniform_bank(25, 0.5), wide_config(20), 13);

        for i in 0..20 {
            let outcome = engine
                .score_response(UserId(1), &format!("Q{i}"), "4", 10.0)
                .await
                .unwrap();
            assert_eq!(outcome.completed, i == 19);
        }
        assert_eq!(engine.status(UserId(1)).await, AssessmentStatus::Complete);
        assert!(matches!(
            engine.next_question(UserId(1)).await,
            NextQuestion::Exhausted
        ));
        let err = engine
            .score_response(UserId(1), "Q20", "4", 10.0)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AssessmentComplete(_)));
    }

    #[tokio::test]
    async fn unknown_question_id_is_an_error() {
        let engine = AssessmentEngine::with_seed(uniform_bank(1, 0.5), wide_config(20), 1);
        let err = engine
            .score_response(UserId(1), "missing", "4", 5.0)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::QuestionNotFound(_)));
    }

    #[tokio::test]
    async fn final_score_requires_at_least_one_response() {
        let engine = AssessmentEngine::with_seed(uniform_bank(1, 0.5), wide_config(20), 1);
        let err = engine.final_score(UserId(1)).await.unwrap_err();
        assert!(matches!(err, CoreError::NoData(_)));
    }

    #[tokio::test]
    async fn final_score_combines_performance_consistency_and_progression() {
        let engine = AssessmentEngine::with_seed(uniform_bank(1, 0.5), wide_config(20), 1);
        let make_response = |difficulty: f64, performance: f64| AssessmentResponse {
            question_id: "Q0".to_string(),
            category: QuestionCategory::Numerical,
            correct: true,
            response_seconds: 10.0,
            difficulty,
            performance,
            at: Utc::now(),
        };
        engine
            .restore(AssessmentState {
                user_id: UserId(1),
                status: AssessmentStatus::InProgress,
                current_difficulty: 0.95,
                responses: vec![
                    make_response(0.20, 0.8),
                    make_response(0.45, 0.8),
                    make_response(0.70, 0.8),
                    make_response(0.95, 0.8),
                ],
                answered: HashSet::new(),
                started_at: Some(Utc::now()),
                completed_at: None,
            })
            .await;

        let report = engine.final_score(UserId(1)).await.unwrap();
        // avg 0.8, zero spread, and difficulty climbing floor to ceiling.
        assert!((report.avg_performance - 0.8).abs() < 1e-9);
        assert!((report.consistency - 1.0).abs() < 1e-9);
        assert!((report.difficulty_progression - 1.0).abs() < 1e-9);
        assert!((report.iq_score - 144.0).abs() < 1e-9);
        assert!(report.percentile > 99.0 && report.percentile < 100.0);
        assert_eq!(report.responses, 4);
        assert!(!report.completed);
        let numerical = report
            .category_scores
            .get(&QuestionCategory::Numerical)
            .copied()
            .unwrap();
        assert!((numerical - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn snapshot_and_restore_round_trip() {
        let engine = AssessmentEngine::with_seed(uniform_bank(3, 0.5), wide_config(20), 17);
        engine
            .score_response(UserId(1), "Q0", "4", 5.0)
            .await
            .unwrap();
        let snapshot = engine.snapshot(UserId(1)).await.unwrap();

        let fresh = AssessmentEngine::with_seed(uniform_bank(3, 0.5), wide_config(20), 17);
        fresh.restore(snapshot.clone()).await;
        let restored = fresh.snapshot(UserId(1)).await.unwrap();
        assert_eq!(restored.responses.len(), snapshot.responses.len());
        assert_eq!(restored.status, AssessmentStatus::InProgress);
        assert!(restored.answered.contains("Q0"));
    }

    #[test]
    fn duplicate_question_ids_are_rejected() {
        let questions = vec![
            q("X1", QuestionCategory::Verbal, "p", &["a"], "a", 0.5, 30.0),
            q("X1", QuestionCategory::Verbal, "p", &["a"], "a", 0.6, 30.0),
        ];
        assert!(QuestionBank::from_questions(questions).is_err());
    }

    #[test]
    fn builtin_bank_covers_every_category() {
        let bank = QuestionBank::builtin();
        assert_eq!(bank.len(), 24);
        for category in [
            QuestionCategory::Logical,
            QuestionCategory::Memory,
            QuestionCategory::Numerical,
            QuestionCategory::Pattern,
            QuestionCategory::Spatial,
            QuestionCategory::Verbal,
        ] {
            assert!(bank.iter().any(|question| question.category == category));
        }
    }

    #[test]
    fn question_files_parse_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("extra.yaml"),
            r#"
questions:
  - id: E1
    category: verbal
    prompt: "Which word is a synonym of 'big'?"
    options: ["small", "large"]
    answer: large
    difficulty: 0.4
"#,
        )
        .unwrap();
        let bank = QuestionBank::from_yaml_dir(dir.path()).unwrap();
        assert_eq!(bank.len(), 1);
        let question = bank.get("E1").unwrap();
        assert_eq!(question.category, QuestionCategory::Verbal);
        assert!((question.time_limit_secs - 60.0).abs() < 1e-9);
    }
}
