use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

fn default_session_ttl_secs() -> u64 {
    86_400
}

fn default_metrics_window_days() -> i64 {
    30
}

fn default_report_ttl_secs() -> u64 {
    3_600
}

fn default_report_cache_cap() -> usize {
    256
}

fn default_collaborator_timeout_secs() -> u64 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_bus_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Sessions idle longer than this are swept.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Rolling window for relationship metrics.
    #[serde(default = "default_metrics_window_days")]
    pub metrics_window_days: i64,
    #[serde(default = "default_report_ttl_secs")]
    pub report_ttl_secs: u64,
    #[serde(default = "default_report_cache_cap")]
    pub report_cache_cap: usize,
    #[serde(default = "default_collaborator_timeout_secs")]
    pub collaborator_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    #[serde(default)]
    pub assessment: AssessmentConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            metrics_window_days: default_metrics_window_days(),
            report_ttl_secs: default_report_ttl_secs(),
            report_cache_cap: default_report_cache_cap(),
            collaborator_timeout_secs: default_collaborator_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            bus_capacity: default_bus_capacity(),
            assessment: AssessmentConfig::default(),
        }
    }
}

fn default_initial_difficulty() -> f64 {
    0.5
}

fn default_difficulty_step() -> f64 {
    0.1
}

fn default_difficulty_floor() -> f64 {
    0.2
}

fn default_difficulty_ceiling() -> f64 {
    0.95
}

fn default_band_width() -> f64 {
    0.1
}

fn default_session_length() -> usize {
    20
}

fn default_adjust_window() -> usize {
    3
}

fn default_raise_threshold() -> f64 {
    0.7
}

fn default_lower_threshold() -> f64 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentConfig {
    #[serde(default = "default_initial_difficulty")]
    pub initial_difficulty: f64,
    #[serde(default = "default_difficulty_step")]
    pub difficulty_step: f64,
    #[serde(default = "default_difficulty_floor")]
    pub difficulty_floor: f64,
    #[serde(default = "default_difficulty_ceiling")]
    pub difficulty_ceiling: f64,
    /// Candidate questions must sit within this distance of the current level.
    #[serde(default = "default_band_width")]
    pub band_width: f64,
    /// Responses required to complete one assessment.
    #[serde(default = "default_session_length")]
    pub session_length: usize,
    /// Trailing responses considered when adjusting difficulty.
    #[serde(default = "default_adjust_window")]
    pub adjust_window: usize,
    #[serde(default = "default_raise_threshold")]
    pub raise_threshold: f64,
    #[serde(default = "default_lower_threshold")]
    pub lower_threshold: f64,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            initial_difficulty: default_initial_difficulty(),
            difficulty_step: default_difficulty_step(),
            difficulty_floor: default_difficulty_floor(),
            difficulty_ceiling: default_difficulty_ceiling(),
            band_width: default_band_width(),
            session_length: default_session_length(),
            adjust_window: default_adjust_window(),
            raise_threshold: default_raise_threshold(),
            lower_threshold: default_lower_threshold(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<CoreConfig> {
    let config: CoreConfig = read_yaml_file(path)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &CoreConfig) -> Result<()> {
    if config.metrics_window_days <= 0 {
        return Err(anyhow!(
            "metrics_window_days must be positive, got {}",
            config.metrics_window_days
        ));
    }
    if config.report_cache_cap == 0 {
        return Err(anyhow!("report_cache_cap must be at least 1"));
    }

    let a = &config.assessment;
    if a.difficulty_floor >= a.difficulty_ceiling {
        return Err(anyhow!(
            "difficulty_floor {} must be below difficulty_ceiling {}",
            a.difficulty_floor,
            a.difficulty_ceiling
        ));
    }
    if a.initial_difficulty < a.difficulty_floor || a.initial_difficulty > a.difficulty_ceiling {
        return Err(anyhow!(
            "initial_difficulty {} outside [{}, {}]",
            a.initial_difficulty,
            a.difficulty_floor,
            a.difficulty_ceiling
        ));
    }
    if a.lower_threshold >= a.raise_threshold {
        return Err(anyhow!(
            "lower_threshold {} must be below raise_threshold {}",
            a.lower_threshold,
            a.raise_threshold
        ));
    }
    if a.session_length == 0 {
        return Err(anyhow!("session_length must be at least 1"));
    }
    if a.band_width <= 0.0 {
        return Err(anyhow!("band_width must be positive"));
    }
    Ok(())
}

pub fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

pub fn read_yaml_dir<T>(dir: &Path) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let mut paths = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read config dir: {}", dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read dir entry: {}", dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("yaml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        items.push(read_yaml_file::<T>(&path)?);
    }
    Ok(items)
}
