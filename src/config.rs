//! Governor configuration: loading, saving and validation.
//!
//! Validation collects every violation in one pass so a broken file can be
//! fixed in one edit.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::budget::BudgetPolicy;
use crate::context::{compile_pattern, ContextPolicy};
use crate::schedule::quiet_hours::MAX_UTC_OFFSET_MINUTES;
use crate::schedule::SchedulerConfig;
use crate::state;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub budget: BudgetPolicy,
    #[serde(default)]
    pub context: ContextPolicy,
}

/// A single configuration problem
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ConfigViolation {
    #[error("check #{index} has an empty id")]
    EmptyCheckId { index: usize },
    #[error("check id {id:?} is used more than once")]
    DuplicateCheckId { id: String },
    #[error("check {id:?} has a zero minimum interval")]
    ZeroMinimumInterval { id: String },
    #[error("check {id:?}: minimum interval {minimum_s}s exceeds baseline {baseline_s}s")]
    MinimumExceedsBaseline { id: String, minimum_s: u64, baseline_s: u64 },
    #[error("max_backoff_multiplier {value} is below 1")]
    BackoffCapBelowOne { value: f64 },
    #[error("backoff_growth {value} is below 1")]
    BackoffGrowthBelowOne { value: f64 },
    #[error("quiet window #{index} starts and ends at the same time")]
    EmptyQuietWindow { index: usize },
    #[error("quiet windows #{first} and #{second} overlap")]
    OverlappingQuietWindows { first: usize, second: usize },
    #[error("utc_offset_minutes {value} is outside ±14h")]
    InvalidUtcOffset { value: i32 },
    #[error("budget_limit must be positive")]
    ZeroBudgetLimit,
    #[error("period_end must be after period_start")]
    InvalidPeriod,
    #[error("hysteresis_window_k must be positive")]
    ZeroHysteresisWindow,
    #[error("evaluation ring capacity {capacity} is smaller than the hysteresis window {window}")]
    RingSmallerThanWindow { capacity: usize, window: u32 },
    #[error("tier catalog is empty")]
    EmptyTierCatalog,
    #[error("tier {tier} has non-positive cost multiplier {value}")]
    NonPositiveMultiplier { tier: String, value: f64 },
    #[error("tier catalog entry #{index} is not strictly above the previous tier in order and cost")]
    TierOrdering { index: usize },
    #[error("tolerance_fraction {value} is negative")]
    NegativeTolerance { value: f64 },
    #[error("{field} {value} must be in (0, 1]")]
    InvalidSmoothing { field: String, value: f64 },
    #[error("velocity window must be positive")]
    ZeroVelocityWindow,
    #[error("level {level} has a zero file ceiling")]
    ZeroFileCeiling { level: String },
    #[error("level {level} has more than one policy")]
    DuplicateLevelPolicy { level: String },
    #[error("level {level} has an invalid source pattern {pattern:?}")]
    InvalidSourcePattern { level: String, pattern: String },
}

fn join_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Every violation found in a configuration
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("invalid configuration: {}", join_violations(.violations))]
pub struct ConfigurationError {
    pub violations: Vec<ConfigViolation>,
}

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
    #[error("App data directory not found")]
    NoAppDataDir,
}

impl GovernorConfig {
    /// Default config location under the app data directory
    pub fn default_path() -> Result<PathBuf, ConfigLoadError> {
        let base = state::app_data_dir().map_err(|_| ConfigLoadError::NoAppDataDir)?;
        Ok(base.join(CONFIG_FILE_NAME))
    }

    /// Parse and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        let config: GovernorConfig = serde_json::from_str(&content)?;
        validate_config(&config)?;
        tracing::info!(path = ?path, checks = config.scheduler.checks.len(), "Loaded configuration");
        Ok(config)
    }

    /// Load a config file, or the built-in defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            tracing::debug!(path = ?path, "No configuration file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigLoadError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        state::atomic_write(path, &content)?;
        tracing::info!(path = ?path, "Saved configuration");
        Ok(())
    }
}

fn validate_scheduler(config: &SchedulerConfig, out: &mut Vec<ConfigViolation>) {
    let mut seen = HashSet::new();
    for (index, check) in config.checks.iter().enumerate() {
        if check.id.trim().is_empty() {
            out.push(ConfigViolation::EmptyCheckId { index });
        } else if !seen.insert(check.id.as_str()) {
            out.push(ConfigViolation::DuplicateCheckId { id: check.id.clone() });
        }
        if check.minimum_interval_s == 0 {
            out.push(ConfigViolation::ZeroMinimumInterval { id: check.id.clone() });
        }
        if check.minimum_interval_s > check.baseline_interval_s {
            out.push(ConfigViolation::MinimumExceedsBaseline {
                id: check.id.clone(),
                minimum_s: check.minimum_interval_s,
                baseline_s: check.baseline_interval_s,
            });
        }
    }

    // Negated comparisons also reject NaN
    if !(config.max_backoff_multiplier >= 1.0) {
        out.push(ConfigViolation::BackoffCapBelowOne {
            value: config.max_backoff_multiplier,
        });
    }
    if !(config.backoff_growth >= 1.0) {
        out.push(ConfigViolation::BackoffGrowthBelowOne {
            value: config.backoff_growth,
        });
    }

    let quiet = &config.quiet_hours;
    for (index, window) in quiet.windows.iter().enumerate() {
        if window.is_empty() {
            out.push(ConfigViolation::EmptyQuietWindow { index });
        }
    }
    for (first, second) in quiet.overlapping_pairs() {
        out.push(ConfigViolation::OverlappingQuietWindows { first, second });
    }
    if quiet.utc_offset_minutes.unsigned_abs() > MAX_UTC_OFFSET_MINUTES.unsigned_abs() {
        out.push(ConfigViolation::InvalidUtcOffset {
            value: quiet.utc_offset_minutes,
        });
    }
}

fn validate_budget(policy: &BudgetPolicy, out: &mut Vec<ConfigViolation>) {
    if policy.budget_limit == 0 {
        out.push(ConfigViolation::ZeroBudgetLimit);
    }
    if policy.period_end <= policy.period_start {
        out.push(ConfigViolation::InvalidPeriod);
    }
    if policy.hysteresis_window_k == 0 {
        out.push(ConfigViolation::ZeroHysteresisWindow);
    }
    if policy.evaluation_ring_capacity < policy.hysteresis_window_k as usize {
        out.push(ConfigViolation::RingSmallerThanWindow {
            capacity: policy.evaluation_ring_capacity,
            window: policy.hysteresis_window_k,
        });
    }

    let specs = policy.tier_catalog.specs();
    if specs.is_empty() {
        out.push(ConfigViolation::EmptyTierCatalog);
    }
    for spec in specs {
        if !(spec.cost_multiplier > 0.0) || !spec.cost_multiplier.is_finite() {
            out.push(ConfigViolation::NonPositiveMultiplier {
                tier: spec.tier.to_string(),
                value: spec.cost_multiplier,
            });
        }
    }
    for (index, pair) in specs.windows(2).enumerate() {
        if pair[1].tier <= pair[0].tier || !(pair[1].cost_multiplier > pair[0].cost_multiplier) {
            out.push(ConfigViolation::TierOrdering { index: index + 1 });
        }
    }

    if !(policy.tolerance_fraction >= 0.0) {
        out.push(ConfigViolation::NegativeTolerance {
            value: policy.tolerance_fraction,
        });
    }
    let velocity = &policy.velocity;
    for (field, value) in [("alpha_rise", velocity.alpha_rise), ("alpha_fall", velocity.alpha_fall)] {
        if !(value > 0.0 && value <= 1.0) {
            out.push(ConfigViolation::InvalidSmoothing {
                field: field.to_string(),
                value,
            });
        }
    }
    if velocity.window_s == 0 {
        out.push(ConfigViolation::ZeroVelocityWindow);
    }
}

fn validate_context(policy: &ContextPolicy, out: &mut Vec<ConfigViolation>) {
    let mut seen = HashSet::new();
    for level_policy in &policy.levels {
        let level = level_policy.level.as_str().to_string();
        if !seen.insert(level_policy.level) {
            out.push(ConfigViolation::DuplicateLevelPolicy { level: level.clone() });
        }
        if level_policy.max_files == 0 {
            out.push(ConfigViolation::ZeroFileCeiling { level: level.clone() });
        }
        for pattern in &level_policy.allowed_patterns {
            if compile_pattern(pattern).is_none() {
                out.push(ConfigViolation::InvalidSourcePattern {
                    level: level.clone(),
                    pattern: pattern.clone(),
                });
            }
        }
    }
}

/// Check a configuration, reporting every violation at once
pub fn validate_config(config: &GovernorConfig) -> Result<(), ConfigurationError> {
    let mut violations = Vec::new();
    validate_scheduler(&config.scheduler, &mut violations);
    validate_budget(&config.budget, &mut violations);
    validate_context(&config.context, &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ConfigurationError { violations })
    }
}
