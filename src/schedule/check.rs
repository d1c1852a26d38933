//! Check catalog entries and their persisted state records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scheduler::Decision;

/// A category of periodic monitoring work with its own interval policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckType {
    pub id: String,
    pub label: String,
    pub baseline_interval_s: u64,
    /// Floor the effective interval never drops below
    pub minimum_interval_s: u64,
    /// Estimated tokens spent by one run of the check
    #[serde(default)]
    pub estimated_cost_tokens: u64,
    /// Critical checks ignore quiet hours and the busy signal
    #[serde(default)]
    pub critical: bool,
}

impl CheckType {
    pub fn new(
        id: &str,
        label: &str,
        baseline_interval_s: u64,
        minimum_interval_s: u64,
        estimated_cost_tokens: u64,
    ) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            baseline_interval_s,
            minimum_interval_s,
            estimated_cost_tokens,
            critical: false,
        }
    }

    /// Mark the check as critical
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Outcome of the most recent run of a check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    #[default]
    Never,
    /// Ran and found nothing needing attention
    Ok,
    /// Ran and surfaced something for the agent
    Alert,
    /// Could not complete
    Failed,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Never => "never",
            CheckStatus::Ok => "ok",
            CheckStatus::Alert => "alert",
            CheckStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(CheckStatus::Never),
            "ok" => Ok(CheckStatus::Ok),
            "alert" => Ok(CheckStatus::Alert),
            "failed" => Ok(CheckStatus::Failed),
            other => Err(format!("unknown check status: {}", other)),
        }
    }
}

/// Immutable per-check state record.
///
/// Never mutated in place: every transition returns a new record for the
/// caller to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckState {
    pub check_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status: CheckStatus,
    #[serde(default)]
    pub consecutive_skips: u32,
    /// Tokens avoided by skipped or deferred ticks
    #[serde(default)]
    pub tokens_saved: u64,
}

impl CheckState {
    /// State of a check that has never run
    pub fn never_run(check_id: &str) -> Self {
        Self {
            check_id: check_id.to_string(),
            last_run_at: None,
            last_status: CheckStatus::Never,
            consecutive_skips: 0,
            tokens_saved: 0,
        }
    }

    pub fn has_run(&self) -> bool {
        self.last_run_at.is_some()
    }

    /// Fold a scheduling decision into a new state record.
    ///
    /// Run stamps `last_run_at` and clears the skip streak; Skip extends the
    /// streak; Skip and Defer both credit the check's estimated cost.
    pub fn record_decision(&self, check: &CheckType, decision: &Decision, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        match decision {
            Decision::Run => {
                next.last_run_at = Some(now);
                next.consecutive_skips = 0;
            }
            Decision::Skip { .. } => {
                next.consecutive_skips = next.consecutive_skips.saturating_add(1);
                next.tokens_saved = next.tokens_saved.saturating_add(check.estimated_cost_tokens);
            }
            Decision::Defer { .. } => {
                next.tokens_saved = next.tokens_saved.saturating_add(check.estimated_cost_tokens);
            }
        }
        next
    }

    /// Record the outcome of a run
    pub fn with_status(&self, status: CheckStatus) -> Self {
        Self {
            last_status: status,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::scheduler::SkipReason;
    use chrono::Duration;

    fn email() -> CheckType {
        CheckType::new("email", "Email inbox", 3600, 1800, 800)
    }

    #[test]
    fn test_run_resets_skip_streak() {
        let now = Utc::now();
        let state = CheckState {
            consecutive_skips: 4,
            ..CheckState::never_run("email")
        };
        let next = state.record_decision(&email(), &Decision::Run, now);
        assert_eq!(next.last_run_at, Some(now));
        assert_eq!(next.consecutive_skips, 0);
        assert_eq!(next.tokens_saved, 0);
        // Original record untouched
        assert_eq!(state.consecutive_skips, 4);
        assert!(!state.has_run());
    }

    #[test]
    fn test_skip_and_defer_credit_savings() {
        let now = Utc::now();
        let state = CheckState::never_run("email");
        let skipped = state.record_decision(
            &email(),
            &Decision::Skip { reason: SkipReason::Busy },
            now,
        );
        assert_eq!(skipped.consecutive_skips, 1);
        assert_eq!(skipped.tokens_saved, 800);

        let deferred = skipped.record_decision(
            &email(),
            &Decision::Defer { until: now + Duration::minutes(30) },
            now,
        );
        assert_eq!(deferred.consecutive_skips, 1);
        assert_eq!(deferred.tokens_saved, 1600);
    }

    #[test]
    fn test_with_status() {
        let state = CheckState::never_run("email").with_status(CheckStatus::Alert);
        assert_eq!(state.last_status, CheckStatus::Alert);
        assert_eq!("FAILED".parse::<CheckStatus>().unwrap(), CheckStatus::Failed);
        assert!("bogus".parse::<CheckStatus>().is_err());
    }

    #[test]
    fn test_state_serde_omits_missing_run() {
        let json = serde_json::to_string(&CheckState::never_run("weather")).unwrap();
        assert!(!json.contains("last_run_at"));
        let back: CheckState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CheckState::never_run("weather"));
    }
}
