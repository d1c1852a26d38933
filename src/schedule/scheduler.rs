//! Check Scheduler
//!
//! Decides, per tick, whether each monitored check should run now, be
//! skipped, or be deferred. Evaluation is pure: state records go in,
//! decisions come out, and the caller folds the decisions back into new
//! records with [`apply_schedule`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::check::{CheckState, CheckType};
use super::quiet_hours::QuietHours;
use crate::timing;

pub const DEFAULT_BACKOFF_GROWTH: f64 = 1.5;
pub const DEFAULT_MAX_BACKOFF_MULTIPLIER: f64 = 4.0;

fn default_backoff_growth() -> f64 {
    DEFAULT_BACKOFF_GROWTH
}

fn default_max_backoff_multiplier() -> f64 {
    DEFAULT_MAX_BACKOFF_MULTIPLIER
}

/// Scheduler configuration: check catalog, backoff curve and quiet hours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub checks: Vec<CheckType>,
    /// Caps interval growth as a multiple of the baseline interval
    #[serde(default = "default_max_backoff_multiplier")]
    pub max_backoff_multiplier: f64,
    /// Per-skip growth factor of the interval
    #[serde(default = "default_backoff_growth")]
    pub backoff_growth: f64,
    #[serde(default)]
    pub quiet_hours: QuietHours,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let hm = |h| chrono::NaiveTime::from_hms_opt(h, 0, 0).unwrap_or_default();
        Self {
            checks: vec![
                CheckType::new("email", "Email inbox", 3_600, 1_800, 800),
                CheckType::new("calendar", "Calendar events", 7_200, 3_600, 500),
                CheckType::new("weather", "Weather report", 14_400, 7_200, 300),
                CheckType::new("social", "Social mentions", 7_200, 3_600, 1_200),
                CheckType::new("monitoring", "Service monitoring", 1_800, 900, 600).critical(),
            ],
            max_backoff_multiplier: DEFAULT_MAX_BACKOFF_MULTIPLIER,
            backoff_growth: DEFAULT_BACKOFF_GROWTH,
            quiet_hours: QuietHours::nightly(hm(23), hm(8)),
        }
    }
}

impl SchedulerConfig {
    /// Look up a catalog entry by id
    pub fn check(&self, id: &str) -> Option<&CheckType> {
        self.checks.iter().find(|c| c.id == id)
    }

    /// Capped multiplicative backoff: `min(growth^skips, max_multiplier)`
    pub fn backoff_factor(&self, consecutive_skips: u32) -> f64 {
        let growth = self.backoff_growth.max(1.0);
        let cap = self.max_backoff_multiplier.max(1.0);
        let exponent = i32::try_from(consecutive_skips).unwrap_or(i32::MAX);
        growth.powi(exponent).min(cap)
    }

    /// Interval a check must wait after its last run, given its skip streak.
    ///
    /// Clamped to `[minimum_interval, baseline * max_backoff_multiplier]`.
    pub fn effective_interval(&self, check: &CheckType, consecutive_skips: u32) -> Duration {
        let baseline = check.baseline_interval_s as f64;
        let ceiling = baseline * self.max_backoff_multiplier.max(1.0);
        let floor = check.minimum_interval_s as f64;
        let secs = (baseline * self.backoff_factor(consecutive_skips))
            .min(ceiling)
            .max(floor);
        timing::seconds_f64(secs)
    }

    /// Copy of this configuration with every baseline interval stretched by
    /// `factor` (values below 1.0 are ignored; intervals only slow down).
    pub fn scaled(&self, factor: f64) -> Self {
        let factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
        let checks = self
            .checks
            .iter()
            .map(|check| CheckType {
                baseline_interval_s: (check.baseline_interval_s as f64 * factor)
                    .round()
                    .min(u64::MAX as f64) as u64,
                ..check.clone()
            })
            .collect();
        Self {
            checks,
            ..self.clone()
        }
    }
}

/// Why a check was skipped this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    QuietPeriod,
    Busy,
}

/// Per-tick scheduling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Run,
    Skip { reason: SkipReason },
    Defer { until: DateTime<Utc> },
}

impl Decision {
    pub fn is_run(&self) -> bool {
        matches!(self, Decision::Run)
    }
}

/// One row of the per-tick decision table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledCheck {
    pub check: CheckType,
    pub decision: Decision,
}

/// Decide whether a single check should fire at `now`
pub fn should_check(
    state: &CheckState,
    check: &CheckType,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
    busy: bool,
) -> Decision {
    // A check that never ran has infinite elapsed time
    if let Some(last_run) = state.last_run_at {
        let interval = config.effective_interval(check, state.consecutive_skips);
        if now - last_run < interval {
            return Decision::Defer {
                until: timing::add(last_run, interval),
            };
        }
    }

    if check.critical {
        return Decision::Run;
    }

    let idle_override = config.quiet_hours.idle_override && !busy;
    if !idle_override && config.quiet_hours.is_quiet(now) {
        return Decision::Skip {
            reason: SkipReason::QuietPeriod,
        };
    }

    if busy {
        return Decision::Skip {
            reason: SkipReason::Busy,
        };
    }

    Decision::Run
}

/// Build the full decision table for one tick.
///
/// Checks without a state record are treated as never run. Checks due to run
/// come first, tightest minimum interval first, then catalog order; the
/// remaining rows follow in catalog order.
pub fn compute_check_schedule(
    states: &BTreeMap<String, CheckState>,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
    busy: bool,
) -> Vec<ScheduledCheck> {
    let mut rows: Vec<(usize, ScheduledCheck)> = config
        .checks
        .iter()
        .enumerate()
        .map(|(index, check)| {
            let decision = match states.get(&check.id) {
                Some(state) => should_check(state, check, config, now, busy),
                None => should_check(&CheckState::never_run(&check.id), check, config, now, busy),
            };
            (
                index,
                ScheduledCheck {
                    check: check.clone(),
                    decision,
                },
            )
        })
        .collect();

    rows.sort_by_key(|(index, row)| {
        if row.decision.is_run() {
            (0, row.check.minimum_interval_s, *index)
        } else {
            (1, 0, *index)
        }
    });

    rows.into_iter().map(|(_, row)| row).collect()
}

/// Fold a decision table into a new state table
pub fn apply_schedule(
    states: &BTreeMap<String, CheckState>,
    schedule: &[ScheduledCheck],
    now: DateTime<Utc>,
) -> BTreeMap<String, CheckState> {
    let mut next = states.clone();
    for row in schedule {
        let current = states
            .get(&row.check.id)
            .cloned()
            .unwrap_or_else(|| CheckState::never_run(&row.check.id));
        next.insert(
            row.check.id.clone(),
            current.record_decision(&row.check, &row.decision, now),
        );
    }
    next
}

/// Tokens avoided by a check versus running it unconditionally
pub fn estimate_token_savings(state: &CheckState) -> u64 {
    state.tokens_saved
}

/// Savings summed over a state table
pub fn total_token_savings(states: &BTreeMap<String, CheckState>) -> u64 {
    states
        .values()
        .map(estimate_token_savings)
        .fold(0u64, u64::saturating_add)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::quiet_hours::QuietWindow;
    use chrono::{NaiveTime, TimeZone};
    use proptest::prelude::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // Monday 2024-01-01 at the given UTC time
    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            checks: vec![
                CheckType::new("email", "Email", 3600, 1800, 800),
                CheckType::new("weather", "Weather", 14400, 600, 300),
                CheckType::new("monitoring", "Monitoring", 1800, 900, 600).critical(),
            ],
            max_backoff_multiplier: 4.0,
            backoff_growth: 2.0,
            quiet_hours: QuietHours::nightly(hm(23, 0), hm(8, 0)),
        }
    }

    fn ran_at(id: &str, when: DateTime<Utc>) -> CheckState {
        CheckState {
            last_run_at: Some(when),
            ..CheckState::never_run(id)
        }
    }

    #[test]
    fn test_backoff_factor_is_capped() {
        let cfg = config();
        assert_eq!(cfg.backoff_factor(0), 1.0);
        assert_eq!(cfg.backoff_factor(1), 2.0);
        assert_eq!(cfg.backoff_factor(2), 4.0);
        assert_eq!(cfg.backoff_factor(3), 4.0);
        assert_eq!(cfg.backoff_factor(u32::MAX), 4.0);
    }

    #[test]
    fn test_effective_interval_clamped() {
        let cfg = config();
        let email = cfg.check("email").unwrap();
        assert_eq!(cfg.effective_interval(email, 0), Duration::seconds(3600));
        assert_eq!(cfg.effective_interval(email, 1), Duration::seconds(7200));
        assert_eq!(cfg.effective_interval(email, 50), Duration::seconds(14400));

        // The floor wins when the multiplier would shrink the interval
        let shrinking = SchedulerConfig {
            max_backoff_multiplier: 1.0,
            ..config()
        };
        let check = CheckType::new("tight", "Tight", 100, 100, 1);
        assert_eq!(shrinking.effective_interval(&check, 3), Duration::seconds(100));
    }

    #[test]
    fn test_defer_until_interval_elapses() {
        let cfg = config();
        let email = cfg.check("email").unwrap();
        let state = ran_at("email", at(12, 0));
        let decision = should_check(&state, email, &cfg, at(12, 30), false);
        assert_eq!(decision, Decision::Defer { until: at(13, 0) });
        assert_eq!(should_check(&state, email, &cfg, at(13, 0), false), Decision::Run);
    }

    #[test]
    fn test_skip_streak_stretches_defer() {
        let cfg = config();
        let email = cfg.check("email").unwrap();
        let state = CheckState {
            consecutive_skips: 1,
            ..ran_at("email", at(10, 0))
        };
        assert_eq!(
            should_check(&state, email, &cfg, at(11, 30), false),
            Decision::Defer { until: at(12, 0) }
        );
    }

    #[test]
    fn test_quiet_hours_skip_non_critical() {
        let cfg = config();
        let email = cfg.check("email").unwrap();
        let monitoring = cfg.check("monitoring").unwrap();
        let state = ran_at("email", at(0, 0) - Duration::hours(5));
        assert_eq!(
            should_check(&state, email, &cfg, at(2, 0), false),
            Decision::Skip { reason: SkipReason::QuietPeriod }
        );
        let state = ran_at("monitoring", at(0, 0) - Duration::hours(5));
        assert_eq!(should_check(&state, monitoring, &cfg, at(2, 0), true), Decision::Run);
    }

    #[test]
    fn test_idle_override_lifts_quiet_hours() {
        let mut cfg = config();
        cfg.quiet_hours.idle_override = true;
        let email = cfg.check("email").unwrap().clone();
        let state = CheckState::never_run("email");
        assert_eq!(should_check(&state, &email, &cfg, at(2, 0), false), Decision::Run);
        assert_eq!(
            should_check(&state, &email, &cfg, at(2, 0), true),
            Decision::Skip { reason: SkipReason::QuietPeriod }
        );
    }

    #[test]
    fn test_busy_skips_non_critical() {
        let cfg = config();
        let email = cfg.check("email").unwrap();
        let state = CheckState::never_run("email");
        assert_eq!(
            should_check(&state, email, &cfg, at(14, 0), true),
            Decision::Skip { reason: SkipReason::Busy }
        );
    }

    #[test]
    fn test_never_run_bias() {
        let cfg = config();
        let never = |id: &str| CheckState::never_run(id);
        let monitoring = cfg.check("monitoring").unwrap();
        let email = cfg.check("email").unwrap();

        for (now, busy) in [(at(2, 0), true), (at(2, 0), false), (at(14, 0), true), (at(14, 0), false)] {
            assert_eq!(should_check(&never("monitoring"), monitoring, &cfg, now, busy), Decision::Run);
        }
        assert_eq!(should_check(&never("email"), email, &cfg, at(14, 0), false), Decision::Run);
        assert!(!should_check(&never("email"), email, &cfg, at(2, 0), false).is_run());
        assert!(!should_check(&never("email"), email, &cfg, at(14, 0), true).is_run());
    }

    #[test]
    fn test_schedule_orders_runs_by_tightest_deadline() {
        let cfg = config();
        let mut states = BTreeMap::new();
        states.insert("email".to_string(), ran_at("email", at(13, 30)));

        let schedule = compute_check_schedule(&states, &cfg, at(14, 0), false);
        let order: Vec<&str> = schedule.iter().map(|r| r.check.id.as_str()).collect();
        // weather (min 600) and monitoring (min 900) run; email is deferred
        assert_eq!(order, vec!["weather", "monitoring", "email"]);
        assert!(schedule[0].decision.is_run());
        assert!(schedule[1].decision.is_run());
        assert_eq!(schedule[2].decision, Decision::Defer { until: at(14, 30) });
    }

    #[test]
    fn test_apply_schedule_and_savings() {
        let cfg = config();
        let states = BTreeMap::new();
        let now = at(14, 0);

        let schedule = compute_check_schedule(&states, &cfg, now, true);
        let next = apply_schedule(&states, &schedule, now);
        // busy: email and weather skipped, monitoring ran
        assert_eq!(next["email"].consecutive_skips, 1);
        assert_eq!(next["monitoring"].last_run_at, Some(now));
        assert_eq!(total_token_savings(&next), 800 + 300);
        assert!(states.is_empty());
    }

    #[test]
    fn test_scaled_config_only_slows_down() {
        let cfg = config();
        let slow = cfg.scaled(2.0);
        assert_eq!(slow.check("email").unwrap().baseline_interval_s, 7200);
        assert_eq!(slow.check("email").unwrap().minimum_interval_s, 1800);
        assert_eq!(cfg.scaled(0.5), cfg);
        assert_eq!(cfg.scaled(f64::NAN), cfg);
    }

    #[test]
    fn test_default_catalog_respects_invariants() {
        let cfg = SchedulerConfig::default();
        assert!(cfg.checks.iter().all(|c| c.minimum_interval_s <= c.baseline_interval_s));
        assert!(cfg.checks.iter().any(|c| c.critical));
        assert!(cfg.quiet_hours.overlapping_pairs().is_empty());
        assert_eq!(cfg.quiet_hours.windows, vec![QuietWindow::daily(hm(23, 0), hm(8, 0))]);
    }

    fn decision_strategy() -> impl Strategy<Value = Decision> {
        prop_oneof![
            Just(Decision::Run),
            Just(Decision::Skip { reason: SkipReason::Busy }),
            Just(Decision::Skip { reason: SkipReason::QuietPeriod }),
            (0i64..86_400).prop_map(|s| Decision::Defer { until: at(0, 0) + Duration::seconds(s) }),
        ]
    }

    proptest! {
        #[test]
        fn prop_should_check_is_deterministic(
            minutes_since in proptest::option::of(0i64..10_000),
            skips in 0u32..20,
            minute_of_day in 0i64..1440,
            busy in any::<bool>(),
        ) {
            let cfg = config();
            let now = at(0, 0) + Duration::minutes(minute_of_day);
            let state = CheckState {
                last_run_at: minutes_since.map(|m| now - Duration::minutes(m)),
                consecutive_skips: skips,
                ..CheckState::never_run("email")
            };
            let email = cfg.check("email").unwrap();
            let first = should_check(&state, email, &cfg, now, busy);
            let second = should_check(&state.clone(), email, &cfg.clone(), now, busy);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_savings_never_decrease(decisions in proptest::collection::vec(decision_strategy(), 0..40)) {
            let cfg = config();
            let email = cfg.check("email").unwrap();
            let mut state = CheckState::never_run("email");
            let mut previous = estimate_token_savings(&state);
            for decision in &decisions {
                state = state.record_decision(email, decision, at(12, 0));
                let current = estimate_token_savings(&state);
                prop_assert!(current >= previous);
                if !decision.is_run() {
                    prop_assert!(current > previous);
                }
                previous = current;
            }
        }
    }
}
