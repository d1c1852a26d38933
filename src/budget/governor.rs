//! Budget Governor
//!
//! Projects end-of-period spend from the current velocity, picks the most
//! capable tier the remaining budget can carry, and issues throttle/resume
//! actions. Tier moves are damped: a move needs K consecutive evaluations
//! pointing the same way, counted from the evaluation ring in the state.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::VecDeque;

use super::tier::{ModelTier, TierCatalog};
use super::velocity::{spending_velocity_at, UsageMetrics, VelocityConfig};
use crate::timing;

pub const DEFAULT_BUDGET_LIMIT: u64 = 1_000_000;
pub const DEFAULT_PERIOD_DAYS: i64 = 30;
pub const DEFAULT_HYSTERESIS_WINDOW: u32 = 3;
pub const DEFAULT_RING_CAPACITY: usize = 8;
pub const DEFAULT_TOLERANCE_FRACTION: f64 = 0.1;

/// Budget configuration for one accounting period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetPolicy {
    pub budget_limit: u64,
    /// Defaults to today's UTC midnight when omitted, so a policy built
    /// without it differs from day to day. Set both period fields for a
    /// fixed calendar.
    pub period_start: DateTime<Utc>,
    /// Defaults to 30 days after `period_start` when omitted
    pub period_end: DateTime<Utc>,
    /// Consecutive same-direction evaluations required to move a tier
    pub hysteresis_window_k: u32,
    /// Evaluation records kept in the state ring
    pub evaluation_ring_capacity: usize,
    pub tier_catalog: TierCatalog,
    /// Overshoot allowed before the governor pauses spending
    pub tolerance_fraction: f64,
    pub velocity: VelocityConfig,
}

impl BudgetPolicy {
    /// Length of one accounting period; falls back to the default length
    /// when the configured period is empty or inverted
    pub fn period_length(&self) -> Duration {
        let length = self.period_end - self.period_start;
        if length > Duration::zero() {
            length
        } else {
            Duration::days(DEFAULT_PERIOD_DAYS)
        }
    }
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        let period_start = Utc::now()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();
        Self {
            budget_limit: DEFAULT_BUDGET_LIMIT,
            period_start,
            period_end: timing::add(period_start, Duration::days(DEFAULT_PERIOD_DAYS)),
            hysteresis_window_k: DEFAULT_HYSTERESIS_WINDOW,
            evaluation_ring_capacity: DEFAULT_RING_CAPACITY,
            tier_catalog: TierCatalog::default(),
            tolerance_fraction: DEFAULT_TOLERANCE_FRACTION,
            velocity: VelocityConfig::default(),
        }
    }
}

/// Why the governor acted (or did not)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    VelocityExceeded,
    BudgetExceeded,
    BudgetHeadroom,
    QuietPeriod,
    ManualOverride,
    ConfigDefault,
}

/// Direction the budget pushes the tier at one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierPressure {
    /// Candidate is below the current tier
    Overshoot,
    Steady,
    /// Candidate is above the current tier
    Headroom,
}

/// One entry of the hysteresis ring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub evaluated_at: DateTime<Utc>,
    /// Tier in force when the evaluation was made
    pub tier: ModelTier,
    pub candidate: ModelTier,
    pub pressure: TierPressure,
    pub projected_spend: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseRecord {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub reason: TriggerReason,
}

/// Immutable budget snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub cumulative_spent: u64,
    pub budget_limit: u64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub current_tier: ModelTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<PauseRecord>,
    /// Operator pin that overrides tier selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_tier: Option<ModelTier>,
    #[serde(default)]
    pub evaluations: VecDeque<EvaluationRecord>,
}

impl BudgetState {
    /// Fresh period at the most capable configured tier
    pub fn new(policy: &BudgetPolicy) -> Self {
        Self {
            cumulative_spent: 0,
            budget_limit: policy.budget_limit,
            period_start: policy.period_start,
            period_end: policy.period_end,
            current_tier: policy
                .tier_catalog
                .highest()
                .map(|s| s.tier)
                .unwrap_or(ModelTier::Premium),
            paused: None,
            manual_tier: None,
            evaluations: VecDeque::new(),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.budget_limit.saturating_sub(self.cumulative_spent)
    }

    /// Fraction of the limit already spent (may exceed 1.0)
    pub fn usage_fraction(&self) -> f64 {
        if self.budget_limit == 0 {
            return 1.0;
        }
        self.cumulative_spent as f64 / self.budget_limit as f64
    }

    /// Time left in the period, never negative
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.period_end - now).max(Duration::zero())
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused.as_ref().is_some_and(|p| p.until > now)
    }

    /// New state with `tokens` added to the period spend
    pub fn with_spend(&self, tokens: u64) -> Self {
        Self {
            cumulative_spent: self.cumulative_spent.saturating_add(tokens),
            ..self.clone()
        }
    }

    /// New state pinned to (or released from) a manual tier
    pub fn with_manual_tier(&self, tier: Option<ModelTier>) -> Self {
        Self {
            manual_tier: tier,
            ..self.clone()
        }
    }

    /// Start the next accounting period: spend, pause and ring are reset,
    /// the tier and any manual pin carry over.
    pub fn roll_period(&self, policy: &BudgetPolicy) -> Self {
        Self {
            cumulative_spent: 0,
            budget_limit: policy.budget_limit,
            period_start: policy.period_start,
            period_end: policy.period_end,
            paused: None,
            evaluations: VecDeque::new(),
            ..self.clone()
        }
    }

    /// State for the period that contains `now`.
    ///
    /// A live period is returned unchanged. An expired one rolls to the
    /// policy's period when the policy has moved past it, otherwise to the
    /// next period of the policy's length that contains `now`.
    pub fn rolled_to(&self, policy: &BudgetPolicy, now: DateTime<Utc>) -> Self {
        if now < self.period_end {
            return self.clone();
        }
        if policy.period_start >= self.period_end && now < policy.period_end {
            return self.roll_period(policy);
        }

        let length_s = policy.period_length().num_seconds().max(1);
        let overdue_s = (now - self.period_end).num_seconds().max(0);
        let skipped_s = (overdue_s / length_s).saturating_mul(length_s);
        let period_start = timing::add(self.period_end, timing::seconds(skipped_s.unsigned_abs()));
        let period_end = timing::add(period_start, timing::seconds(length_s.unsigned_abs()));
        self.roll_period(&BudgetPolicy {
            period_start,
            period_end,
            ..policy.clone()
        })
    }

    /// Number of most recent evaluations made at the current tier that all
    /// carried `pressure`
    pub fn trailing_pressure(&self, pressure: TierPressure) -> usize {
        self.evaluations
            .iter()
            .rev()
            .take_while(|r| r.tier == self.current_tier && r.pressure == pressure)
            .count()
    }

    /// Fold an optimization result into the next state
    pub fn accept(&self, result: &OptimizationResult, ring_capacity: usize) -> Self {
        let mut next = self.clone();
        next.evaluations.push_back(result.evaluation.clone());
        while next.evaluations.len() > ring_capacity {
            next.evaluations.pop_front();
        }
        next.current_tier = result.new_tier;

        for action in &result.actions {
            match action {
                OptimizationAction::Pause { until, reason } => {
                    next.paused = Some(PauseRecord {
                        since: result.evaluation.evaluated_at,
                        until: *until,
                        reason: *reason,
                    });
                }
                OptimizationAction::Resume { .. } => next.paused = None,
                OptimizationAction::TierChange { .. } | OptimizationAction::NoOp { .. } => {}
            }
        }
        next
    }
}

/// Action the caller should take after an evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OptimizationAction {
    NoOp { reason: TriggerReason },
    TierChange { to: ModelTier, reason: TriggerReason },
    Pause { until: DateTime<Utc>, reason: TriggerReason },
    Resume { reason: TriggerReason },
}

impl OptimizationAction {
    pub fn reason(&self) -> TriggerReason {
        match self {
            OptimizationAction::NoOp { reason }
            | OptimizationAction::TierChange { reason, .. }
            | OptimizationAction::Pause { reason, .. }
            | OptimizationAction::Resume { reason } => *reason,
        }
    }
}

/// Outcome of tier selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDecision {
    /// Tier to operate at after this evaluation
    pub tier: ModelTier,
    /// Best tier the budget carries right now, before hysteresis
    pub candidate: ModelTier,
    pub pressure: TierPressure,
    pub projected_spend: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<TriggerReason>,
}

/// Full result of one governor evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub actions: Vec<OptimizationAction>,
    pub new_tier: ModelTier,
    pub projected_spend: f64,
    /// Tokens per second
    pub velocity: f64,
    pub remaining: u64,
    /// Record to append to the hysteresis ring
    pub evaluation: EvaluationRecord,
}

/// Highest tier whose projected cost fits the remaining budget.
/// Returns the lowest tier and `false` when nothing fits.
fn select_candidate(
    catalog: &TierCatalog,
    projected_spend: f64,
    remaining: u64,
    fallback: ModelTier,
) -> (ModelTier, bool) {
    let Some(lowest) = catalog.lowest() else {
        return (fallback, true);
    };
    if remaining == 0 {
        return (lowest.tier, false);
    }

    let mut specs: Vec<_> = catalog.specs().iter().collect();
    specs.sort_by(|a, b| b.tier.cmp(&a.tier));
    specs
        .into_iter()
        .find(|s| projected_spend * s.cost_multiplier <= remaining as f64)
        .map(|s| (s.tier, true))
        .unwrap_or((lowest.tier, false))
}

/// Pick the operating tier for the rest of the period
pub fn determine_optimal_tier(
    policy: &BudgetPolicy,
    budget: &BudgetState,
    velocity: f64,
    now: DateTime<Utc>,
) -> TierDecision {
    let velocity = if velocity.is_finite() { velocity.max(0.0) } else { 0.0 };
    let projected_spend = velocity * timing::as_secs_f64(budget.time_remaining(now));
    let remaining = budget.remaining();
    let current = budget.current_tier;

    let (candidate, fits) =
        select_candidate(&policy.tier_catalog, projected_spend, remaining, current);
    let pressure = match candidate.cmp(&current) {
        Ordering::Less => TierPressure::Overshoot,
        Ordering::Equal => TierPressure::Steady,
        Ordering::Greater => TierPressure::Headroom,
    };

    if let Some(pinned) = budget.manual_tier {
        return TierDecision {
            tier: pinned,
            candidate,
            pressure,
            projected_spend,
            reason: Some(TriggerReason::ManualOverride),
        };
    }

    let required = policy.hysteresis_window_k as usize;
    let sustained = pressure != TierPressure::Steady
        && budget.trailing_pressure(pressure) + 1 >= required;

    let (tier, reason) = if sustained {
        let reason = match pressure {
            _ if !fits => TriggerReason::BudgetExceeded,
            TierPressure::Overshoot => TriggerReason::VelocityExceeded,
            _ => TriggerReason::BudgetHeadroom,
        };
        (candidate, Some(reason))
    } else if !fits {
        (current, Some(TriggerReason::BudgetExceeded))
    } else {
        (current, None)
    };

    TierDecision {
        tier,
        candidate,
        pressure,
        projected_spend,
        reason,
    }
}

/// Evaluate the budget and list the actions the caller should apply
pub fn compute_optimization_actions(
    policy: &BudgetPolicy,
    budget: &BudgetState,
    metrics: &UsageMetrics,
    now: DateTime<Utc>,
) -> OptimizationResult {
    let velocity = spending_velocity_at(metrics, &policy.velocity, now);
    let decision = determine_optimal_tier(policy, budget, velocity, now);
    let remaining = budget.remaining();

    let mut actions = Vec::new();
    if decision.tier != budget.current_tier {
        actions.push(OptimizationAction::TierChange {
            to: decision.tier,
            reason: decision.reason.unwrap_or(TriggerReason::ConfigDefault),
        });
    }

    let lowest_multiplier = policy
        .tier_catalog
        .lowest()
        .map(|s| s.cost_multiplier)
        .unwrap_or(1.0);
    let tolerance = policy.tolerance_fraction.max(0.0);
    let over_budget = remaining == 0
        || decision.projected_spend * lowest_multiplier > remaining as f64 * (1.0 + tolerance);

    match &budget.paused {
        Some(pause) if pause.until <= now => actions.push(OptimizationAction::Resume {
            reason: TriggerReason::ConfigDefault,
        }),
        Some(_) if !over_budget => actions.push(OptimizationAction::Resume {
            reason: TriggerReason::BudgetHeadroom,
        }),
        None if over_budget && now < budget.period_end => actions.push(OptimizationAction::Pause {
            until: budget.period_end,
            reason: TriggerReason::BudgetExceeded,
        }),
        _ => {}
    }

    if actions.is_empty() {
        actions.push(OptimizationAction::NoOp {
            reason: TriggerReason::ConfigDefault,
        });
    }

    OptimizationResult {
        actions,
        new_tier: decision.tier,
        projected_spend: decision.projected_spend,
        velocity,
        remaining,
        evaluation: EvaluationRecord {
            evaluated_at: now,
            tier: budget.current_tier,
            candidate: decision.candidate,
            pressure: decision.pressure,
            projected_spend: decision.projected_spend,
        },
    }
}
