//! Budget Governance Module
//!
//! Keeps an agent inside a token allowance for an accounting period by
//! measuring spend velocity, choosing an operating tier and pausing spend
//! when even the cheapest tier would overrun the budget.

pub mod governor;
pub mod tier;
pub mod velocity;

pub use governor::{
    compute_optimization_actions, determine_optimal_tier, BudgetPolicy, BudgetState,
    EvaluationRecord, OptimizationAction, OptimizationResult, PauseRecord, TierDecision,
    TierPressure, TriggerReason,
};
pub use tier::{ModelTier, TierCatalog, TierSpec};
pub use velocity::{
    calculate_spending_velocity, spending_velocity_at, UsageMetrics, UsageSample, VelocityConfig,
};
