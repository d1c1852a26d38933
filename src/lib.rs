// Token Governor Library
// Check scheduling, budget governance and context classification for agent skills

pub mod budget;
pub mod config;
pub mod context;
pub mod schedule;
pub mod state;

mod timing;

// Re-export commonly used types for CLI
pub use budget::{
    calculate_spending_velocity, compute_optimization_actions, determine_optimal_tier,
    spending_velocity_at, BudgetPolicy, BudgetState, ModelTier, OptimizationAction,
    OptimizationResult, TierCatalog, TriggerReason, UsageMetrics, UsageSample,
};
pub use config::{validate_config, ConfigLoadError, ConfigViolation, ConfigurationError, GovernorConfig};
pub use context::{
    classify_complexity, count_tokens, get_allowed_files, is_valid_file_name,
    ClassificationSignals, ComplexityLevel, ContextPolicy,
};
pub use schedule::{
    apply_schedule, compute_check_schedule, estimate_token_savings, should_check,
    total_token_savings, CheckState, CheckStatus, CheckType, Decision, SchedulerConfig,
    SkipReason,
};
pub use state::{StateError, StateStore};
