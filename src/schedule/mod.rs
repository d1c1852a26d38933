//! Check Scheduling Module
//!
//! Decides when periodic monitoring checks should fire, using adaptive
//! intervals that back off while a check keeps getting skipped and a
//! quiet-hours policy that holds non-critical work overnight.

pub mod check;
pub mod quiet_hours;
pub mod scheduler;

pub use check::{CheckState, CheckStatus, CheckType};
pub use quiet_hours::{QuietHours, QuietWindow};
pub use scheduler::{
    apply_schedule, compute_check_schedule, estimate_token_savings, should_check,
    total_token_savings, Decision, ScheduledCheck, SchedulerConfig, SkipReason,
};
