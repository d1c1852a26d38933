//! Context Management Module
//!
//! Classifies a new task by complexity and resolves which startup files it
//! may load, so trivial requests do not pay for the full agent memory.

pub mod classification;
pub mod sources;
pub mod tokens;

// Re-export public types for external use
pub use classification::{classify_complexity, level_scores, ClassificationSignals, ComplexityLevel};
pub use sources::{
    compile_pattern, get_allowed_files, is_valid_file_name, ContextPolicy, ContextSourceEntry,
    LevelPolicy,
};
pub use tokens::{count_tokens, estimate_tokens_quick};
