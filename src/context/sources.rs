//! Context Sources
//!
//! Catalog of files an agent may load at startup, and the per-level policy
//! that bounds how many of them (and which) a task gets.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::classification::ComplexityLevel;

const MAX_FILE_NAME_LEN: usize = 255;

/// A file the agent may load, available from `min_level` upwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSourceEntry {
    pub name: String,
    pub min_level: ComplexityLevel,
}

impl ContextSourceEntry {
    pub fn new(name: &str, min_level: ComplexityLevel) -> Self {
        Self {
            name: name.to_string(),
            min_level,
        }
    }
}

/// File ceiling and allowed patterns for one complexity level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPolicy {
    pub level: ComplexityLevel,
    pub max_files: usize,
    /// Glob patterns; empty allows any valid name
    #[serde(default)]
    pub allowed_patterns: Vec<String>,
}

impl LevelPolicy {
    pub fn new(level: ComplexityLevel, max_files: usize, patterns: &[&str]) -> Self {
        Self {
            level,
            max_files,
            allowed_patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

fn default_level() -> ComplexityLevel {
    ComplexityLevel::Moderate
}

/// Context loading policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPolicy {
    /// Level used when classification finds no signal
    #[serde(default = "default_level")]
    pub default_level: ComplexityLevel,
    #[serde(default)]
    pub levels: Vec<LevelPolicy>,
    /// Sources in priority order
    #[serde(default)]
    pub catalog: Vec<ContextSourceEntry>,
}

impl Default for ContextPolicy {
    fn default() -> Self {
        use ComplexityLevel::*;
        Self {
            default_level: Moderate,
            levels: vec![
                LevelPolicy::new(Trivial, 2, &["*.md"]),
                LevelPolicy::new(Simple, 4, &["*.md", "memory/*.md"]),
                LevelPolicy::new(Moderate, 7, &["*.md", "memory/*.md"]),
                LevelPolicy::new(Complex, 10, &["**"]),
            ],
            catalog: vec![
                ContextSourceEntry::new("SOUL.md", Trivial),
                ContextSourceEntry::new("IDENTITY.md", Trivial),
                ContextSourceEntry::new("USER.md", Simple),
                ContextSourceEntry::new("memory/today.md", Simple),
                ContextSourceEntry::new("TOOLS.md", Moderate),
                ContextSourceEntry::new("AGENTS.md", Moderate),
                ContextSourceEntry::new("MEMORY.md", Moderate),
                ContextSourceEntry::new("memory/projects.md", Complex),
                ContextSourceEntry::new("docs/architecture.md", Complex),
            ],
        }
    }
}

impl ContextPolicy {
    pub fn level(&self, level: ComplexityLevel) -> Option<&LevelPolicy> {
        self.levels.iter().find(|p| p.level == level)
    }
}

/// Validate a catalog file name (relative path, no traversal)
pub fn is_valid_file_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_FILE_NAME_LEN {
        return false;
    }
    if name.starts_with('/') || name.contains('\\') || name.contains(':') {
        return false;
    }
    name.split('/').all(|segment| {
        !segment.is_empty()
            && segment != "."
            && segment != ".."
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    })
}

/// Compile a source glob into an anchored regex.
///
/// `**` matches across path segments, `*` within one segment, `?` one
/// character. Returns `None` for empty patterns or characters outside the
/// file-name alphabet.
pub fn compile_pattern(pattern: &str) -> Option<Regex> {
    if pattern.is_empty() {
        return None;
    }

    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                expr.push_str(".*");
            }
            '*' => expr.push_str("[^/]*"),
            '?' => expr.push_str("[^/]"),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/') => {
                expr.push_str(&regex::escape(&c.to_string()));
            }
            _ => return None,
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

/// Files a task at `level` may load, in catalog priority order.
///
/// Entries must be available at `level`, have a valid name and match one of
/// the level's patterns. The result is truncated to the level's ceiling; a
/// level without a policy gets nothing.
pub fn get_allowed_files(
    level: ComplexityLevel,
    catalog: &[ContextSourceEntry],
    policy: &ContextPolicy,
) -> Vec<String> {
    let Some(level_policy) = policy.level(level) else {
        return Vec::new();
    };
    let patterns: Vec<Regex> = level_policy
        .allowed_patterns
        .iter()
        .filter_map(|p| compile_pattern(p))
        .collect();
    let unrestricted = level_policy.allowed_patterns.is_empty();

    catalog
        .iter()
        .filter(|entry| entry.min_level <= level)
        .filter(|entry| is_valid_file_name(&entry.name))
        .filter(|entry| unrestricted || patterns.iter().any(|re| re.is_match(&entry.name)))
        .take(level_policy.max_files)
        .map(|entry| entry.name.clone())
        .collect()
}
