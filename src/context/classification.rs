//! Task Classification
//!
//! Scores a new task against each complexity level and picks the level that
//! bounds how much context the task may load.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::sources::ContextPolicy;
use super::tokens::count_tokens;

/// Token count at which a task leans moderate
const MODERATE_TOKEN_THRESHOLD: u32 = 150;
/// Token count at which a task leans complex
const COMPLEX_TOKEN_THRESHOLD: u32 = 400;
const COMPLEX_FILE_REFERENCES: usize = 3;

/// Ordered complexity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    /// Greetings and acknowledgements
    Trivial,
    /// Lookups and short factual requests
    Simple,
    /// Ordinary implementation or analysis work
    Moderate,
    /// Multi-step design or cross-cutting work
    Complex,
}

impl ComplexityLevel {
    pub const ALL: [ComplexityLevel; 4] = [
        ComplexityLevel::Trivial,
        ComplexityLevel::Simple,
        ComplexityLevel::Moderate,
        ComplexityLevel::Complex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityLevel::Trivial => "trivial",
            ComplexityLevel::Simple => "simple",
            ComplexityLevel::Moderate => "moderate",
            ComplexityLevel::Complex => "complex",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::str::FromStr for ComplexityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComplexityLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown complexity level: {}", s))
    }
}

// Keyword sets, matched on whole words of the normalized task
static SIMPLE_KEYWORDS: &[&str] = &[
    "what is", "what time", "when is", "remind", "reminder", "lookup", "look up",
    "check", "list", "show", "weather", "quick", "summarize", "define",
];

static MODERATE_KEYWORDS: &[&str] = &[
    "implement", "fix", "debug", "write", "update", "refactor", "analyze",
    "review", "test", "explain", "draft", "compare", "investigate",
];

static COMPLEX_KEYWORDS: &[&str] = &[
    "architecture", "design", "migrate", "migration", "security audit", "strategy",
    "plan", "thorough", "deep dive", "end to end", "multi step", "across",
];

lazy_static::lazy_static! {
    static ref GREETING: Option<Regex> = Regex::new(
        r"(?i)^\s*(hi|hello|hey|yo|thanks|thank you|thx|ok|okay|yes|no|sure|bye|good (morning|evening|night)|ping)[\s!.?]*$"
    )
    .ok();
    static ref FILE_REFERENCE: Option<Regex> = Regex::new(
        r"(?i)\b[\w\-/]*\w\.(rs|md|py|ts|tsx|js|json|toml|ya?ml|txt|go|java|c|h|cpp|sh|html|css|sql)\b"
    )
    .ok();
}

/// Structural signals extracted from a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationSignals {
    /// Extra keywords supplied by the caller
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub token_count: u32,
    /// Distinct file paths mentioned in the task
    #[serde(default)]
    pub file_references: usize,
    #[serde(default)]
    pub has_code_block: bool,
    /// Caller override; wins over every other signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_level: Option<ComplexityLevel>,
}

impl ClassificationSignals {
    /// Derive signals from the task text
    pub fn from_task(task: &str) -> Self {
        let file_references = FILE_REFERENCE.as_ref().map_or(0, |re| {
            re.find_iter(task)
                .map(|m| m.as_str().to_ascii_lowercase())
                .collect::<BTreeSet<_>>()
                .len()
        });
        Self {
            keywords: Vec::new(),
            token_count: count_tokens(task),
            file_references,
            has_code_block: task.contains("```"),
            requested_level: None,
        }
    }
}

/// Lowercase, split on anything that is not alphanumeric, and pad with
/// spaces so keywords match on word boundaries
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}

fn keyword_hits(haystack: &str, keywords: &[&str]) -> u32 {
    keywords
        .iter()
        .filter(|kw| haystack.contains(&format!(" {} ", kw)))
        .count() as u32
}

/// Per-level scores, indexed in level order
pub fn level_scores(task: &str, signals: &ClassificationSignals) -> [(ComplexityLevel, u32); 4] {
    let mut scores = [0u32; 4];

    let mut text = normalize(task);
    for keyword in &signals.keywords {
        text.push_str(normalize(keyword).trim_start());
    }

    if GREETING.as_ref().is_some_and(|re| re.is_match(task)) {
        scores[ComplexityLevel::Trivial.index()] += 2;
    }
    scores[ComplexityLevel::Simple.index()] += keyword_hits(&text, SIMPLE_KEYWORDS);
    scores[ComplexityLevel::Moderate.index()] += keyword_hits(&text, MODERATE_KEYWORDS);
    scores[ComplexityLevel::Complex.index()] += keyword_hits(&text, COMPLEX_KEYWORDS);

    if signals.token_count >= MODERATE_TOKEN_THRESHOLD {
        scores[ComplexityLevel::Moderate.index()] += 1;
    }
    if signals.token_count >= COMPLEX_TOKEN_THRESHOLD {
        scores[ComplexityLevel::Complex.index()] += 1;
    }
    if signals.file_references >= 1 {
        scores[ComplexityLevel::Moderate.index()] += 1;
    }
    if signals.file_references >= COMPLEX_FILE_REFERENCES {
        scores[ComplexityLevel::Complex.index()] += 1;
    }
    if signals.has_code_block {
        scores[ComplexityLevel::Moderate.index()] += 1;
    }

    ComplexityLevel::ALL.map(|level| (level, scores[level.index()]))
}

/// Classify a task into a complexity level.
///
/// Levels are checked from `complex` down and the first maximal score wins,
/// so ties go to the higher level. With no signal at all the policy's
/// default level is returned.
pub fn classify_complexity(
    task: &str,
    signals: &ClassificationSignals,
    policy: &ContextPolicy,
) -> ComplexityLevel {
    if let Some(level) = signals.requested_level {
        return level;
    }

    let scores = level_scores(task, signals);
    let mut best: Option<(ComplexityLevel, u32)> = None;
    for &(level, score) in scores.iter().rev() {
        if score > 0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((level, score));
        }
    }

    best.map_or(policy.default_level, |(level, _)| level)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(task: &str) -> ComplexityLevel {
        classify_complexity(task, &ClassificationSignals::from_task(task), &ContextPolicy::default())
    }

    #[test]
    fn test_greeting_is_trivial() {
        assert_eq!(classify("hi"), ComplexityLevel::Trivial);
        assert_eq!(classify("Thanks!"), ComplexityLevel::Trivial);
        assert_eq!(classify("good morning"), ComplexityLevel::Trivial);
    }

    #[test]
    fn test_lookup_is_simple() {
        assert_eq!(classify("what is the weather tomorrow"), ComplexityLevel::Simple);
    }

    #[test]
    fn test_implementation_is_moderate() {
        assert_eq!(classify("fix the failing login test"), ComplexityLevel::Moderate);
        assert_eq!(classify("look at src/main.rs please"), ComplexityLevel::Moderate);
    }

    #[test]
    fn test_design_is_complex() {
        assert_eq!(
            classify("plan the architecture for the billing migration"),
            ComplexityLevel::Complex
        );
    }

    #[test]
    fn test_ties_resolve_upward() {
        let task = "fix the architecture";
        let scores = level_scores(task, &ClassificationSignals::default());
        assert_eq!(scores[2], (ComplexityLevel::Moderate, 1));
        assert_eq!(scores[3], (ComplexityLevel::Complex, 1));
        assert_eq!(classify(task), ComplexityLevel::Complex);
    }

    #[test]
    fn test_no_signal_uses_default() {
        assert_eq!(classify(""), ComplexityLevel::Moderate);
        assert_eq!(classify("zebra"), ComplexityLevel::Moderate);

        let policy = ContextPolicy {
            default_level: ComplexityLevel::Complex,
            ..Default::default()
        };
        let level = classify_complexity("zebra", &ClassificationSignals::default(), &policy);
        assert_eq!(level, ComplexityLevel::Complex);
    }

    #[test]
    fn test_requested_level_wins() {
        let signals = ClassificationSignals {
            requested_level: Some(ComplexityLevel::Trivial),
            ..ClassificationSignals::from_task("design the architecture")
        };
        let level = classify_complexity("design the architecture", &signals, &ContextPolicy::default());
        assert_eq!(level, ComplexityLevel::Trivial);
    }

    #[test]
    fn test_caller_keywords_count() {
        let signals = ClassificationSignals {
            keywords: vec!["security audit".to_string()],
            ..Default::default()
        };
        let level = classify_complexity("zebra", &signals, &ContextPolicy::default());
        assert_eq!(level, ComplexityLevel::Complex);
    }

    #[test]
    fn test_signals_from_task() {
        let task = "Compare src/lib.rs with docs/README.md and src/lib.rs\n```rust\nfn main() {}\n```";
        let signals = ClassificationSignals::from_task(task);
        assert_eq!(signals.file_references, 2);
        assert!(signals.has_code_block);
        assert!(signals.token_count > 0);
    }

    #[test]
    fn test_keywords_match_whole_words() {
        // "listing" must not match "list", "tested" must not match "test"
        let scores = level_scores("listing tested", &ClassificationSignals::default());
        assert!(scores.iter().all(|(_, s)| *s == 0));
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("Complex".parse::<ComplexityLevel>().unwrap(), ComplexityLevel::Complex);
        assert!("huge".parse::<ComplexityLevel>().is_err());
    }
}
