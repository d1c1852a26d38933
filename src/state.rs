//! State Store
//!
//! JSON persistence for the records the engines consume: per-check state,
//! the budget snapshot and the usage series. Every file is written with an
//! atomic tmp-and-rename, and unreadable per-check entries are skipped.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::budget::{BudgetPolicy, BudgetState, UsageMetrics};
use crate::schedule::CheckState;

/// Directory name under the platform data dir
pub const APP_DIR_NAME: &str = "token-governor";
/// Overrides the data directory when set
pub const HOME_ENV: &str = "TOKEN_GOVERNOR_HOME";

const CHECKS_FILE: &str = "checks.json";
const BUDGET_FILE: &str = "budget.json";
const USAGE_FILE: &str = "usage.json";

#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid check ID: {0:?}")]
    InvalidCheckId(String),
    #[error("App data directory not found")]
    NoAppDataDir,
}

/// Validate that a check ID contains only safe characters (alphanumeric, dash, underscore).
pub fn validate_check_id(check_id: &str) -> Result<(), StateError> {
    if !check_id.is_empty()
        && check_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(StateError::InvalidCheckId(check_id.to_string()))
    }
}

/// Data directory: `$TOKEN_GOVERNOR_HOME`, else `<data_dir>/token-governor`
pub fn app_data_dir() -> Result<PathBuf, StateError> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    let base = dirs::data_dir().ok_or(StateError::NoAppDataDir)?;
    Ok(base.join(APP_DIR_NAME))
}

/// Atomic write: write to a .tmp sibling then rename into place.
pub(crate) fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

/// File-backed store rooted at one directory
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StateError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store under the default data directory
    pub fn open_default() -> Result<Self, StateError> {
        Self::open(app_data_dir()?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_json<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>, StateError> {
        let path = self.root.join(file);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<(), StateError> {
        let path = self.root.join(file);
        let content = serde_json::to_string_pretty(value)?;
        atomic_write(&path, &content)?;
        tracing::info!(path = ?path, "Saved state");
        Ok(())
    }

    /// Load per-check state, skipping entries that fail to parse or carry an
    /// unsafe id
    pub fn load_checks(&self) -> Result<BTreeMap<String, CheckState>, StateError> {
        let Some(raw) = self.read_json::<BTreeMap<String, serde_json::Value>>(CHECKS_FILE)? else {
            return Ok(BTreeMap::new());
        };

        let mut states = BTreeMap::new();
        for (id, value) in raw {
            if let Err(e) = validate_check_id(&id) {
                tracing::warn!(check_id = %id, error = %e, "Skipping check state");
                continue;
            }
            match serde_json::from_value::<CheckState>(value) {
                Ok(state) if state.check_id == id => {
                    states.insert(id, state);
                }
                Ok(state) => {
                    tracing::warn!(check_id = %id, recorded = %state.check_id, "Check state id mismatch");
                }
                Err(e) => {
                    tracing::warn!(check_id = %id, error = %e, "Failed to parse check state");
                }
            }
        }
        Ok(states)
    }

    pub fn save_checks(&self, states: &BTreeMap<String, CheckState>) -> Result<(), StateError> {
        for id in states.keys() {
            validate_check_id(id)?;
        }
        self.write_json(CHECKS_FILE, states)
    }

    /// Load the budget snapshot, or a fresh one for `policy`
    pub fn load_budget(&self, policy: &BudgetPolicy) -> Result<BudgetState, StateError> {
        Ok(self
            .read_json(BUDGET_FILE)?
            .unwrap_or_else(|| BudgetState::new(policy)))
    }

    pub fn save_budget(&self, budget: &BudgetState) -> Result<(), StateError> {
        self.write_json(BUDGET_FILE, budget)
    }

    pub fn load_usage(&self) -> Result<UsageMetrics, StateError> {
        Ok(self.read_json(USAGE_FILE)?.unwrap_or_default())
    }

    pub fn save_usage(&self, usage: &UsageMetrics) -> Result<(), StateError> {
        self.write_json(USAGE_FILE, usage)
    }
}
