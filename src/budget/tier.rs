//! Operating tiers and the catalog that prices them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed, totally ordered set of operating tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    #[serde(alias = "low")]
    Economy,
    #[serde(alias = "mid")]
    Balanced,
    #[serde(alias = "high")]
    Premium,
}

impl ModelTier {
    pub const ALL: [ModelTier; 3] = [ModelTier::Economy, ModelTier::Balanced, ModelTier::Premium];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Economy => "economy",
            ModelTier::Balanced => "balanced",
            ModelTier::Premium => "premium",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "economy" | "low" => Ok(ModelTier::Economy),
            "balanced" | "mid" => Ok(ModelTier::Balanced),
            "premium" | "high" => Ok(ModelTier::Premium),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// Parameters attached to one configured tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    pub tier: ModelTier,
    /// Model the agent switches to at this tier
    pub name: String,
    /// Cost of one token at this tier relative to the cheapest model
    pub cost_multiplier: f64,
    #[serde(default)]
    pub capability: String,
}

impl TierSpec {
    pub fn new(tier: ModelTier, name: &str, cost_multiplier: f64, capability: &str) -> Self {
        Self {
            tier,
            name: name.to_string(),
            cost_multiplier,
            capability: capability.to_string(),
        }
    }
}

/// Configured tiers, ascending in tier order and cost.
///
/// Ordering is checked by `validate_config`; lookups here never assume it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierCatalog(Vec<TierSpec>);

impl Default for TierCatalog {
    fn default() -> Self {
        Self(vec![
            TierSpec::new(ModelTier::Economy, "claude-haiku", 1.0, "routine checks and summaries"),
            TierSpec::new(ModelTier::Balanced, "claude-sonnet", 4.0, "general agent work"),
            TierSpec::new(ModelTier::Premium, "claude-opus", 20.0, "complex reasoning"),
        ])
    }
}

impl TierCatalog {
    pub fn new(specs: Vec<TierSpec>) -> Self {
        Self(specs)
    }

    pub fn specs(&self) -> &[TierSpec] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, tier: ModelTier) -> Option<&TierSpec> {
        self.0.iter().find(|s| s.tier == tier)
    }

    /// Cheapest configured tier
    pub fn lowest(&self) -> Option<&TierSpec> {
        self.0.iter().min_by_key(|s| s.tier)
    }

    /// Most capable configured tier
    pub fn highest(&self) -> Option<&TierSpec> {
        self.0.iter().max_by_key(|s| s.tier)
    }

    /// Cost multiplier of a tier; 1.0 when the tier is not configured
    pub fn multiplier(&self, tier: ModelTier) -> f64 {
        self.get(tier).map(|s| s.cost_multiplier).unwrap_or(1.0)
    }

    /// Factor by which check intervals stretch when running at `tier`
    /// instead of the top tier: `top_multiplier / tier_multiplier`.
    pub fn interval_scale(&self, tier: ModelTier) -> f64 {
        let top = self.highest().map(|s| s.cost_multiplier).unwrap_or(1.0);
        let own = self.multiplier(tier);
        if own > 0.0 && top > 0.0 {
            (top / own).max(1.0)
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(ModelTier::Economy < ModelTier::Balanced);
        assert!(ModelTier::Balanced < ModelTier::Premium);
        let mut tiers = vec![ModelTier::Premium, ModelTier::Economy, ModelTier::Balanced];
        tiers.sort();
        assert_eq!(tiers, ModelTier::ALL.to_vec());
    }

    #[test]
    fn test_tier_aliases() {
        let tier: ModelTier = serde_json::from_str("\"mid\"").unwrap();
        assert_eq!(tier, ModelTier::Balanced);
        assert_eq!(serde_json::to_string(&tier).unwrap(), "\"balanced\"");
        assert_eq!("HIGH".parse::<ModelTier>().unwrap(), ModelTier::Premium);
        assert!("ultra".parse::<ModelTier>().is_err());
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = TierCatalog::default();
        assert_eq!(catalog.lowest().unwrap().tier, ModelTier::Economy);
        assert_eq!(catalog.highest().unwrap().tier, ModelTier::Premium);
        assert_eq!(catalog.multiplier(ModelTier::Balanced), 4.0);

        let partial = TierCatalog::new(vec![TierSpec::new(ModelTier::Balanced, "m", 2.0, "")]);
        assert_eq!(partial.multiplier(ModelTier::Premium), 1.0);
        assert!(partial.get(ModelTier::Economy).is_none());
    }

    #[test]
    fn test_interval_scale() {
        let catalog = TierCatalog::default();
        assert_eq!(catalog.interval_scale(ModelTier::Premium), 1.0);
        assert_eq!(catalog.interval_scale(ModelTier::Balanced), 5.0);
        assert_eq!(catalog.interval_scale(ModelTier::Economy), 20.0);
        assert_eq!(TierCatalog::new(Vec::new()).interval_scale(ModelTier::Economy), 1.0);
    }

    #[test]
    fn test_catalog_serializes_as_list() {
        let json = serde_json::to_value(TierCatalog::default()).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["tier"], "economy");
    }
}
