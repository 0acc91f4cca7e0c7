//! Traffic configuration loading and validation.
//!
//! The configuration is a JSON document:
//!
//! ```json
//! {
//!     "total": 1000,
//!     "max_user_number": 50,
//!     "actions": { "newdomain": 1, "issuetoken": 3, "transfer": 5 }
//! }
//! ```
//!
//! Key order in `actions` is kept and is the order used by fixed-order runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use quota_scheduler::{ActionWeights, RetryPolicy, DEFAULT_MAX_RETRIES};

use crate::error::ConfigError;
use crate::ledger::ActionKind;

fn default_seed() -> u64 {
    42
}

fn default_chain_id() -> u64 {
    1
}

fn default_max_retries() -> u64 {
    DEFAULT_MAX_RETRIES
}

/// Configuration for one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficConfig {
    /// Requested number of transactions. The realized total may differ by rounding.
    pub total: i64,
    /// Upper bound on the number of users the pool creates.
    pub max_user_number: usize,
    /// Relative weight per action type, in document order.
    pub actions: Map<String, Value>,
    /// Seed for the pool and the scheduler.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Chain ID bound into every signature.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Consecutive infeasible draws before a shuffled run gives up; 0 = never.
    #[serde(default = "default_max_retries")]
    pub max_retries: u64,
}

impl TrafficConfig {
    /// Creates a configuration with no actions and default seed, chain and retry bound.
    pub fn new(total: i64, max_user_number: usize) -> Self {
        Self {
            total,
            max_user_number,
            actions: Map::new(),
            seed: default_seed(),
            chain_id: default_chain_id(),
            max_retries: default_max_retries(),
        }
    }

    /// Adds (or replaces) an action weight.
    pub fn with_action(mut self, action: &str, weight: f64) -> Self {
        self.actions.insert(action.to_string(), Value::from(weight));
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u64) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = content.parse()?;
        tracing::debug!(path = %path.display(), actions = config.actions.len(), "loaded config");
        Ok(config)
    }

    /// Checks totals, user limits and every action weight.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total <= 0 {
            return Err(ConfigError::NonPositiveTotal(self.total));
        }
        if self.max_user_number == 0 {
            return Err(ConfigError::NoUsers);
        }
        self.action_weights()?.validate()?;
        Ok(())
    }

    /// The requested total as an unsigned count. Call after [`validate`](Self::validate).
    pub fn total(&self) -> u64 {
        u64::try_from(self.total).unwrap_or(0)
    }

    /// Action weights in document order.
    ///
    /// Rejects unknown action types and non-numeric weights. Range checks are
    /// left to [`ActionWeights::validate`].
    pub fn action_weights(&self) -> Result<ActionWeights, ConfigError> {
        let mut weights = ActionWeights::new();
        for (action, value) in &self.actions {
            ActionKind::from_str(action).map_err(|_| ConfigError::UnknownAction(action.clone()))?;
            let weight = value.as_f64().ok_or_else(|| ConfigError::NonNumericWeight {
                action: action.clone(),
                value: value.to_string(),
            })?;
            weights.push(action.clone(), weight);
        }
        Ok(weights)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_limit(self.max_retries)
    }
}

impl FromStr for TrafficConfig {
    type Err = ConfigError;

    /// Parses and validates a JSON configuration.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quota_scheduler::PlanError;
    use std::io::Write;

    #[test]
    fn test_parse_keeps_action_order() {
        let config: TrafficConfig = r#"{
            "total": 100,
            "max_user_number": 10,
            "actions": { "transfer": 5, "newdomain": 1, "issuetoken": 2.5 }
        }"#
        .parse()
        .unwrap();

        let weights = config.action_weights().unwrap();
        let pairs: Vec<_> = weights.iter().collect();
        assert_eq!(pairs, vec![("transfer", 5.0), ("newdomain", 1.0), ("issuetoken", 2.5)]);
        assert_eq!(config.seed, 42);
        assert_eq!(config.chain_id, 1);
        assert_eq!(config.retry_policy(), RetryPolicy::Bounded(DEFAULT_MAX_RETRIES));
    }

    #[test]
    fn test_optional_fields() {
        let config: TrafficConfig = r#"{
            "total": 10, "max_user_number": 2, "actions": { "newdomain": 1 },
            "seed": 7, "chain_id": 9, "max_retries": 0
        }"#
        .parse()
        .unwrap();

        assert_eq!(config.seed, 7);
        assert_eq!(config.chain_id, 9);
        assert_eq!(config.retry_policy(), RetryPolicy::Unbounded);
    }

    #[test]
    fn test_rejects_non_positive_total() {
        let err = r#"{ "total": 0, "max_user_number": 1, "actions": {} }"#
            .parse::<TrafficConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NonPositiveTotal(0)));

        let err = r#"{ "total": -5, "max_user_number": 1, "actions": {} }"#
            .parse::<TrafficConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NonPositiveTotal(-5)));
    }

    #[test]
    fn test_rejects_malformed_weights() {
        let err = TrafficConfig::new(10, 1)
            .with_action("newdomain", -1.0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Plan(PlanError::InvalidWeight { .. })));

        let err = r#"{ "total": 10, "max_user_number": 1, "actions": { "newdomain": "x" } }"#
            .parse::<TrafficConfig>()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NonNumericWeight { ref action, .. } if action == "newdomain"
        ));

        let err = TrafficConfig::new(10, 1)
            .with_action("mint", 1.0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAction(ref a) if a == "mint"));
    }

    #[test]
    fn test_rejects_zero_users() {
        let err = TrafficConfig::new(10, 0)
            .with_action("newdomain", 1.0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoUsers));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "total": 30, "max_user_number": 3,
                 "actions": {{ "newfungible": 1, "issuefungible": 2 }} }}"#
        )
        .unwrap();

        let config = TrafficConfig::load(file.path()).unwrap();
        assert_eq!(config.total(), 30);
        assert_eq!(config.action_weights().unwrap().len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = TrafficConfig::load(Path::new("/nonexistent/actions.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
