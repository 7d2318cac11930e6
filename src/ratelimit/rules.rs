//! Rate limit rules and per-action policies.
//!
//! Policies are loaded from YAML in the following shape:
//!
//! ```yaml
//! actions:
//!   password_reset:
//!     fail_mode: closed
//!     rules:
//!       - name: per-ip
//!         dimensions: [ip]
//!         capacity: 10
//!         refill_tokens: 10
//!         refill_interval_ms: 60000
//!       - name: per-email
//!         dimensions: [emailHash]
//!         capacity: 3
//!         refill_tokens: 3
//!         refill_interval_ms: 60000
//!         mode: challenge
//!         challenge: captcha
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use super::bucket::BucketConfig;
use super::context::Dimension;
use crate::error::{AuthgateError, Result};

/// What a rule does once its bucket runs dry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    /// Reject the request
    #[default]
    Block,
    /// Let it through but ask for extra verification
    Challenge,
}

/// What an action does when the store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Allow the request
    #[default]
    Open,
    /// Block the request
    Closed,
}

fn default_cost() -> f64 {
    1.0
}

/// A single token bucket rule scoped by one or more dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Rule name, unique within its action
    pub name: String,
    /// Dimensions that make up the bucket key, in key order
    pub dimensions: Vec<Dimension>,
    /// Bucket size
    pub capacity: f64,
    /// Tokens restored every interval
    pub refill_tokens: f64,
    /// Refill interval in milliseconds
    pub refill_interval_ms: u64,
    /// Tokens taken per request
    #[serde(default = "default_cost")]
    pub cost: f64,
    #[serde(default)]
    pub mode: RuleMode,
    /// Bucket TTL; derived from the refill rate when absent
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    /// Hint passed to the caller when this rule challenges
    #[serde(default)]
    pub challenge: Option<String>,
}

impl RateLimitRule {
    /// Create a blocking rule with a cost of one token.
    pub fn new(
        name: impl Into<String>,
        dimensions: Vec<Dimension>,
        capacity: f64,
        refill_tokens: f64,
        refill_interval_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            dimensions,
            capacity,
            refill_tokens,
            refill_interval_ms,
            cost: default_cost(),
            mode: RuleMode::Block,
            ttl_ms: None,
            challenge: None,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_mode(mut self, mode: RuleMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn with_challenge(mut self, hint: impl Into<String>) -> Self {
        self.challenge = Some(hint.into());
        self
    }

    /// The bucket shape this rule enforces.
    pub fn bucket_config(&self) -> BucketConfig {
        BucketConfig::new(self.capacity, self.refill_tokens, self.refill_interval_ms)
    }

    /// Effective TTL for this rule's buckets.
    pub fn effective_ttl_ms(&self) -> u64 {
        self.ttl_ms
            .unwrap_or_else(|| self.bucket_config().default_ttl_ms())
    }

    fn validate(&self, action: &str) -> Result<()> {
        let fail = |reason: &str| -> Result<()> {
            Err(AuthgateError::Policy(format!(
                "action '{}', rule '{}': {}",
                action, self.name, reason
            )))
        };

        if self.name.trim().is_empty() {
            return fail("rule name must not be empty");
        }
        if self.dimensions.is_empty() {
            return fail("at least one dimension is required");
        }
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            return fail("capacity must be a positive number");
        }
        if !self.cost.is_finite() || self.cost <= 0.0 {
            return fail("cost must be a positive number");
        }
        if self.cost > self.capacity {
            return fail("cost exceeds capacity, the rule could never allow a request");
        }
        if !self.refill_tokens.is_finite() || self.refill_tokens < 0.0 {
            return fail("refill_tokens must be zero or a positive number");
        }
        if self.ttl_ms == Some(0) {
            return fail("ttl_ms must be positive, a zero TTL expires every bucket immediately");
        }
        Ok(())
    }
}

/// All rules that guard one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPolicy {
    /// Action id; filled from the map key when loaded from YAML
    #[serde(default)]
    pub id: String,
    /// Rules in evaluation order
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
    #[serde(default)]
    pub fail_mode: FailMode,
}

impl ActionPolicy {
    /// Create a policy for `id`.
    pub fn new(id: impl Into<String>, fail_mode: FailMode, rules: Vec<RateLimitRule>) -> Self {
        Self {
            id: id.into(),
            rules,
            fail_mode,
        }
    }

    /// Check every rule and reject duplicate rule names.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AuthgateError::Policy("action id must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            rule.validate(&self.id)?;
            if !seen.insert(rule.name.as_str()) {
                return Err(AuthgateError::Policy(format!(
                    "action '{}': duplicate rule name '{}'",
                    self.id, rule.name
                )));
            }
        }
        Ok(())
    }
}

/// The complete set of action policies an engine enforces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    /// Map of action id to policy
    #[serde(default)]
    pub actions: HashMap<String, ActionPolicy>,
}

impl PolicySet {
    /// Create an empty policy set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy set from a list of policies, keyed by their ids.
    pub fn from_policies(policies: impl IntoIterator<Item = ActionPolicy>) -> Self {
        Self {
            actions: policies
                .into_iter()
                .map(|policy| (policy.id.clone(), policy))
                .collect(),
        }
    }

    /// Load and validate policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading action policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load and validate policies from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut set: PolicySet = serde_yaml::from_str(yaml)
            .map_err(|e| AuthgateError::Config(format!("Failed to parse policy file: {}", e)))?;

        for (id, policy) in set.actions.iter_mut() {
            policy.id = id.clone();
        }

        set.validate()?;
        Ok(set)
    }

    /// Validate every policy in the set.
    pub fn validate(&self) -> Result<()> {
        for (id, policy) in &self.actions {
            if id != &policy.id {
                return Err(AuthgateError::Policy(format!(
                    "policy registered as '{}' declares id '{}'",
                    id, policy.id
                )));
            }
            policy.validate()?;
        }
        Ok(())
    }

    /// Get the policy for an action.
    pub fn get(&self, action: &str) -> Option<&ActionPolicy> {
        self.actions.get(action)
    }

    /// Number of configured actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
actions:
  password_reset:
    fail_mode: closed
    rules:
      - name: per-ip
        dimensions: [ip]
        capacity: 10
        refill_tokens: 10
        refill_interval_ms: 60000
      - name: per-email
        dimensions: [emailHash]
        capacity: 3
        refill_tokens: 3
        refill_interval_ms: 60000
        mode: challenge
        challenge: captcha
  login:
    rules:
      - name: per-user-ip
        dimensions: [user_id, ip]
        capacity: 5
        refill_tokens: 1
        refill_interval_ms: 1000
        cost: 2
        ttl_ms: 30000
"#;

    #[test]
    fn test_parse_policy_file() {
        let set = PolicySet::from_yaml(SAMPLE).unwrap();
        assert_eq!(set.len(), 2);

        let reset = set.get("password_reset").unwrap();
        assert_eq!(reset.id, "password_reset");
        assert_eq!(reset.fail_mode, FailMode::Closed);
        assert_eq!(reset.rules.len(), 2);
        assert_eq!(reset.rules[0].name, "per-ip");
        assert_eq!(reset.rules[0].dimensions, vec![Dimension::Ip]);
        assert_eq!(reset.rules[0].cost, 1.0);
        assert_eq!(reset.rules[0].mode, RuleMode::Block);
        assert_eq!(reset.rules[1].mode, RuleMode::Challenge);
        assert_eq!(reset.rules[1].challenge.as_deref(), Some("captcha"));

        let login = set.get("login").unwrap();
        assert_eq!(login.fail_mode, FailMode::Open);
        assert_eq!(
            login.rules[0].dimensions,
            vec![Dimension::UserId, Dimension::Ip]
        );
        assert_eq!(login.rules[0].cost, 2.0);
        assert_eq!(login.rules[0].effective_ttl_ms(), 30_000);
    }

    #[test]
    fn test_effective_ttl_defaults_to_double_refill() {
        let rule = RateLimitRule::new("per-ip", vec![Dimension::Ip], 10.0, 10.0, 60_000);
        assert_eq!(rule.effective_ttl_ms(), 120_000);
    }

    #[test]
    fn test_reject_duplicate_rule_names() {
        let policy = ActionPolicy::new(
            "login",
            FailMode::Open,
            vec![
                RateLimitRule::new("dup", vec![Dimension::Ip], 5.0, 1.0, 1_000),
                RateLimitRule::new("dup", vec![Dimension::UserId], 5.0, 1.0, 1_000),
            ],
        );

        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate rule name"));
    }

    #[test]
    fn test_reject_invalid_rules() {
        let cases = vec![
            RateLimitRule::new("", vec![Dimension::Ip], 5.0, 1.0, 1_000),
            RateLimitRule::new("no-dims", vec![], 5.0, 1.0, 1_000),
            RateLimitRule::new("zero-cap", vec![Dimension::Ip], 0.0, 1.0, 1_000),
            RateLimitRule::new("nan-cap", vec![Dimension::Ip], f64::NAN, 1.0, 1_000),
            RateLimitRule::new("neg-refill", vec![Dimension::Ip], 5.0, -1.0, 1_000),
            RateLimitRule::new("zero-cost", vec![Dimension::Ip], 5.0, 1.0, 1_000).with_cost(0.0),
            RateLimitRule::new("big-cost", vec![Dimension::Ip], 5.0, 1.0, 1_000).with_cost(6.0),
            RateLimitRule::new("zero-ttl", vec![Dimension::Ip], 5.0, 1.0, 1_000).with_ttl_ms(0),
        ];

        for rule in cases {
            let name = rule.name.clone();
            let policy = ActionPolicy::new("login", FailMode::Open, vec![rule]);
            assert!(policy.validate().is_err(), "rule '{}' should be rejected", name);
        }
    }

    #[test]
    fn test_zero_ttl_rejected_on_load() {
        let err = PolicySet::from_yaml(
            r#"
actions:
  otp:
    fail_mode: closed
    rules:
      - name: per-user
        dimensions: [user_id]
        capacity: 1
        refill_tokens: 1
        refill_interval_ms: 3600000
        ttl_ms: 0
"#,
        )
        .unwrap_err();

        match err {
            AuthgateError::Policy(msg) => assert!(msg.contains("ttl_ms")),
            other => panic!("expected policy error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_refilling_rule_is_valid() {
        let rule = RateLimitRule::new("quota", vec![Dimension::UserId], 3.0, 0.0, 0);
        let policy = ActionPolicy::new("otp", FailMode::Closed, vec![rule]);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let err = PolicySet::from_yaml("actions: [not, a, map]").unwrap_err();
        assert!(matches!(err, AuthgateError::Config(_)));
    }

    #[test]
    fn test_from_policies_keys_by_id() {
        let set = PolicySet::from_policies(vec![ActionPolicy::new(
            "register",
            FailMode::Closed,
            vec![RateLimitRule::new("per-ip", vec![Dimension::Ip], 5.0, 5.0, 60_000)],
        )]);

        assert!(set.get("register").is_some());
        assert!(set.validate().is_ok());
    }
}
