//! Per-rule results and their combination into one decision.
//!
//! Rules combine with AND semantics: a request fully succeeds only when
//! every rule succeeds, and the most restrictive outcome wins
//! (`Blocked` > `Challenge` > `Allowed`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::rules::FailMode;

/// Key recorded for a rule that did not apply to the request.
pub const SKIPPED_KEY: &str = "skipped";

/// Retry delay reported by a fail-closed decision.
pub const FAIL_CLOSED_RETRY_MS: u64 = 60_000;

/// Outcome of a rule or of a whole action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Allowed,
    Challenge,
    Blocked,
}

/// The result of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub rule_name: String,
    /// Store key, or [`SKIPPED_KEY`]
    pub key: String,
    /// False only for a blocked rule; challenged rules still allow
    pub allowed: bool,
    pub outcome: Outcome,
    pub retry_after_ms: u64,
    pub remaining_tokens: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
}

impl RuleResult {
    /// Result for a rule whose dimensions were not all present.
    pub fn skipped(rule_name: impl Into<String>, capacity: f64) -> Self {
        Self {
            rule_name: rule_name.into(),
            key: SKIPPED_KEY.to_string(),
            allowed: true,
            outcome: Outcome::Allowed,
            retry_after_ms: 0,
            remaining_tokens: capacity,
            challenge: None,
        }
    }

    /// Whether the rule was skipped for a missing dimension.
    pub fn is_skipped(&self) -> bool {
        self.key == SKIPPED_KEY
    }
}

/// The decision for one request against one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub action: String,
    pub outcome: Outcome,
    pub retry_after_ms: u64,
    pub rule_results: Vec<RuleResult>,
    /// Rule name to store key
    pub keys: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    /// Set when the store failed and the action's fail mode decided
    #[serde(default)]
    pub failed_due_to_error: bool,
}

impl RateLimitDecision {
    /// Unconditional allow, used when an action has no policy.
    pub fn allow(action: impl Into<String>) -> Self {
        Self {
            allowed: true,
            action: action.into(),
            outcome: Outcome::Allowed,
            retry_after_ms: 0,
            rule_results: Vec::new(),
            keys: BTreeMap::new(),
            challenge: None,
            failed_due_to_error: false,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.outcome == Outcome::Blocked
    }

    pub fn is_challenge(&self) -> bool {
        self.outcome == Outcome::Challenge
    }
}

/// Reduce per-rule results into one action-level decision.
pub fn combine(
    action: &str,
    rule_results: Vec<RuleResult>,
    keys: BTreeMap<String, String>,
) -> RateLimitDecision {
    let mut blocked_retry: Option<u64> = None;
    let mut challenge_retry: Option<u64> = None;
    let mut challenge: Option<String> = None;

    for result in &rule_results {
        match result.outcome {
            Outcome::Blocked => {
                blocked_retry = Some(blocked_retry.unwrap_or(0).max(result.retry_after_ms));
            }
            Outcome::Challenge => {
                challenge_retry = Some(challenge_retry.unwrap_or(0).max(result.retry_after_ms));
                if challenge.is_none() {
                    challenge = result.challenge.clone().filter(|hint| !hint.is_empty());
                }
            }
            Outcome::Allowed => {}
        }
    }

    let (allowed, outcome, retry_after_ms, challenge) = match (blocked_retry, challenge_retry) {
        (Some(retry), _) => (false, Outcome::Blocked, retry, None),
        (None, Some(retry)) => (true, Outcome::Challenge, retry, challenge),
        (None, None) => (true, Outcome::Allowed, 0, None),
    };

    RateLimitDecision {
        allowed,
        action: action.to_string(),
        outcome,
        retry_after_ms,
        rule_results,
        keys,
        challenge,
        failed_due_to_error: false,
    }
}

/// Decision used when the store failed mid-check.
pub fn error_decision(action: &str, fail_mode: FailMode) -> RateLimitDecision {
    let (allowed, outcome, retry_after_ms) = match fail_mode {
        FailMode::Open => (true, Outcome::Allowed, 0),
        FailMode::Closed => (false, Outcome::Blocked, FAIL_CLOSED_RETRY_MS),
    };

    RateLimitDecision {
        allowed,
        action: action.to_string(),
        outcome,
        retry_after_ms,
        rule_results: Vec::new(),
        keys: BTreeMap::new(),
        challenge: None,
        failed_due_to_error: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, outcome: Outcome, retry_after_ms: u64) -> RuleResult {
        RuleResult {
            rule_name: name.to_string(),
            key: format!("login:{}:ip=1.2.3.4", name),
            allowed: outcome != Outcome::Blocked,
            outcome,
            retry_after_ms,
            remaining_tokens: 0.0,
            challenge: None,
        }
    }

    #[test]
    fn test_empty_results_allow() {
        let decision = combine("login", Vec::new(), BTreeMap::new());
        assert!(decision.allowed);
        assert_eq!(decision.outcome, Outcome::Allowed);
        assert_eq!(decision.retry_after_ms, 0);
        assert!(!decision.failed_due_to_error);
    }

    #[test]
    fn test_all_allowed() {
        let decision = combine(
            "login",
            vec![result("a", Outcome::Allowed, 0), result("b", Outcome::Allowed, 0)],
            BTreeMap::new(),
        );
        assert!(decision.allowed);
        assert_eq!(decision.outcome, Outcome::Allowed);
        assert_eq!(decision.rule_results.len(), 2);
    }

    #[test]
    fn test_blocked_takes_max_retry_over_blocked_rules() {
        let decision = combine(
            "login",
            vec![
                result("a", Outcome::Blocked, 200),
                result("b", Outcome::Challenge, 9_000),
                result("c", Outcome::Blocked, 1_500),
                result("d", Outcome::Allowed, 0),
            ],
            BTreeMap::new(),
        );

        assert!(!decision.allowed);
        assert_eq!(decision.outcome, Outcome::Blocked);
        assert_eq!(decision.retry_after_ms, 1_500);
        assert!(decision.challenge.is_none());
    }

    #[test]
    fn test_challenge_uses_first_non_empty_hint() {
        let mut first = result("a", Outcome::Challenge, 100);
        first.challenge = Some(String::new());
        let mut second = result("b", Outcome::Challenge, 300);
        second.challenge = Some("captcha".to_string());
        let mut third = result("c", Outcome::Challenge, 50);
        third.challenge = Some("email_otp".to_string());

        let decision = combine(
            "register",
            vec![result("z", Outcome::Allowed, 0), first, second, third],
            BTreeMap::new(),
        );

        assert!(decision.allowed);
        assert_eq!(decision.outcome, Outcome::Challenge);
        assert_eq!(decision.challenge.as_deref(), Some("captcha"));
        assert_eq!(decision.retry_after_ms, 300);
    }

    #[test]
    fn test_combination_is_order_independent() {
        let results = vec![
            result("a", Outcome::Allowed, 0),
            result("b", Outcome::Challenge, 10),
            result("c", Outcome::Blocked, 20),
        ];
        let mut reversed = results.clone();
        reversed.reverse();

        let forward = combine("otp", results, BTreeMap::new());
        let backward = combine("otp", reversed, BTreeMap::new());
        assert_eq!(forward.outcome, backward.outcome);
        assert_eq!(forward.retry_after_ms, backward.retry_after_ms);
    }

    #[test]
    fn test_skipped_result() {
        let skipped = RuleResult::skipped("per-email", 3.0);
        assert!(skipped.is_skipped());
        assert!(skipped.allowed);
        assert_eq!(skipped.outcome, Outcome::Allowed);
        assert_eq!(skipped.remaining_tokens, 3.0);
    }

    #[test]
    fn test_error_decisions() {
        let closed = error_decision("password_reset", FailMode::Closed);
        assert!(!closed.allowed);
        assert_eq!(closed.outcome, Outcome::Blocked);
        assert_eq!(closed.retry_after_ms, FAIL_CLOSED_RETRY_MS);
        assert!(closed.failed_due_to_error);

        let open = error_decision("login", FailMode::Open);
        assert!(open.allowed);
        assert_eq!(open.outcome, Outcome::Allowed);
        assert_eq!(open.retry_after_ms, 0);
        assert!(open.failed_due_to_error);
    }

    #[test]
    fn test_decision_json_shape() {
        let decision = combine("login", vec![result("a", Outcome::Blocked, 200)], BTreeMap::new());
        let json = serde_json::to_value(&decision).unwrap();

        assert_eq!(json["outcome"], "BLOCKED");
        assert_eq!(json["retryAfterMs"], 200);
        assert_eq!(json["failedDueToError"], false);
        assert_eq!(json["ruleResults"][0]["ruleName"], "a");
    }
}
