//! Policy evaluation.
//!
//! For each request the engine looks up the action's policy, runs every
//! rule's bucket against the store, and combines the per-rule results. A
//! store failure aborts the remaining rules and the action's fail mode
//! decides the outcome; it never reaches the caller as an error.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use super::bucket::BucketState;
use super::clock::Clock;
use super::context::RequestContext;
use super::decision::{combine, error_decision, Outcome, RateLimitDecision, RuleResult};
use super::key::{build_key, redact_key};
use super::rules::{ActionPolicy, PolicySet, RateLimitRule, RuleMode};
use super::store::{Store, StoreResult};
use crate::error::Result;

/// Number of lock stripes guarding bucket read-modify-write cycles.
const LOCK_STRIPES: usize = 64;

/// Serializes updates to the same key without allocating per key.
struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[index].lock().await
    }
}

/// Evaluates action policies against a bucket store.
///
/// The policy set is fixed at construction; reconfiguring means building a
/// new engine (the store can be shared between the two).
pub struct PolicyEngine<S: Store + ?Sized> {
    policies: PolicySet,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    locks: KeyLocks,
}

impl<S: Store + ?Sized> PolicyEngine<S> {
    /// Create an engine over `store`.
    pub fn new(policies: PolicySet, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        info!(actions = policies.len(), "Policy engine initialized");
        Self {
            policies,
            store,
            clock,
            locks: KeyLocks::new(LOCK_STRIPES),
        }
    }

    /// Decide whether the request in `context` may proceed.
    pub async fn check(&self, context: &RequestContext) -> RateLimitDecision {
        let Some(policy) = self.policies.get(&context.action) else {
            trace!(action = %context.action, "No policy for action");
            return RateLimitDecision::allow(context.action.as_str());
        };

        match self.evaluate(policy, context).await {
            Ok((results, keys)) => {
                let decision = combine(&policy.id, results, keys);
                if decision.outcome != Outcome::Allowed {
                    info!(
                        action = %decision.action,
                        outcome = ?decision.outcome,
                        retry_after_ms = decision.retry_after_ms,
                        "Rate limit triggered"
                    );
                }
                decision
            }
            Err(e) => {
                warn!(
                    action = %policy.id,
                    fail_mode = ?policy.fail_mode,
                    error = %e,
                    "Store failure during rate limit check, applying fail mode"
                );
                error_decision(&policy.id, policy.fail_mode)
            }
        }
    }

    async fn evaluate(
        &self,
        policy: &ActionPolicy,
        context: &RequestContext,
    ) -> StoreResult<(Vec<RuleResult>, BTreeMap<String, String>)> {
        let mut results = Vec::with_capacity(policy.rules.len());
        let mut keys = BTreeMap::new();

        // Every rule runs even after one blocks, so per-rule results stay complete.
        for rule in &policy.rules {
            let result = self.evaluate_rule(&policy.id, rule, context).await?;
            keys.insert(result.rule_name.clone(), result.key.clone());
            results.push(result);
        }

        Ok((results, keys))
    }

    async fn evaluate_rule(
        &self,
        action: &str,
        rule: &RateLimitRule,
        context: &RequestContext,
    ) -> StoreResult<RuleResult> {
        let Some(key) = build_key(action, rule, context) else {
            trace!(
                action = %action,
                rule = %rule.name,
                "Rule skipped, dimension missing"
            );
            return Ok(RuleResult::skipped(rule.name.as_str(), rule.capacity));
        };

        let config = rule.bucket_config();
        let ttl_ms = rule.effective_ttl_ms();

        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now_millis();

        let state = match self.store.get(&key).await? {
            Some(state) if !state.is_expired(now) => state,
            _ => {
                debug!(key = %redact_key(&key), "Creating new bucket");
                BucketState::new(&config, now, ttl_ms)
            }
        };

        let consumed = state.consume(&config, rule.cost, now, ttl_ms);
        self.store.set(&key, consumed.state, ttl_ms).await?;

        let outcome = match (consumed.allowed, rule.mode) {
            (true, _) => Outcome::Allowed,
            (false, RuleMode::Challenge) => Outcome::Challenge,
            (false, RuleMode::Block) => Outcome::Blocked,
        };

        trace!(
            key = %redact_key(&key),
            outcome = ?outcome,
            remaining = consumed.state.tokens,
            retry_after_ms = consumed.retry_after_ms,
            "Rule evaluated"
        );

        Ok(RuleResult {
            rule_name: rule.name.clone(),
            key,
            allowed: outcome != Outcome::Blocked,
            outcome,
            retry_after_ms: consumed.retry_after_ms,
            remaining_tokens: consumed.state.tokens,
            challenge: if outcome == Outcome::Challenge {
                rule.challenge.clone()
            } else {
                None
            },
        })
    }

    /// Drop every bucket the action's rules hold for this context.
    ///
    /// Returns the number of buckets deleted.
    pub async fn reset(&self, context: &RequestContext) -> Result<usize> {
        let Some(policy) = self.policies.get(&context.action) else {
            return Ok(0);
        };

        let mut deleted = 0;
        for rule in &policy.rules {
            if let Some(key) = build_key(&policy.id, rule, context) {
                let _guard = self.locks.lock(&key).await;
                if self.store.delete(&key).await? {
                    deleted += 1;
                }
            }
        }

        debug!(action = %policy.id, deleted = deleted, "Reset rate limit buckets");
        Ok(deleted)
    }

    /// The policy for an action, if any.
    pub fn policy(&self, action: &str) -> Option<&ActionPolicy> {
        self.policies.get(action)
    }

    /// Ids of all configured actions.
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.policies.actions.keys().map(String::as_str)
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Shut down the underlying store.
    pub async fn shutdown(&self) -> Result<()> {
        self.store.shutdown().await?;
        Ok(())
    }
}
