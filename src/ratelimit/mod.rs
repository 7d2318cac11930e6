//! Rate limiting logic and state management.

pub mod bucket;
pub mod clock;
pub mod context;
pub mod decision;
pub mod engine;
pub mod key;
pub mod memory;
pub mod rules;
pub mod store;

pub use bucket::{BucketConfig, BucketState, ConsumeOutcome, RETRY_NEVER};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{Dimension, RequestContext};
pub use decision::{Outcome, RateLimitDecision, RuleResult, FAIL_CLOSED_RETRY_MS, SKIPPED_KEY};
pub use engine::PolicyEngine;
pub use key::{build_key, parse_key, redact_key, RateLimitKey};
pub use memory::{BoundedMemoryStore, StoreStats};
pub use rules::{ActionPolicy, FailMode, PolicySet, RateLimitRule, RuleMode};
pub use store::{Store, StoreError, StoreResult};
