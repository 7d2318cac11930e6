//! Store key construction and parsing.
//!
//! A key has the form `action:rule:dim1=val1:dim2=val2`. Every component
//! is sanitized so that `:` and `=` only ever appear as separators, which
//! keeps [`RateLimitKey::parse`] an exact inverse of the string form.

use std::borrow::Cow;
use std::fmt;

use super::context::{Dimension, RequestContext};
use super::rules::RateLimitRule;

/// Separates the action, the rule and each dimension pair.
pub const KEY_SEPARATOR: char = ':';
/// Separates a dimension tag from its value.
pub const PAIR_SEPARATOR: char = '=';
/// Stands in for separator characters found inside a component.
pub const PLACEHOLDER: char = '_';

/// Visible prefix kept when a hash-like value is redacted.
const REDACTED_PREFIX_LEN: usize = 8;

/// Read a dimension's value from the context.
///
/// Absent and empty values both count as missing.
pub fn extract<'a>(dimension: &Dimension, context: &'a RequestContext) -> Option<&'a str> {
    context.get(dimension).filter(|value| !value.is_empty())
}

fn sanitize(component: &str) -> Cow<'_, str> {
    if component.contains([KEY_SEPARATOR, PAIR_SEPARATOR]) {
        Cow::Owned(
            component
                .chars()
                .map(|c| {
                    if c == KEY_SEPARATOR || c == PAIR_SEPARATOR {
                        PLACEHOLDER
                    } else {
                        c
                    }
                })
                .collect(),
        )
    } else {
        Cow::Borrowed(component)
    }
}

/// The identity of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The action the bucket belongs to
    pub action: String,
    /// The rule that owns the bucket
    pub rule: String,
    /// `(tag, value)` pairs in the rule's dimension order
    pub dimensions: Vec<(String, String)>,
}

impl RateLimitKey {
    /// Build the key for `rule` under `action` from a request context.
    ///
    /// Returns `None` when the action or any declared dimension is missing
    /// or empty; such a rule does not apply to the request.
    pub fn build(action: &str, rule: &RateLimitRule, context: &RequestContext) -> Option<Self> {
        if action.is_empty() {
            return None;
        }

        let mut dimensions = Vec::with_capacity(rule.dimensions.len());
        for dimension in &rule.dimensions {
            let value = extract(dimension, context)?;
            dimensions.push((
                sanitize(dimension.tag()).into_owned(),
                sanitize(value).into_owned(),
            ));
        }

        Some(Self {
            action: sanitize(action).into_owned(),
            rule: sanitize(&rule.name).into_owned(),
            dimensions,
        })
    }

    /// Parse a key string produced by [`RateLimitKey::build`].
    ///
    /// Returns `None` for anything that is not a well-formed key.
    pub fn parse(key: &str) -> Option<Self> {
        let mut segments = key.split(KEY_SEPARATOR);
        let action = segments.next()?;
        let rule = segments.next()?;
        if action.is_empty()
            || rule.is_empty()
            || action.contains(PAIR_SEPARATOR)
            || rule.contains(PAIR_SEPARATOR)
        {
            return None;
        }

        let dimensions = segments
            .map(|segment| {
                segment
                    .split_once(PAIR_SEPARATOR)
                    .map(|(tag, value)| (tag.to_string(), value.to_string()))
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            action: action.to_string(),
            rule: rule.to_string(),
            dimensions,
        })
    }

    /// The key string used by the store.
    pub fn to_string_key(&self) -> String {
        let mut key = format!("{}{}{}", self.action, KEY_SEPARATOR, self.rule);
        for (tag, value) in &self.dimensions {
            key.push(KEY_SEPARATOR);
            key.push_str(tag);
            key.push(PAIR_SEPARATOR);
            key.push_str(value);
        }
        key
    }

    /// A log-safe rendering with sensitive values shortened.
    pub fn redacted(&self) -> String {
        let dimensions = self
            .dimensions
            .iter()
            .map(|(tag, value)| {
                let shown = if Dimension::from(tag.as_str()).is_sensitive() {
                    truncate(value)
                } else {
                    Cow::Borrowed(value.as_str())
                };
                (tag.clone(), shown.into_owned())
            })
            .collect();

        Self {
            action: self.action.clone(),
            rule: self.rule.clone(),
            dimensions,
        }
        .to_string_key()
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_key())
    }
}

fn truncate(value: &str) -> Cow<'_, str> {
    match value.char_indices().nth(REDACTED_PREFIX_LEN) {
        Some((cut, _)) => Cow::Owned(format!("{}...", &value[..cut])),
        None => Cow::Borrowed(value),
    }
}

/// Build the store key for a rule, or `None` if a dimension is missing.
pub fn build_key(action: &str, rule: &RateLimitRule, context: &RequestContext) -> Option<String> {
    RateLimitKey::build(action, rule, context).map(|key| key.to_string_key())
}

/// Parse a store key back into its parts.
pub fn parse_key(key: &str) -> Option<RateLimitKey> {
    RateLimitKey::parse(key)
}

/// Render a store key for logging.
pub fn redact_key(key: &str) -> String {
    match RateLimitKey::parse(key) {
        Some(parsed) => parsed.redacted(),
        None => "<invalid key>".to_string(),
    }
}
