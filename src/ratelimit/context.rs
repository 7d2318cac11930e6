//! Request context and dimension tags.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A named request attribute that a rule can be scoped by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Dimension {
    /// Client IP address
    Ip,
    /// Keyed hash of the submitted email
    EmailHash,
    /// Keyed hash of the submitted phone number
    PhoneHash,
    /// Authenticated or claimed user id
    UserId,
    /// Session identifier
    SessionId,
    /// The action being performed
    Action,
    /// The request route
    Route,
    /// Any other tag, looked up in the context's custom map
    Custom(String),
}

impl Dimension {
    /// The canonical tag used in keys and configuration.
    pub fn tag(&self) -> &str {
        match self {
            Dimension::Ip => "ip",
            Dimension::EmailHash => "emailHash",
            Dimension::PhoneHash => "phoneHash",
            Dimension::UserId => "userId",
            Dimension::SessionId => "sessionId",
            Dimension::Action => "action",
            Dimension::Route => "route",
            Dimension::Custom(tag) => tag,
        }
    }

    /// Whether values for this dimension are opaque hashes.
    pub fn is_hash_like(&self) -> bool {
        match self {
            Dimension::EmailHash | Dimension::PhoneHash => true,
            Dimension::Custom(tag) => tag.ends_with("Hash") || tag.ends_with("_hash"),
            _ => false,
        }
    }

    /// Whether values for this dimension are shortened before they reach
    /// a log line: hashes and session ids.
    pub fn is_sensitive(&self) -> bool {
        self.is_hash_like() || matches!(self, Dimension::SessionId)
    }
}

impl From<&str> for Dimension {
    fn from(tag: &str) -> Self {
        match tag {
            "ip" => Dimension::Ip,
            "emailHash" | "email_hash" => Dimension::EmailHash,
            "phoneHash" | "phone_hash" => Dimension::PhoneHash,
            "userId" | "user_id" => Dimension::UserId,
            "sessionId" | "session_id" => Dimension::SessionId,
            "action" => Dimension::Action,
            "route" => Dimension::Route,
            other => Dimension::Custom(other.to_string()),
        }
    }
}

impl From<String> for Dimension {
    fn from(tag: String) -> Self {
        Dimension::from(tag.as_str())
    }
}

impl From<Dimension> for String {
    fn from(dimension: Dimension) -> Self {
        dimension.tag().to_string()
    }
}

impl FromStr for Dimension {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Dimension::from(s))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Everything the engine knows about one request.
///
/// Built per request by whatever sits in front of the engine (an HTTP
/// adapter, the CLI, a test). Email and phone arrive already hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub action: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub email_hash: Option<String>,
    #[serde(default)]
    pub phone_hash: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    /// Tags outside the well-known set
    #[serde(default)]
    pub custom: HashMap<String, String>,
}

impl RequestContext {
    /// Create a context for `action` with no other attributes.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_email_hash(mut self, hash: impl Into<String>) -> Self {
        self.email_hash = Some(hash.into());
        self
    }

    pub fn with_phone_hash(mut self, hash: impl Into<String>) -> Self {
        self.phone_hash = Some(hash.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_custom(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(tag.into(), value.into());
        self
    }

    /// Look up the raw value for a dimension, if present.
    pub fn get(&self, dimension: &Dimension) -> Option<&str> {
        match dimension {
            Dimension::Ip => self.ip.as_deref(),
            Dimension::EmailHash => self.email_hash.as_deref(),
            Dimension::PhoneHash => self.phone_hash.as_deref(),
            Dimension::UserId => self.user_id.as_deref(),
            Dimension::SessionId => self.session_id.as_deref(),
            Dimension::Action => Some(self.action.as_str()),
            Dimension::Route => self.route.as_deref(),
            Dimension::Custom(tag) => self.custom.get(tag).map(String::as_str),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_parsing() {
        assert_eq!(Dimension::from("ip"), Dimension::Ip);
        assert_eq!(Dimension::from("emailHash"), Dimension::EmailHash);
        assert_eq!(Dimension::from("email_hash"), Dimension::EmailHash);
        assert_eq!(Dimension::from("user_id"), Dimension::UserId);
        assert_eq!(
            Dimension::from("deviceId"),
            Dimension::Custom("deviceId".to_string())
        );
    }

    #[test]
    fn test_dimension_display_is_camel_case() {
        assert_eq!(Dimension::from("phone_hash").to_string(), "phoneHash");
        assert_eq!(Dimension::SessionId.to_string(), "sessionId");
    }

    #[test]
    fn test_dimension_yaml_roundtrip() {
        let dims: Vec<Dimension> = serde_yaml::from_str("[ip, email_hash, tenant]").unwrap();
        assert_eq!(
            dims,
            vec![
                Dimension::Ip,
                Dimension::EmailHash,
                Dimension::Custom("tenant".to_string())
            ]
        );
    }

    #[test]
    fn test_hash_like_dimensions() {
        assert!(Dimension::EmailHash.is_hash_like());
        assert!(Dimension::PhoneHash.is_hash_like());
        assert!(Dimension::Custom("deviceHash".to_string()).is_hash_like());
        assert!(!Dimension::Ip.is_hash_like());
    }

    #[test]
    fn test_sensitive_dimensions() {
        assert!(Dimension::SessionId.is_sensitive());
        assert!(!Dimension::SessionId.is_hash_like());
        assert!(Dimension::EmailHash.is_sensitive());
        assert!(!Dimension::Ip.is_sensitive());
        assert!(!Dimension::UserId.is_sensitive());
    }

    #[test]
    fn test_context_lookup() {
        let ctx = RequestContext::new("login")
            .with_ip("203.0.113.7")
            .with_user_id("u-42")
            .with_custom("tenant", "acme");

        assert_eq!(ctx.get(&Dimension::Ip), Some("203.0.113.7"));
        assert_eq!(ctx.get(&Dimension::UserId), Some("u-42"));
        assert_eq!(ctx.get(&Dimension::Action), Some("login"));
        assert_eq!(ctx.get(&Dimension::EmailHash), None);
        assert_eq!(ctx.get(&Dimension::Custom("tenant".to_string())), Some("acme"));
        assert_eq!(ctx.get(&Dimension::Custom("region".to_string())), None);
    }
}
