//! Caller identity: Firebase ID tokens for the dashboard, API keys for
//! programmatic access.

mod extract;
mod firebase;

pub use extract::{ApiKeyAuth, ApiKeyContext, CurrentUser, Whitelisted};
pub use firebase::{FirebaseVerifier, Jwk};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Role required for the dashboard surfaces.
pub const WHITELISTED: &str = "whitelisted";
/// Role that satisfies every role check.
pub const DEVELOPER: &str = "developer";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization header is required")]
    MissingToken,
    #[error("Authorization header must be Bearer token")]
    MalformedHeader,
    #[error("Invalid ID token: {0}")]
    InvalidToken(String),
    #[error("ID token has expired")]
    Expired,
    #[error("Could not fetch signing keys: {0}")]
    KeyFetch(String),
    #[error("User does not have required role: {0}")]
    MissingRole(String),
    #[error("X-API-Key header is required")]
    MissingApiKey,
    #[error("Invalid or inactive API key")]
    InvalidApiKey,
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: String,
    pub name: Option<String>,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == DEVELOPER || r == role)
    }

    pub fn require_role(&self, role: &str) -> Result<(), AuthError> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(AuthError::MissingRole(role.to_string()))
        }
    }
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// `roles` custom claim: either an array of strings or a comma-separated string.
pub fn parse_roles(claim: Option<&Value>) -> Vec<String> {
    match claim {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect(),
        Some(other) => {
            tracing::warn!(claim = %other, "Unexpected roles claim type");
            Vec::new()
        }
        None => Vec::new(),
    }
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingToken)?;
    let (scheme, token) = header.split_once(' ').ok_or(AuthError::MalformedHeader)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(roles: &[&str]) -> Identity {
        Identity {
            uid: "uid-1".into(),
            email: "a@example.com".into(),
            name: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn roles_from_array_or_string() {
        assert_eq!(
            parse_roles(Some(&json!(["whitelisted", 3, "admin"]))),
            vec!["whitelisted", "admin"]
        );
        assert_eq!(
            parse_roles(Some(&json!("whitelisted, developer,"))),
            vec!["whitelisted", "developer"]
        );
        assert!(parse_roles(Some(&json!(""))).is_empty());
        assert!(parse_roles(Some(&json!({"a": 1}))).is_empty());
        assert!(parse_roles(None).is_empty());
    }

    #[test]
    fn developer_satisfies_any_role() {
        assert!(identity(&["developer"]).has_role(WHITELISTED));
        assert!(identity(&["whitelisted"]).has_role(WHITELISTED));
        assert!(identity(&["viewer"]).require_role(WHITELISTED).is_err());
        assert!(identity(&[]).require_role(WHITELISTED).is_err());
    }

    #[test]
    fn parses_bearer_header() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(Some("bearer abc")).unwrap(), "abc");
        assert!(matches!(bearer_token(None), Err(AuthError::MissingToken)));
        assert!(matches!(
            bearer_token(Some("Basic abc")),
            Err(AuthError::MalformedHeader)
        ));
        assert!(matches!(
            bearer_token(Some("Bearer")),
            Err(AuthError::MalformedHeader)
        ));
    }
}
