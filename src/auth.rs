//! Bearer-token authentication collaborator. Grounded on
//! `internal/auth/{jwt,middleware}.go`: the Go original stubs out real
//! signature verification pending an identity provider decision; the
//! scope it does own — extracting a token from the header or `?token=`
//! query fallback, and rejecting missing/invalid tokens before upgrade —
//! is translated here against `jsonwebtoken` so scopes are real rather
//! than a TODO.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub scope: Vec<String>,
    pub exp: usize,
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub scope: Vec<String>,
}

impl Principal {
    pub fn can_write(&self) -> bool {
        self.scope.is_empty()
            || self.scope.iter().any(|s| s == "write" || s == "admin")
    }
}

pub struct Authenticator {
    secret: String,
}

impl Authenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Extracts a bearer token from an `Authorization: Bearer <token>`
    /// header, falling back to a `token` query parameter for duplex
    /// clients that cannot set headers.
    pub fn extract_token<'a>(authorization: Option<&'a str>, query_token: Option<&'a str>) -> Option<&'a str> {
        if let Some(header) = authorization {
            if let Some(token) = header.strip_prefix("Bearer ") {
                return Some(token.trim());
            }
        }
        query_token.filter(|t| !t.is_empty())
    }

    pub fn authenticate(&self, token: &str) -> Result<Principal> {
        if token.trim().is_empty() {
            return Err(SyncError::Unauthorized);
        }
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| SyncError::Unauthorized)?;

        Ok(Principal {
            user_id: data.claims.sub,
            scope: data.claims.scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, scope: Vec<String>) -> String {
        let claims = Claims {
            sub: "user-1".into(),
            scope,
            exp: 9_999_999_999,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn valid_token_yields_principal() {
        let auth = Authenticator::new("s3cret");
        let t = token("s3cret", vec!["write".into()]);
        let principal = auth.authenticate(&t).unwrap();
        assert_eq!(principal.user_id, "user-1");
        assert!(principal.can_write());
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let auth = Authenticator::new("s3cret");
        let t = token("other-secret", vec![]);
        assert!(matches!(auth.authenticate(&t), Err(SyncError::Unauthorized)));
    }

    #[test]
    fn empty_token_is_unauthorized() {
        let auth = Authenticator::new("s3cret");
        assert!(matches!(auth.authenticate(""), Err(SyncError::Unauthorized)));
    }

    #[test]
    fn empty_scope_list_allows_write() {
        let principal = Principal {
            user_id: "u".into(),
            scope: vec![],
        };
        assert!(principal.can_write());
    }

    #[test]
    fn scope_without_write_or_admin_denies_write() {
        let principal = Principal {
            user_id: "u".into(),
            scope: vec!["read".into()],
        };
        assert!(!principal.can_write());
    }

    #[test]
    fn extract_token_prefers_header_over_query() {
        let t = Authenticator::extract_token(Some("Bearer abc"), Some("xyz"));
        assert_eq!(t, Some("abc"));
    }

    #[test]
    fn extract_token_falls_back_to_query() {
        let t = Authenticator::extract_token(None, Some("xyz"));
        assert_eq!(t, Some("xyz"));
    }
}
