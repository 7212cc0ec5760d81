// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use jsonwebtoken_aws_lc::errors::ErrorKind;
use jsonwebtoken_aws_lc::{DecodingKey, TokenData, Validation, decode, decode_header};
use serde::Deserialize;
use tracing::debug;

use crate::errors::AuthError;
use crate::traits::{Identity, SessionStatus, SessionValidator, TokenProvider};

#[derive(Debug, Deserialize)]
struct SessionClaims {
    #[serde(default)]
    sub: Option<String>,
}

/// Validates the session by inspecting the claims of its access token.
///
/// The signature is not checked: the backend verifies it on every request,
/// this only gates whether it is worth opening a channel at all.
#[derive(Debug, Clone)]
pub struct JwtSessionValidator<P> {
    provider: P,

    /// seconds of clock skew tolerated on `exp`
    leeway: u64,
}

impl<P> JwtSessionValidator<P>
where
    P: TokenProvider,
{
    pub fn new(provider: P) -> Self {
        JwtSessionValidator {
            provider,
            leeway: 0,
        }
    }

    pub fn with_leeway(self, leeway: u64) -> Self {
        JwtSessionValidator { leeway, ..self }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn check(&self) -> Result<Identity, AuthError> {
        let token = self.provider.get_token()?;
        let header = decode_header(&token)?;

        let mut validation = Validation::new(header.alg);
        validation.insecure_disable_signature_validation();
        validation.validate_aud = false;
        validation.leeway = self.leeway;

        let token_data: TokenData<SessionClaims> =
            decode(&token, &DecodingKey::from_secret(b"unused"), &validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::TokenInvalid(e.to_string()),
                }
            })?;

        token_data
            .claims
            .sub
            .filter(|sub| !sub.is_empty())
            .map(Identity::new)
            .ok_or_else(|| AuthError::TokenInvalid("missing subject".to_string()))
    }
}

#[async_trait]
impl<P> SessionValidator for JwtSessionValidator<P>
where
    P: TokenProvider + Send + Sync,
{
    async fn validate(&self) -> SessionStatus {
        match self.check() {
            Ok(identity) => SessionStatus::valid(identity),
            Err(e) => {
                debug!(error = %e, "session not usable");
                SessionStatus::invalid()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use jsonwebtoken_aws_lc::{EncodingKey, Header, encode};
    use serde::Serialize;
    use tracing_test::traced_test;

    use super::*;
    use crate::session::{Session, SessionStore};

    #[derive(Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        exp: u64,
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn token(sub: &str, exp: u64) -> String {
        encode(
            &Header::default(),
            &Claims { sub, exp },
            &EncodingKey::from_secret(b"backend-secret"),
        )
        .unwrap()
    }

    fn store_with(access_token: String) -> SessionStore {
        let store = SessionStore::new();
        store.set(Session::new(Identity::new("agent-7"), access_token));
        store
    }

    #[tokio::test]
    async fn test_valid_token() {
        let validator = JwtSessionValidator::new(store_with(token("agent-7", now() + 3600)));

        let status = validator.validate().await;
        assert!(status.is_valid);
        assert_eq!(status.identity, Some(Identity::new("agent-7")));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_expired_token() {
        let validator = JwtSessionValidator::new(store_with(token("agent-7", now() - 3600)));

        assert_eq!(validator.validate().await, SessionStatus::invalid());
        assert!(logs_contain("token expired"));
    }

    #[tokio::test]
    async fn test_leeway_accepts_recently_expired_token() {
        let validator = JwtSessionValidator::new(store_with(token("agent-7", now() - 10)))
            .with_leeway(120);

        assert!(validator.validate().await.is_valid);
    }

    #[tokio::test]
    async fn test_missing_subject() {
        let validator = JwtSessionValidator::new(store_with(token("", now() + 3600)));

        assert!(!validator.validate().await.is_valid);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_garbage_and_missing_tokens_never_fail() {
        let validator = JwtSessionValidator::new(store_with("not-a-jwt".to_string()));
        assert!(!validator.validate().await.is_valid);

        let validator = JwtSessionValidator::new(SessionStore::new());
        assert!(!validator.validate().await.is_valid);
        assert!(logs_contain("no active session"));
    }
}
