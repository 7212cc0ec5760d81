// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Common traits for session gating.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::AuthError;

/// Identity of the signed-in user as known by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Identity(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a session check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub is_valid: bool,
    pub identity: Option<Identity>,
}

impl SessionStatus {
    pub fn valid(identity: Identity) -> Self {
        SessionStatus {
            is_valid: true,
            identity: Some(identity),
        }
    }

    pub fn invalid() -> Self {
        SessionStatus {
            is_valid: false,
            identity: None,
        }
    }
}

/// Source of the access token attached to the current session.
pub trait TokenProvider {
    fn get_token(&self) -> Result<String, AuthError>;
}

/// Answers whether a usable identity exists right now.
///
/// Implementations must not fail: any fault while checking the session is
/// reported as [`SessionStatus::invalid`], so callers can treat "cannot tell"
/// exactly like "not ready" and retry.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn validate(&self) -> SessionStatus;
}

#[async_trait]
impl<T> SessionValidator for Arc<T>
where
    T: SessionValidator + ?Sized,
{
    async fn validate(&self) -> SessionStatus {
        (**self).validate().await
    }
}
