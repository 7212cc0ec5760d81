// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::errors::AuthError;
use crate::traits::{Identity, SessionStatus, SessionValidator, TokenProvider};

/// Session issued by the backend after sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    identity: Identity,
    access_token: String,
}

impl Session {
    pub fn new(identity: Identity, access_token: impl Into<String>) -> Self {
        Session {
            identity,
            access_token: access_token.into(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

/// Shared slot holding the current session. Sign-in and sign-out code
/// writes it, subscriptions only read it. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    current: Arc<RwLock<Option<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, session: Session) {
        debug!(identity = %session.identity(), "session stored");
        *self.current.write() = Some(session);
    }

    pub fn clear(&self) {
        if self.current.write().take().is_some() {
            debug!("session cleared");
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }
}

impl TokenProvider for SessionStore {
    fn get_token(&self) -> Result<String, AuthError> {
        self.current
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(AuthError::NoActiveSession)
    }
}

#[async_trait]
impl SessionValidator for SessionStore {
    async fn validate(&self) -> SessionStatus {
        match self.current.read().as_ref() {
            Some(session) if !session.identity.as_str().is_empty() => {
                SessionStatus::valid(session.identity.clone())
            }
            _ => SessionStatus::invalid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_store_is_invalid() {
        let store = SessionStore::new();

        assert_eq!(store.validate().await, SessionStatus::invalid());
        assert!(matches!(store.get_token(), Err(AuthError::NoActiveSession)));
    }

    #[tokio::test]
    async fn test_store_shared_between_clones() {
        let store = SessionStore::new();
        let reader = store.clone();

        store.set(Session::new(Identity::new("agent-7"), "token"));

        let status = reader.validate().await;
        assert!(status.is_valid);
        assert_eq!(status.identity, Some(Identity::new("agent-7")));
        assert_eq!(reader.get_token().unwrap(), "token");

        store.clear();
        assert!(!reader.validate().await.is_valid);
        assert!(reader.current().is_none());
    }

    #[tokio::test]
    async fn test_empty_identity_is_invalid() {
        let store = SessionStore::new();
        store.set(Session::new(Identity::new(""), "token"));

        assert!(!store.validate().await.is_valid);
    }
}
