use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::SessionPersistence;
use crate::models::{TokenPair, UserProfile};

/// Point-in-time copy of the session, also the persisted form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub has_logged_in_before: bool,
    #[serde(default)]
    pub biometric_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// Drop an authenticated flag that has no token behind it.
    fn normalized(mut self) -> Self {
        if self.token.is_none() {
            self.is_authenticated = false;
        }
        self
    }
}

struct Inner {
    state: RwLock<SessionSnapshot>,
    persistence: Option<Box<dyn SessionPersistence>>,
}

/// Shared session state.
///
/// Clone is cheap and every clone sees the same session. Mutations go through
/// the methods below and are persisted before the write lock is released, so
/// the saved file always matches the latest completed write.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("SessionStore")
            .field("is_authenticated", &state.is_authenticated)
            .field("has_token", &state.token.is_some())
            .field("has_refresh_token", &state.refresh_token.is_some())
            .field("persistent", &self.inner.persistence.is_some())
            .finish()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create an empty, in-memory session
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(SessionSnapshot::default()),
                persistence: None,
            }),
        }
    }

    /// Create a session backed by `persistence`, restoring whatever it holds.
    ///
    /// An unreadable snapshot starts the session empty instead of failing.
    pub fn with_persistence(persistence: impl SessionPersistence + 'static) -> Self {
        let restored = match persistence.load() {
            Ok(Some(snapshot)) => {
                debug!(authenticated = snapshot.is_authenticated, "Restored persisted session");
                snapshot.normalized()
            }
            Ok(None) => SessionSnapshot::default(),
            Err(e) => {
                warn!(error = %e, "Failed to restore session, starting signed out");
                SessionSnapshot::default()
            }
        };

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(restored),
                persistence: Some(Box::new(persistence)),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionSnapshot> {
        self.inner.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionSnapshot> {
        self.inner.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn mutate(&self, apply: impl FnOnce(&mut SessionSnapshot)) {
        let mut state = self.write();
        apply(&mut state);
        if let Some(ref persistence) = self.inner.persistence {
            if let Err(e) = persistence.save(&state) {
                warn!(error = %e, "Failed to persist session");
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read().clone()
    }

    /// Current bearer token, if signed in
    pub fn access_token(&self) -> Option<String> {
        self.read().token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.read().user.clone()
    }

    pub fn has_logged_in_before(&self) -> bool {
        self.read().has_logged_in_before
    }

    pub fn biometric_enabled(&self) -> bool {
        self.read().biometric_enabled
    }

    /// Sign in. A `None` user keeps the profile already on the session.
    pub fn login(&self, user: Option<UserProfile>, tokens: TokenPair) {
        self.mutate(|state| {
            if user.is_some() {
                state.user = user;
            }
            state.token = Some(tokens.access_token);
            state.refresh_token = tokens.refresh_token;
            state.is_authenticated = true;
            state.has_logged_in_before = true;
            state.authenticated_at = Some(Utc::now());
        });
        debug!("Session signed in");
    }

    /// Replace both tokens after a refresh.
    pub fn set_tokens(&self, tokens: TokenPair) {
        self.mutate(|state| {
            state.token = Some(tokens.access_token);
            state.refresh_token = tokens.refresh_token;
            state.is_authenticated = true;
            state.authenticated_at = Some(Utc::now());
        });
    }

    pub fn set_user(&self, user: UserProfile) {
        self.mutate(|state| state.user = Some(user));
    }

    pub fn set_biometric_enabled(&self, enabled: bool) {
        self.mutate(|state| state.biometric_enabled = enabled);
    }

    /// Sign out, keeping `has_logged_in_before` and `biometric_enabled`.
    pub fn logout(&self) {
        self.mutate(|state| {
            state.user = None;
            state.token = None;
            state.refresh_token = None;
            state.is_authenticated = false;
            state.authenticated_at = None;
        });
        debug!("Session signed out");
    }
}
