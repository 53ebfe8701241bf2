//! Session lifecycle for the Assura onboarding app.
//!
//! - `api`: request gateway with single-flight token refresh
//! - `auth`: the shared session and its persistence
//! - `vault`: biometric-gated storage of the token pair
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use assura_core::{ApiClient, Config, CredentialVault, FileSessionPersistence, NoBiometrics, SessionStore};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let session = SessionStore::with_persistence(FileSessionPersistence::new(config.cache_dir()?));
//! let vault = Arc::new(
//!     CredentialVault::from_config(&config, Arc::new(NoBiometrics)).with_session(session.clone()),
//! );
//! let api = ApiClient::new(&config, session)?.with_vault_sync(vault);
//!
//! api.login("ana@example.com", "correct horse").await?;
//! let policies: serde_json::Value = api.get("/policies").await?;
//! # let _ = policies;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod vault;

pub use api::{ApiClient, ApiError, ApiRequest, RefreshError};
pub use auth::{FileSessionPersistence, SessionPersistence, SessionSnapshot, SessionStore};
pub use config::Config;
pub use models::{TokenPair, UserProfile};
pub use vault::{
    BiometricAuthenticator, BiometricAvailability, BiometricKind, CredentialVault, KeyringStore,
    MemoryStore, NoBiometrics, SecureStore, VaultError,
};
