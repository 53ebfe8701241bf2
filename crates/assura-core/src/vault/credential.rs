use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::biometric::{BiometricAuthenticator, BiometricAvailability};
use super::store::{Access, KeyringStore, SecureStore, StoreError};
use crate::auth::SessionStore;
use crate::config::Config;
use crate::models::TokenPair;

/// Secure-storage key of the biometric-protected token pair
pub const TOKEN_KEY: &str = "user_jwt_token";

/// Secure-storage key of the plain "biometric unlock is on" flag
pub const BIOMETRIC_FLAG_KEY: &str = "biometric_enabled";

/// Separator used by the old `token::refreshToken` encoding
const LEGACY_DELIMITER: &str = "::";

const FLAG_ENABLED: &str = "true";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Biometric authentication unavailable: {0}")]
    Unavailable(String),

    #[error("Biometric sign-in is not enabled")]
    NotEnabled,

    #[error("Biometric authentication cancelled")]
    Cancelled,

    #[error("No saved credentials found, please sign in with your password")]
    CredentialMissing,

    #[error("Saved credentials are unreadable: {0}")]
    Corrupted(String),

    #[error("Secure storage error: {0}")]
    Storage(String),
}

impl VaultError {
    /// The user dismissed the prompt. Callers should not report this as an error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, VaultError::Cancelled)
    }
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => VaultError::Cancelled,
            StoreError::Unavailable(message) => VaultError::Unavailable(message),
            StoreError::Platform(message) => VaultError::Storage(message),
        }
    }
}

fn encode_tokens(tokens: &TokenPair) -> Result<String, VaultError> {
    serde_json::to_string(tokens).map_err(|e| VaultError::Storage(e.to_string()))
}

fn decode_tokens(blob: &str) -> Result<TokenPair, VaultError> {
    if let Ok(tokens) = serde_json::from_str::<TokenPair>(blob) {
        return Ok(tokens);
    }
    if blob.is_empty() || blob.starts_with('{') {
        return Err(VaultError::Corrupted("unrecognised token entry".to_string()));
    }

    // Entries written by older app versions
    let (token, refresh) = blob.split_once(LEGACY_DELIMITER).unwrap_or((blob, ""));
    if token.is_empty() {
        return Err(VaultError::Corrupted("token entry has no access token".to_string()));
    }
    let refresh = (!refresh.is_empty()).then(|| refresh.to_string());
    Ok(TokenPair::new(token, refresh))
}

/// Biometric-gated storage for the session's token pair.
///
/// The token pair is written with biometric access control, so every
/// `authenticate` shows the OS prompt. A separate plain flag answers
/// "is biometric sign-in on" without prompting.
pub struct CredentialVault {
    store: Arc<dyn SecureStore>,
    biometrics: Arc<dyn BiometricAuthenticator>,
    session: Option<SessionStore>,
    prompt: String,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("prompt", &self.prompt)
            .field("mirrors_session", &self.session.is_some())
            .finish()
    }
}

impl CredentialVault {
    pub fn new(store: Arc<dyn SecureStore>, biometrics: Arc<dyn BiometricAuthenticator>) -> Self {
        Self {
            store,
            biometrics,
            session: None,
            prompt: Config::default().biometric_prompt,
        }
    }

    /// Vault on the OS keychain, gated by `biometrics`.
    pub fn from_config(config: &Config, biometrics: Arc<dyn BiometricAuthenticator>) -> Self {
        let store = KeyringStore::new(&config.keyring_service).with_gate(Arc::clone(&biometrics));
        Self::new(Arc::new(store), biometrics).with_prompt(&config.biometric_prompt)
    }

    /// Mirror the enabled state into `session.biometric_enabled`
    pub fn with_session(mut self, session: SessionStore) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Run a secure-storage call on the blocking pool.
    async fn blocking<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn SecureStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || call(&*store))
            .await
            .map_err(|e| StoreError::Platform(format!("secure storage task failed: {}", e)))?
    }

    fn mirror(&self, enabled: bool) {
        if let Some(ref session) = self.session {
            session.set_biometric_enabled(enabled);
        }
    }

    async fn write_tokens(&self, tokens: &TokenPair) -> Result<(), VaultError> {
        let blob = encode_tokens(tokens)?;
        self.blocking(move |store| store.write(TOKEN_KEY, &blob, Access::BiometryCurrentDevice))
            .await?;
        Ok(())
    }

    /// Whether the device offers a usable biometric factor. Never fails.
    pub async fn check_availability(&self) -> BiometricAvailability {
        let biometrics = Arc::clone(&self.biometrics);
        tokio::task::spawn_blocking(move || biometrics.availability())
            .await
            .unwrap_or_else(|e| {
                BiometricAvailability::unavailable(format!("availability check failed: {}", e))
            })
    }

    /// Whether biometric sign-in is on. Read failures count as off.
    pub async fn is_enabled(&self) -> bool {
        let prompt = self.prompt.clone();
        match self
            .blocking(move |store| store.read(BIOMETRIC_FLAG_KEY, &prompt))
            .await
        {
            Ok(flag) => flag.as_deref() == Some(FLAG_ENABLED),
            Err(e) => {
                warn!(error = %e, "Failed to read biometric flag");
                false
            }
        }
    }

    /// Store the token pair behind the biometric gate and turn the feature on.
    ///
    /// The token entry is written before the flag. If the flag cannot be
    /// written the vault is turned off entirely, so a failed enable (or
    /// re-enable) never leaves the flag set without a token.
    pub async fn enable(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), VaultError> {
        let availability = self.check_availability().await;
        if !availability.available {
            let reason = availability
                .reason
                .unwrap_or_else(|| "Biometric authentication is not available".to_string());
            info!(reason = %reason, "Cannot enable biometric sign-in");
            return Err(VaultError::Unavailable(reason));
        }

        let tokens = TokenPair::new(access_token, refresh_token.map(str::to_string));
        self.write_tokens(&tokens).await?;

        if let Err(e) = self
            .blocking(|store| store.write(BIOMETRIC_FLAG_KEY, FLAG_ENABLED, Access::Plain))
            .await
        {
            warn!(error = %e, "Failed to set biometric flag, turning biometric sign-in off");
            if let Err(rollback) = self.erase_entries().await {
                warn!(error = %rollback, "Failed to roll back biometric enable");
            }
            return Err(e.into());
        }

        self.mirror(true);
        info!(kind = ?availability.kind, "Biometric sign-in enabled");
        Ok(())
    }

    /// Erase the flag and the token pair. Safe to call when already disabled.
    pub async fn disable(&self) -> Result<(), VaultError> {
        self.erase_entries().await?;
        self.mirror(false);
        info!("Biometric sign-in disabled");
        Ok(())
    }

    /// The flag goes first: if the token erase then fails, the vault reads
    /// as off with a leftover entry, never as on without a token.
    async fn erase_entries(&self) -> Result<(), StoreError> {
        self.blocking(|store| store.erase(BIOMETRIC_FLAG_KEY)).await?;
        self.mirror(false);
        self.blocking(|store| store.erase(TOKEN_KEY)).await
    }

    /// Release the stored token pair. The OS prompt is shown by the read.
    pub async fn authenticate(&self) -> Result<TokenPair, VaultError> {
        if !self.is_enabled().await {
            return Err(VaultError::NotEnabled);
        }

        let prompt = self.prompt.clone();
        match self
            .blocking(move |store| store.read(TOKEN_KEY, &prompt))
            .await
        {
            Ok(Some(blob)) => {
                let tokens = decode_tokens(&blob)?;
                debug!("Biometric authentication succeeded");
                Ok(tokens)
            }
            Ok(None) => {
                warn!("Biometric flag set without a stored token, clearing flag");
                if let Err(e) = self.blocking(|store| store.erase(BIOMETRIC_FLAG_KEY)).await {
                    warn!(error = %e, "Failed to clear stale biometric flag");
                }
                self.mirror(false);
                Err(VaultError::CredentialMissing)
            }
            Err(StoreError::Cancelled) => {
                debug!("Biometric prompt cancelled");
                Err(VaultError::Cancelled)
            }
            Err(e) => {
                warn!(error = %e, "Biometric authentication failed");
                Err(e.into())
            }
        }
    }

    /// Replace the stored token pair, e.g. after the gateway refreshed it.
    pub async fn update_token(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), VaultError> {
        if !self.is_enabled().await {
            return Err(VaultError::NotEnabled);
        }
        let tokens = TokenPair::new(access_token, refresh_token.map(str::to_string));
        self.write_tokens(&tokens).await?;
        debug!("Stored token pair updated");
        Ok(())
    }

    /// Authenticate and sign `session` in with the released tokens.
    pub async fn unlock_session(&self, session: &SessionStore) -> Result<(), VaultError> {
        let tokens = self.authenticate().await?;
        session.login(None, tokens);
        Ok(())
    }
}
