//! Platform secure storage behind the credential vault.
//!
//! Entries written with `Access::BiometryCurrentDevice` can only be read back
//! after a successful biometric challenge. The challenge is part of the read,
//! the caller never runs it separately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use keyring::Entry;
use thiserror::Error;
use tracing::debug;

use super::biometric::{BiometricAuthenticator, ChallengeError};

/// Suffix for the keychain account holding a biometric-protected entry
const PROTECTED_SUFFIX: &str = "#biometry";

/// Fragments platform keystores use when the user dismisses the prompt.
const CANCELLATION_MARKERS: &[&str] = &["cancel", "negative_button"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Readable without a challenge
    Plain,
    /// Every read requires a biometric (or device passcode) challenge.
    /// Never leaves this device.
    BiometryCurrentDevice,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Authentication cancelled by user")]
    Cancelled,

    #[error("Secure storage unavailable: {0}")]
    Unavailable(String),

    #[error("Secure storage error: {0}")]
    Platform(String),
}

impl StoreError {
    /// Classify a raw platform error message, recognising user cancellation.
    pub fn from_platform_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_cancellation(&message) {
            StoreError::Cancelled
        } else {
            StoreError::Platform(message)
        }
    }
}

impl From<ChallengeError> for StoreError {
    fn from(err: ChallengeError) -> Self {
        match err {
            ChallengeError::Cancelled => StoreError::Cancelled,
            ChallengeError::Failed(message) => StoreError::from_platform_message(message),
        }
    }
}

pub fn is_cancellation(message: &str) -> bool {
    let lower = message.to_lowercase();
    CANCELLATION_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Key-value secure storage. Calls may block on keychain I/O or an OS prompt.
pub trait SecureStore: Send + Sync {
    fn write(&self, key: &str, value: &str, access: Access) -> Result<(), StoreError>;

    /// Read an entry. `prompt` is shown if the entry is biometric-protected.
    fn read(&self, key: &str, prompt: &str) -> Result<Option<String>, StoreError>;

    /// Erase an entry. Erasing an absent entry succeeds.
    fn erase(&self, key: &str) -> Result<(), StoreError>;
}

fn require_gate(
    gate: &Option<Arc<dyn BiometricAuthenticator>>,
) -> Result<&Arc<dyn BiometricAuthenticator>, StoreError> {
    gate.as_ref().ok_or_else(|| {
        StoreError::Unavailable("no biometric gate configured for protected entries".to_string())
    })
}

/// Challenge for a protected entry. `load` only runs once the user passed,
/// so a refused prompt never brings the secret into memory.
fn unlock<F>(
    gate: &Option<Arc<dyn BiometricAuthenticator>>,
    prompt: &str,
    load: F,
) -> Result<Option<String>, StoreError>
where
    F: FnOnce() -> Result<Option<String>, StoreError>,
{
    require_gate(gate)?.challenge(prompt)?;
    load()
}

// ============================================================================
// OS keychain
// ============================================================================

/// Secure store on the OS keychain.
pub struct KeyringStore {
    service: String,
    gate: Option<Arc<dyn BiometricAuthenticator>>,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            gate: None,
        }
    }

    /// Challenge that guards reads of protected entries
    pub fn with_gate(mut self, gate: Arc<dyn BiometricAuthenticator>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn entry(&self, account: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service, account)
            .map_err(|e| StoreError::Unavailable(format!("Failed to create keyring entry: {}", e)))
    }

    fn get(&self, account: &str) -> Result<Option<String>, StoreError> {
        match self.entry(account)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::from_platform_message(e.to_string())),
        }
    }

    /// Attribute lookup, which does not release the secret
    fn exists(&self, account: &str) -> Result<bool, StoreError> {
        match self.entry(account)?.get_attributes() {
            Ok(_) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(StoreError::from_platform_message(e.to_string())),
        }
    }

    fn delete(&self, account: &str) -> Result<(), StoreError> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::from_platform_message(e.to_string())),
        }
    }
}

impl SecureStore for KeyringStore {
    fn write(&self, key: &str, value: &str, access: Access) -> Result<(), StoreError> {
        let (account, stale) = match access {
            Access::Plain => (key.to_string(), protected_account(key)),
            Access::BiometryCurrentDevice => {
                let gate = require_gate(&self.gate)?;
                if !gate.availability().available {
                    return Err(StoreError::Unavailable(
                        "biometric protection is not available".to_string(),
                    ));
                }
                (protected_account(key), key.to_string())
            }
        };

        self.entry(&account)?
            .set_password(value)
            .map_err(|e| StoreError::from_platform_message(e.to_string()))?;
        self.delete(&stale)?;
        debug!(key = key, ?access, "Stored keychain entry");
        Ok(())
    }

    fn read(&self, key: &str, prompt: &str) -> Result<Option<String>, StoreError> {
        let protected = protected_account(key);
        if self.exists(&protected)? {
            return unlock(&self.gate, prompt, || self.get(&protected));
        }
        self.get(key)
    }

    fn erase(&self, key: &str) -> Result<(), StoreError> {
        self.delete(&protected_account(key))?;
        self.delete(key)
    }
}

fn protected_account(key: &str) -> String {
    format!("{}{}", key, PROTECTED_SUFFIX)
}

// ============================================================================
// In-memory
// ============================================================================

/// In-process secure store with the same gating rules as the keychain.
/// Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Access)>>,
    gate: Option<Arc<dyn BiometricAuthenticator>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(mut self, gate: Arc<dyn BiometricAuthenticator>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn value(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|(value, _)| value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecureStore for MemoryStore {
    fn write(&self, key: &str, value: &str, access: Access) -> Result<(), StoreError> {
        if access == Access::BiometryCurrentDevice
            && !require_gate(&self.gate)?.availability().available
        {
            return Err(StoreError::Unavailable(
                "biometric protection is not available".to_string(),
            ));
        }
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (value.to_string(), access));
        Ok(())
    }

    fn read(&self, key: &str, prompt: &str) -> Result<Option<String>, StoreError> {
        let access = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|(_, access)| *access);

        match access {
            None => Ok(None),
            Some(Access::Plain) => Ok(self.value(key)),
            // Lock released above: the prompt may block for a while
            Some(Access::BiometryCurrentDevice) => unlock(&self.gate, prompt, || Ok(self.value(key))),
        }
    }

    fn erase(&self, key: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}
