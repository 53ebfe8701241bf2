//! Biometric-gated credential vault.
//!
//! This module provides:
//! - `CredentialVault`: enable/disable/authenticate/update of the stored token pair
//! - `SecureStore`: platform secure storage (`KeyringStore`, `MemoryStore`)
//! - `BiometricAuthenticator`: the device's biometric factor
//!
//! The token pair is only released after a biometric challenge. A plain flag
//! records whether the feature is on so the UI can check it without prompting.

pub mod biometric;
pub mod credential;
pub mod store;

pub use biometric::{
    BiometricAuthenticator, BiometricAvailability, BiometricKind, ChallengeError, NoBiometrics,
};
pub use credential::{CredentialVault, VaultError, BIOMETRIC_FLAG_KEY, TOKEN_KEY};
pub use store::{Access, KeyringStore, MemoryStore, SecureStore, StoreError};
