use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of biometric factor the device offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum BiometricKind {
    Face,
    Fingerprint,
    Iris,
    Generic,
}

impl BiometricKind {
    /// Label shown on the "sign in with ..." button
    pub fn display_name(&self) -> &'static str {
        match self {
            BiometricKind::Face => "Face ID",
            BiometricKind::Fingerprint => "Fingerprint",
            BiometricKind::Iris => "Iris",
            BiometricKind::Generic => "Biometrics",
        }
    }
}

/// Result of a capability check. Unavailability is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct BiometricAvailability {
    pub available: bool,
    pub kind: Option<BiometricKind>,
    pub reason: Option<String>,
}

impl BiometricAvailability {
    pub fn available(kind: BiometricKind) -> Self {
        Self {
            available: true,
            kind: Some(kind),
            reason: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            kind: None,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("Biometric prompt cancelled by user")]
    Cancelled,

    #[error("Biometric authentication failed: {0}")]
    Failed(String),
}

/// Platform biometric factor (Face ID, fingerprint reader, ...).
///
/// Both calls may block while the OS shows its prompt.
pub trait BiometricAuthenticator: Send + Sync {
    fn availability(&self) -> BiometricAvailability;

    /// Show the OS prompt and wait for the user.
    fn challenge(&self, prompt: &str) -> Result<(), ChallengeError>;
}

/// Authenticator for hosts without a biometric factor. Every challenge fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBiometrics;

impl BiometricAuthenticator for NoBiometrics {
    fn availability(&self) -> BiometricAvailability {
        BiometricAvailability::unavailable("Biometric authentication is not available on this device")
    }

    fn challenge(&self, _prompt: &str) -> Result<(), ChallengeError> {
        Err(ChallengeError::Failed("no biometric hardware".to_string()))
    }
}
