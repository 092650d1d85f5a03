//! Unified error types for the keystore core
//!
//! Every backend maps its failures onto the same taxonomy so callers can
//! react without knowing which device or signer produced the error.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::transport::TransportError;

/// Main error type for all keystore operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
    /// Cosigner index of the keystore that failed, set by the signing coordinator
    pub cosigner: Option<usize>,
}

impl KeystoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            cosigner: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Attach the index of the cosigner whose call produced this error
    pub fn at_cosigner(mut self, index: usize) -> Self {
        self.cosigner = Some(index);
        self
    }

    // Convenience constructors
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPath, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedOperation, msg)
    }

    pub fn user_rejected(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::UserRejected, msg)
    }

    pub fn communication(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Communication, msg)
    }

    pub fn invalid_transaction(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidTransaction, msg)
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Configuration, msg)
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Busy, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, msg)
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }

    /// Whether a caller may offer the user a plain retry.
    ///
    /// A rejection on the device is a decision, not a fault, so it is never
    /// retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code, ErrorCode::Communication | ErrorCode::Busy)
    }
}

impl fmt::Display for KeystoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(index) = self.cosigner {
            write!(f, " [cosigner {}]", index)?;
        }
        Ok(())
    }
}

impl std::error::Error for KeystoreError {}

/// Error codes for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Contract errors
    InvalidPath,
    UnsupportedOperation,
    UserRejected,
    Communication,
    InvalidTransaction,
    Configuration,
    Busy,
    Cancelled,

    // Ambient
    InvalidInput,
    Internal,
}

/// Result type alias for keystore operations
pub type KeystoreResult<T> = Result<T, KeystoreError>;

// Conversions from common error types

impl From<bitcoin::bip32::Error> for KeystoreError {
    fn from(e: bitcoin::bip32::Error) -> Self {
        use bitcoin::bip32::Error as Bip32Error;
        match e {
            Bip32Error::CannotDeriveFromHardenedKey
            | Bip32Error::InvalidChildNumber(_)
            | Bip32Error::InvalidChildNumberFormat
            | Bip32Error::InvalidDerivationPathFormat
            | Bip32Error::MaximumDepthExceeded => {
                KeystoreError::invalid_path(format!("BIP32 error: {}", e))
            }
            other => KeystoreError::internal(format!("BIP32 error: {}", other)),
        }
    }
}

impl From<bitcoin::secp256k1::Error> for KeystoreError {
    fn from(e: bitcoin::secp256k1::Error) -> Self {
        KeystoreError::internal(format!("Secp256k1 error: {}", e))
    }
}

impl From<bip39::Error> for KeystoreError {
    fn from(e: bip39::Error) -> Self {
        KeystoreError::invalid_input(format!("BIP39 error: {}", e))
    }
}

impl From<hex::FromHexError> for KeystoreError {
    fn from(e: hex::FromHexError) -> Self {
        KeystoreError::invalid_input(format!("Hex error: {}", e))
    }
}

impl From<serde_json::Error> for KeystoreError {
    fn from(e: serde_json::Error) -> Self {
        KeystoreError::configuration(format!("JSON error: {}", e))
    }
}

impl From<TransportError> for KeystoreError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Rejected => KeystoreError::user_rejected("Rejected on device"),
            TransportError::Cancelled => KeystoreError::cancelled("Operation cancelled"),
            TransportError::Disconnected(msg) => {
                KeystoreError::communication("Device disconnected").with_details(msg)
            }
            TransportError::Malformed(msg) => {
                KeystoreError::communication("Malformed device response").with_details(msg)
            }
            TransportError::Refused(msg) => {
                KeystoreError::invalid_transaction("Device refused the request").with_details(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = KeystoreError::user_rejected("Declined on device")
            .with_details("sign step")
            .at_cosigner(1);

        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("user_rejected"));
        assert!(json.contains("Declined on device"));

        let back: KeystoreError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_display_includes_cosigner() {
        let err = KeystoreError::communication("timeout").at_cosigner(2);
        assert_eq!(err.to_string(), "[Communication] timeout [cosigner 2]");
    }

    #[test]
    fn test_rejection_and_communication_are_distinguishable() {
        assert!(!KeystoreError::user_rejected("no").is_retryable());
        assert!(KeystoreError::communication("unplugged").is_retryable());
        assert!(KeystoreError::busy("in use").is_retryable());
        assert!(!KeystoreError::configuration("dup").is_retryable());
    }

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(KeystoreError::from(TransportError::Rejected).code, ErrorCode::UserRejected);
        assert_eq!(KeystoreError::from(TransportError::Cancelled).code, ErrorCode::Cancelled);
        assert_eq!(
            KeystoreError::from(TransportError::Disconnected("usb".into())).code,
            ErrorCode::Communication
        );
        assert_eq!(
            KeystoreError::from(TransportError::Refused("unknown input".into())).code,
            ErrorCode::InvalidTransaction
        );
    }

    #[test]
    fn test_bip32_path_errors_map_to_invalid_path() {
        let err = KeystoreError::from(bitcoin::bip32::Error::CannotDeriveFromHardenedKey);
        assert_eq!(err.code, ErrorCode::InvalidPath);
        let err = KeystoreError::from(bitcoin::bip32::Error::MaximumDepthExceeded);
        assert_eq!(err.code, ErrorCode::InvalidPath);
    }
}
