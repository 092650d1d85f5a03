//! Backend Transport Boundary
//!
//! The narrow interface the keystore core needs from a device driver or a
//! remote cosigner link:
//! - derive a public key and chain code at an absolute keypath
//! - display an address for user confirmation
//! - sign a batch of sighashes
//!
//! Transports own reconnects and retries. The core maps whatever they
//! report onto the keystore error taxonomy.

pub mod emulator;

use crate::keypath::AbsoluteKeypath;
use crate::keystore::CancellationToken;
use crate::types::ScriptType;

pub use emulator::*;

/// Raw failure reported by a transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("User rejected the request on the device")]
    Rejected,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Device refused the request: {0}")]
    Refused(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Public key material returned by a derivation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    /// 33-byte compressed SEC1 encoding
    pub public_key: Vec<u8>,
    pub chain_code: [u8; 32],
}

/// One sighash to be signed with the key at `keypath`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInput {
    pub keypath: AbsoluteKeypath,
    pub sighash: [u8; 32],
}

/// Batch signing request for all inputs a backend is responsible for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub transaction_id: String,
    pub coin_code: String,
    pub inputs: Vec<SignInput>,
}

/// Driver for a physical signing device
///
/// Calls may block indefinitely on user interaction.
pub trait DeviceTransport: Send + Sync {
    fn derive_key(&self, keypath: &AbsoluteKeypath) -> TransportResult<DerivedKey>;

    /// BIP32 fingerprint of the device's master key
    fn root_fingerprint(&self) -> TransportResult<[u8; 4]>;

    /// Whether the device has a screen or paired channel for confirmations
    fn has_display(&self) -> bool;

    fn display_address(
        &self,
        keypath: &AbsoluteKeypath,
        script_type: ScriptType,
        coin_code: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// 64-byte compact ECDSA signatures, one per input, in request order
    fn sign(&self, request: &SignRequest, cancel: &CancellationToken) -> TransportResult<Vec<[u8; 64]>>;
}

/// Link to a cosigner that signs out of band
pub trait CosignerChannel: Send + Sync {
    /// 64-byte compact ECDSA signatures, one per input, in request order
    fn request_signatures(
        &self,
        request: &SignRequest,
        cancel: &CancellationToken,
    ) -> TransportResult<Vec<[u8; 64]>>;
}
