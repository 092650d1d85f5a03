//! HD Keystore Core
//!
//! Backend-agnostic access to hierarchical-deterministic signing keys.
//!
//! # Architecture
//!
//! This crate provides:
//! - **keypath**: BIP32 absolute derivation paths and templates
//! - **identifier**: stable keystore identity from the identity-root xpub
//! - **keystore**: the capability contract and its software, hardware and
//!   remote-cosigner backends
//! - **cosigner**: multisig registry, index ordering and signing configuration
//! - **transaction**: proposed transactions with per-cosigner signature slots
//! - **coordinator**: fail-fast signing rounds across keystores
//! - **transport**: the device/cosigner boundary plus a seed-backed emulator
//!
//! # Security
//!
//! Seeds are held in `zeroize` wrappers and are cleared when dropped. Log
//! output redacts seeds and shortens identifiers and xpubs.
//!
//! # Example
//!
//! ```rust,ignore
//! use hd_keystore::{Keystore, SigningMode, SoftwareKeystore};
//!
//! let keystore = SoftwareKeystore::from_seed(&seed, SigningMode::SingleSig)?;
//! let xpub = keystore.extended_public_key(&"m/84'/0'/0'".parse()?)?;
//! println!("{} {}", keystore.identifier()?, xpub);
//! ```

pub mod config;
pub mod coordinator;
pub mod cosigner;
pub mod error;
pub mod identifier;
pub mod keypath;
pub mod keystore;
pub mod serde_bytes;
pub mod transaction;
pub mod transport;
pub mod types;
pub mod utils;

pub use config::{BusyPolicy, KeystoreConfig, KeystoreSettings, StrictnessLevel};
pub use coordinator::{CosignerOutcome, RoundReport, RoundState, SigningCoordinator};
pub use cosigner::{
    CosignerEntry, CosignerOrdering, CosignerRegistry, MultisigConfiguration, SigningConfiguration,
};
pub use error::{ErrorCode, KeystoreError, KeystoreResult};
pub use identifier::{derive_identifier, Identifier};
pub use keypath::{AbsoluteKeypath, KeypathComponent, KeypathTemplate};
pub use keystore::{
    CancellationToken, HardwareKeystore, Keystore, KeystoreKind, RemoteKeystore, SoftwareKeystore,
};
pub use transaction::{PartialSignature, ProposedTransaction, SignedProposal, TxInput};
pub use transport::{
    CosignerChannel, DerivedKey, DeviceTransport, EmulatedDevice, SignInput, SignRequest,
    TransportError, UserResponse,
};
pub use types::{BitcoinCoin, Coin, ScriptType, SigningMode};
