//! Keystore Capability Contract
//!
//! Every signing backend (software seed, hardware device, remote cosigner)
//! implements [`Keystore`]. The rest of the crate only talks to this trait,
//! so backends can be mixed freely inside one multisig setup.
//!
//! Rules shared by all backends:
//! - paths are always absolute
//! - at most one call is in flight per handle ([`ExclusiveAccess`])
//! - `sign_transaction` attaches all of its signatures or none

pub mod access;
pub mod cancel;
pub mod hardware;
pub mod remote;
pub mod software;

use bitcoin::bip32::Xpub;
use bitcoin::secp256k1::{ecdsa, PublicKey};
use serde::{Deserialize, Serialize};

use crate::error::{KeystoreError, KeystoreResult};
use crate::identifier::Identifier;
use crate::keypath::AbsoluteKeypath;
use crate::transaction::{PartialSignature, ProposedTransaction};
use crate::types::{Coin, ScriptType, SigningMode};

pub use access::{AccessGuard, CosignerSlot, ExclusiveAccess};
pub use cancel::CancellationToken;
pub use hardware::HardwareKeystore;
pub use remote::RemoteKeystore;
pub use software::SoftwareKeystore;

/// Backend variant behind a keystore handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeystoreKind {
    HardwareDevice,
    SoftwareSeed,
    RemoteSigner,
}

impl std::fmt::Display for KeystoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KeystoreKind::HardwareDevice => "hardware-device",
            KeystoreKind::SoftwareSeed => "software-seed",
            KeystoreKind::RemoteSigner => "remote-signer",
        };
        f.write_str(name)
    }
}

/// Uniform operation set of a signing backend
///
/// Any call may block on user interaction. Callers should keep them off
/// latency-sensitive threads.
pub trait Keystore: Send + Sync {
    fn kind(&self) -> KeystoreKind;

    fn signing_mode(&self) -> SigningMode;

    /// Index within the multisig group, 0 for single-sig. Never fails.
    fn cosigner_index(&self) -> usize;

    /// Index fixed by a multisig configuration, if one has been bound
    fn bound_cosigner_index(&self) -> Option<usize>;

    /// Fix the cosigner index. Only the index already bound may be bound again.
    fn bind_cosigner_index(&self, index: usize) -> KeystoreResult<()>;

    /// Whether `bind_cosigner_index(index)` would succeed
    fn can_bind_cosigner_index(&self, index: usize) -> bool;

    /// Stable identity hash, computed once per session
    fn identifier(&self) -> KeystoreResult<Identifier>;

    /// Does the backend have a confirmation channel independent of the host
    fn has_secure_output(&self) -> bool;

    /// Display the address at `path` on the trusted channel
    fn output_address_with(
        &self,
        path: &AbsoluteKeypath,
        script_type: ScriptType,
        coin: &dyn Coin,
        cancel: &CancellationToken,
    ) -> KeystoreResult<()>;

    fn output_address(
        &self,
        path: &AbsoluteKeypath,
        script_type: ScriptType,
        coin: &dyn Coin,
    ) -> KeystoreResult<()> {
        self.output_address_with(path, script_type, coin, &CancellationToken::new())
    }

    fn extended_public_key(&self, path: &AbsoluteKeypath) -> KeystoreResult<Xpub>;

    /// Sign every input this backend is responsible for
    fn sign_transaction_with(
        &self,
        tx: &mut ProposedTransaction,
        cancel: &CancellationToken,
    ) -> KeystoreResult<()>;

    fn sign_transaction(&self, tx: &mut ProposedTransaction) -> KeystoreResult<()> {
        self.sign_transaction_with(tx, &CancellationToken::new())
    }
}

/// Look up the key each input expects from `cosigner` and check that the
/// backend derives the same one. Runs before any signing prompt.
pub(crate) fn expected_signing_keys<F>(
    tx: &ProposedTransaction,
    cosigner: usize,
    mut derive: F,
) -> KeystoreResult<Vec<PublicKey>>
where
    F: FnMut(&AbsoluteKeypath) -> KeystoreResult<PublicKey>,
{
    let mut keys = Vec::with_capacity(tx.inputs().len());
    for (i, input) in tx.inputs().iter().enumerate() {
        let expected = tx.expected_pubkey(i, cosigner)?;
        let derived = derive(&input.keypath)?;
        if derived != expected {
            return Err(KeystoreError::invalid_transaction(format!(
                "Input {} at {} is not signable by this keystore",
                i, input.keypath
            )));
        }
        keys.push(expected);
    }
    Ok(keys)
}

/// Parse the compact signatures a backend returned, one per input
pub(crate) fn parse_signatures(
    raw: Vec<[u8; 64]>,
    keys: &[PublicKey],
) -> KeystoreResult<Vec<PartialSignature>> {
    if raw.len() != keys.len() {
        return Err(KeystoreError::communication(format!(
            "Backend returned {} signatures for {} inputs",
            raw.len(),
            keys.len()
        )));
    }

    raw.iter()
        .zip(keys)
        .enumerate()
        .map(|(input_index, (bytes, key))| {
            let signature = ecdsa::Signature::from_compact(bytes).map_err(|e| {
                KeystoreError::communication("Backend returned a malformed signature")
                    .with_details(e.to_string())
            })?;
            Ok(PartialSignature {
                input_index,
                public_key: *key,
                signature,
            })
        })
        .collect()
}
