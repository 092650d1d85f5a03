//! Software-seed backend
//!
//! Holds a BIP32 seed in memory and derives/signs locally. There is no
//! trusted display, so address verification is not available.

use bip39::Mnemonic;
use bitcoin::bip32::{Xpriv, Xpub};
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::NetworkKind;
use std::sync::OnceLock;
use zeroize::Zeroizing;

use super::{
    expected_signing_keys, CancellationToken, CosignerSlot, ExclusiveAccess, Keystore,
    KeystoreKind,
};
use crate::config::KeystoreSettings;
use crate::error::{KeystoreError, KeystoreResult};
use crate::identifier::{derive_identifier, Identifier};
use crate::keypath::AbsoluteKeypath;
use crate::transaction::{PartialSignature, ProposedTransaction};
use crate::types::{Coin, ScriptType, SigningMode};

const MIN_SEED_LEN: usize = 16;
const MAX_SEED_LEN: usize = 64;

pub struct SoftwareKeystore {
    seed: Zeroizing<Vec<u8>>,
    network: NetworkKind,
    mode: SigningMode,
    settings: KeystoreSettings,
    access: ExclusiveAccess,
    slot: CosignerSlot,
    identifier: OnceLock<Identifier>,
}

impl SoftwareKeystore {
    pub fn from_seed(seed: &[u8], mode: SigningMode) -> KeystoreResult<Self> {
        if !(MIN_SEED_LEN..=MAX_SEED_LEN).contains(&seed.len()) {
            return Err(KeystoreError::invalid_input(format!(
                "Seed must be {}-{} bytes, got {}",
                MIN_SEED_LEN,
                MAX_SEED_LEN,
                seed.len()
            )));
        }

        Ok(Self {
            seed: Zeroizing::new(seed.to_vec()),
            network: NetworkKind::Main,
            mode,
            settings: KeystoreSettings::default(),
            access: ExclusiveAccess::new(),
            slot: CosignerSlot::new(),
            identifier: OnceLock::new(),
        })
    }

    pub fn from_mnemonic(phrase: &str, passphrase: &str, mode: SigningMode) -> KeystoreResult<Self> {
        let mnemonic = Mnemonic::parse(phrase)?;
        let seed = Zeroizing::new(mnemonic.to_seed(passphrase));
        Self::from_seed(&seed[..], mode)
    }

    pub fn with_network(mut self, network: NetworkKind) -> Self {
        self.network = network;
        self
    }

    pub fn with_settings(mut self, settings: KeystoreSettings) -> Self {
        self.settings = settings;
        self
    }

    fn derive_priv(&self, path: &AbsoluteKeypath) -> KeystoreResult<Xpriv> {
        let secp = Secp256k1::signing_only();
        let master = Xpriv::new_master(self.network, &self.seed)?;
        Ok(master.derive_priv(&secp, &path.to_derivation_path())?)
    }

    fn derive_pub(&self, path: &AbsoluteKeypath) -> KeystoreResult<Xpub> {
        let secp = Secp256k1::new();
        Ok(Xpub::from_priv(&secp, &self.derive_priv(path)?))
    }
}

impl Keystore for SoftwareKeystore {
    fn kind(&self) -> KeystoreKind {
        KeystoreKind::SoftwareSeed
    }

    fn signing_mode(&self) -> SigningMode {
        self.mode
    }

    fn cosigner_index(&self) -> usize {
        self.slot.index()
    }

    fn bound_cosigner_index(&self) -> Option<usize> {
        self.slot.bound()
    }

    fn bind_cosigner_index(&self, index: usize) -> KeystoreResult<()> {
        self.slot.bind(self.mode, index)
    }

    fn can_bind_cosigner_index(&self, index: usize) -> bool {
        self.slot.can_bind(self.mode, index)
    }

    fn identifier(&self) -> KeystoreResult<Identifier> {
        if let Some(id) = self.identifier.get() {
            return Ok(id.clone());
        }
        let id = derive_identifier(self)?;
        crate::log_debug!("software", "Identifier derived", identifier = id);
        Ok(self.identifier.get_or_init(|| id).clone())
    }

    fn has_secure_output(&self) -> bool {
        false
    }

    fn output_address_with(
        &self,
        _path: &AbsoluteKeypath,
        _script_type: ScriptType,
        _coin: &dyn Coin,
        _cancel: &CancellationToken,
    ) -> KeystoreResult<()> {
        Err(KeystoreError::unsupported(
            "Software keystores have no trusted display",
        ))
    }

    fn extended_public_key(&self, path: &AbsoluteKeypath) -> KeystoreResult<Xpub> {
        let _guard = self.access.acquire(self.settings.busy_policy, "extended_public_key")?;
        crate::log_debug!("software", "Deriving xpub", keypath = path);
        self.derive_pub(path)
    }

    fn sign_transaction_with(
        &self,
        tx: &mut ProposedTransaction,
        cancel: &CancellationToken,
    ) -> KeystoreResult<()> {
        let _guard = self.access.acquire(self.settings.busy_policy, "sign_transaction")?;
        cancel.check()?;

        let cosigner = self.slot.index();
        let secp = Secp256k1::new();

        let mut keys = Vec::with_capacity(tx.inputs().len());
        expected_signing_keys(tx, cosigner, |path| {
            let xprv = self.derive_priv(path)?;
            keys.push(xprv.private_key);
            Ok(xprv.private_key.public_key(&secp))
        })?;

        let signatures: Vec<PartialSignature> = tx
            .inputs()
            .iter()
            .zip(&keys)
            .enumerate()
            .map(|(input_index, (input, key))| PartialSignature {
                input_index,
                public_key: key.public_key(&secp),
                signature: secp.sign_ecdsa(&Message::from_digest(input.sighash), key),
            })
            .collect();

        cancel.check()?;
        tx.attach_signatures(cosigner, signatures)?;

        crate::log_debug!(
            "software",
            "Transaction signed",
            transaction_id = tx.id(),
            cosigner = cosigner
        );
        Ok(())
    }
}
