//! Hardware-device backend
//!
//! Wraps a [`DeviceTransport`]. Keys never leave the device; the host only
//! sees public keys, chain codes and signatures. Devices with a screen
//! provide secure output.

use bitcoin::bip32::{ChainCode, ChildNumber, Fingerprint, Xpub};
use bitcoin::secp256k1::PublicKey;
use bitcoin::NetworkKind;
use std::sync::OnceLock;

use super::{
    expected_signing_keys, parse_signatures, CancellationToken, CosignerSlot, ExclusiveAccess,
    Keystore, KeystoreKind,
};
use crate::config::KeystoreSettings;
use crate::error::{KeystoreError, KeystoreResult};
use crate::identifier::{derive_identifier, Identifier};
use crate::keypath::AbsoluteKeypath;
use crate::transaction::ProposedTransaction;
use crate::transport::{DerivedKey, DeviceTransport};
use crate::types::{Coin, ScriptType, SigningMode};

pub struct HardwareKeystore<T: DeviceTransport> {
    transport: T,
    network: NetworkKind,
    mode: SigningMode,
    settings: KeystoreSettings,
    access: ExclusiveAccess,
    slot: CosignerSlot,
    identifier: OnceLock<Identifier>,
}

impl<T: DeviceTransport> HardwareKeystore<T> {
    pub fn new(transport: T, mode: SigningMode) -> Self {
        Self {
            transport,
            network: NetworkKind::Main,
            mode,
            settings: KeystoreSettings::default(),
            access: ExclusiveAccess::new(),
            slot: CosignerSlot::new(),
            identifier: OnceLock::new(),
        }
    }

    pub fn with_network(mut self, network: NetworkKind) -> Self {
        self.network = network;
        self
    }

    pub fn with_settings(mut self, settings: KeystoreSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn device_key(&self, path: &AbsoluteKeypath) -> KeystoreResult<PublicKey> {
        let derived = self.transport.derive_key(path)?;
        parse_device_key(&derived)
    }

    fn derive_xpub(&self, path: &AbsoluteKeypath) -> KeystoreResult<Xpub> {
        let derived = self.transport.derive_key(path)?;
        let public_key = parse_device_key(&derived)?;

        // BIP32 metadata: the parent fingerprint needs the parent's key
        let parent_fingerprint = match path.parent() {
            Some(parent) => fingerprint_of(self.network, self.device_key(&parent)?),
            None => Fingerprint::from(self.transport.root_fingerprint()?),
        };

        let depth = u8::try_from(path.depth()).map_err(|_| {
            KeystoreError::invalid_path(format!("Keypath {} is deeper than 255 levels", path))
        })?;

        Ok(Xpub {
            network: self.network,
            depth,
            parent_fingerprint,
            child_number: ChildNumber::from(path.last()),
            public_key,
            chain_code: ChainCode::from(derived.chain_code),
        })
    }
}

impl<T: DeviceTransport> Keystore for HardwareKeystore<T> {
    fn kind(&self) -> KeystoreKind {
        KeystoreKind::HardwareDevice
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
        crate::log_debug!("hardware", "Identifier derived", identifier = id);
        Ok(self.identifier.get_or_init(|| id).clone())
    }

    fn has_secure_output(&self) -> bool {
        self.transport.has_display()
    }

    fn output_address_with(
        &self,
        path: &AbsoluteKeypath,
        script_type: ScriptType,
        coin: &dyn Coin,
        cancel: &CancellationToken,
    ) -> KeystoreResult<()> {
        if !self.has_secure_output() {
            return Err(KeystoreError::unsupported("Device has no trusted display"));
        }
        coin.validate_keypath(path, script_type, &self.settings)?;

        let _guard = self.access.acquire(self.settings.busy_policy, "output_address")?;
        cancel.check()?;

        crate::log_debug!(
            "hardware",
            "Displaying address",
            keypath = path,
            script_type = script_type,
            coin = coin.code()
        );

        self.transport
            .display_address(path, script_type, coin.code(), cancel)
            .map_err(|e| {
                let err = KeystoreError::from(e);
                crate::log_warn!("hardware", "Address display failed", error = err);
                err
            })
    }

    fn extended_public_key(&self, path: &AbsoluteKeypath) -> KeystoreResult<Xpub> {
        let _guard = self.access.acquire(self.settings.busy_policy, "extended_public_key")?;
        crate::log_debug!("hardware", "Deriving xpub", keypath = path);
        self.derive_xpub(path)
    }

    fn sign_transaction_with(
        &self,
        tx: &mut ProposedTransaction,
        cancel: &CancellationToken,
    ) -> KeystoreResult<()> {
        let _guard = self.access.acquire(self.settings.busy_policy, "sign_transaction")?;
        cancel.check()?;

        let cosigner = self.slot.index();
        let keys = expected_signing_keys(tx, cosigner, |path| self.device_key(path))?;

        let request = tx.sign_request();
        let raw = self.transport.sign(&request, cancel).map_err(|e| {
            let err = KeystoreError::from(e);
            crate::log_warn!(
                "hardware",
                "Device signing failed",
                transaction_id = request.transaction_id,
                error = err
            );
            err
        })?;

        let signatures = parse_signatures(raw, &keys)?;
        cancel.check()?;
        tx.attach_signatures(cosigner, signatures)?;

        crate::log_debug!(
            "hardware",
            "Transaction signed",
            transaction_id = tx.id(),
            cosigner = cosigner
        );
        Ok(())
    }
}

fn parse_device_key(derived: &DerivedKey) -> KeystoreResult<PublicKey> {
    PublicKey::from_slice(&derived.public_key).map_err(|e| {
        KeystoreError::communication("Device returned a malformed public key")
            .with_details(e.to_string())
    })
}

fn fingerprint_of(network: NetworkKind, public_key: PublicKey) -> Fingerprint {
    // Only the key feeds the fingerprint; the other fields are placeholders
    Xpub {
        network,
        depth: 0,
        parent_fingerprint: Fingerprint::default(),
        child_number: ChildNumber::Normal { index: 0 },
        public_key,
        chain_code: ChainCode::from([0u8; 32]),
    }
    .fingerprint()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::transport::{EmulatedDevice, UserResponse};
    use crate::types::BitcoinCoin;

    const VECTOR2_SEED: &str = "fffcf9f6f3f0edeae7e4e1dedbd8d5d2cfccc9c6c3c0bdbab7b4b1aeaba8a5a29f9c999693908d8a8784817e7b7875726f6c696663605d5a5754514e4b484542";

    fn device_keystore(device: EmulatedDevice, mode: SigningMode) -> HardwareKeystore<EmulatedDevice> {
        HardwareKeystore::new(device, mode)
    }

    fn vector2_device() -> EmulatedDevice {
        EmulatedDevice::new(&hex::decode(VECTOR2_SEED).unwrap())
    }

    fn path(s: &str) -> AbsoluteKeypath {
        s.parse().unwrap()
    }

    #[test]
    fn test_xpub_matches_bip32_vector() {
        let ks = device_keystore(vector2_device(), SigningMode::SingleSig);
        let xpub = ks.extended_public_key(&path("m/84'/0'/0'/0/0")).unwrap();
        assert_eq!(
            xpub.to_string(),
            "xpub6GzdxUN9kG9JBLfiM8t7nYgFe2N4p2xd2fBYnE4povnHuu3NowyoZCYSBP4agz6UtRr1P2DtdzShGqftKAJHBLAuamT9D5u7T3cxYg5gSqt"
        );
    }

    #[test]
    fn test_identifier_matches_software_backend() {
        let ks = device_keystore(vector2_device(), SigningMode::Multisig);
        assert_eq!(
            ks.identifier().unwrap().as_str(),
            "5a1db954aa259e1080889ffe439e9ccfe0136874617e2d583c86628e3db933b6"
        );
        let before = ks.transport().interactions();
        ks.identifier().unwrap();
        assert_eq!(ks.transport().interactions(), before);
    }

    #[test]
    fn test_output_address_without_display_never_touches_device() {
        let ks = device_keystore(vector2_device().without_display(), SigningMode::SingleSig);
        assert!(!ks.has_secure_output());
        let err = ks
            .output_address(&path("m/84'/0'/0'/0/0"), ScriptType::P2wpkh, &BitcoinCoin::mainnet())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedOperation);
        assert_eq!(ks.transport().interactions(), 0);
    }

    #[test]
    fn test_output_address_invalid_path() {
        let ks = device_keystore(vector2_device(), SigningMode::SingleSig);
        let err = ks
            .output_address(&path("m/84'/1'/0'/0/0"), ScriptType::P2wpkh, &BitcoinCoin::mainnet())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPath);
        assert_eq!(ks.transport().interactions(), 0);
    }

    #[test]
    fn test_output_address_purpose_mismatch_never_prompts() {
        let ks = device_keystore(EmulatedDevice::new(&[7u8; 32]), SigningMode::SingleSig);
        let coin = BitcoinCoin::mainnet();
        for p in ["m/44'/0'/0'/0/0", "m/48'/0'/0'/0/0", "m/86'/0'/0'/0/0"] {
            let err = ks.output_address(&path(p), ScriptType::P2wpkh, &coin).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidPath, "{}", p);
        }
        assert_eq!(ks.transport().prompts(), 0);
        assert_eq!(ks.transport().interactions(), 0);
    }

    #[test]
    fn test_output_address_rejection_and_disconnect() {
        let device = vector2_device();
        device.script([UserResponse::Reject, UserResponse::Disconnect, UserResponse::Approve]);
        let ks = device_keystore(device, SigningMode::SingleSig);
        let coin = BitcoinCoin::mainnet();
        let p = path("m/84'/0'/0'/0/3");

        let rejected = ks.output_address(&p, ScriptType::P2wpkh, &coin).unwrap_err();
        assert_eq!(rejected.code, ErrorCode::UserRejected);
        assert!(!rejected.is_retryable());

        let dropped = ks.output_address(&p, ScriptType::P2wpkh, &coin).unwrap_err();
        assert_eq!(dropped.code, ErrorCode::Communication);
        assert!(dropped.is_retryable());

        assert!(ks.output_address(&p, ScriptType::P2wpkh, &coin).is_ok());
        assert_eq!(ks.transport().prompts(), 3);
    }
}
