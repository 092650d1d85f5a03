//! Remote cosigner backend
//!
//! A cosigner that holds its keys elsewhere and is only known here by its
//! account xpub (and optionally its identity-root xpub). Public keys below
//! the account are derived locally; signatures are requested over a
//! [`CosignerChannel`].

use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use std::sync::OnceLock;

use super::{
    expected_signing_keys, parse_signatures, CancellationToken, CosignerSlot, ExclusiveAccess,
    Keystore, KeystoreKind,
};
use crate::config::KeystoreSettings;
use crate::error::{KeystoreError, KeystoreResult};
use crate::identifier::Identifier;
use crate::keypath::AbsoluteKeypath;
use crate::transaction::ProposedTransaction;
use crate::transport::CosignerChannel;
use crate::types::{Coin, ScriptType, SigningMode};

pub struct RemoteKeystore<C: CosignerChannel> {
    channel: C,
    account_keypath: AbsoluteKeypath,
    account_xpub: Xpub,
    root_xpub: Option<Xpub>,
    mode: SigningMode,
    settings: KeystoreSettings,
    access: ExclusiveAccess,
    slot: CosignerSlot,
    identifier: OnceLock<Identifier>,
}

impl<C: CosignerChannel> RemoteKeystore<C> {
    pub fn new(
        channel: C,
        account_keypath: AbsoluteKeypath,
        account_xpub: Xpub,
        mode: SigningMode,
    ) -> KeystoreResult<Self> {
        if usize::from(account_xpub.depth) != account_keypath.depth() {
            return Err(KeystoreError::configuration(format!(
                "Account xpub has depth {}, keypath {} has depth {}",
                account_xpub.depth,
                account_keypath,
                account_keypath.depth()
            )));
        }

        Ok(Self {
            channel,
            account_keypath,
            account_xpub,
            root_xpub: None,
            mode,
            settings: KeystoreSettings::default(),
            access: ExclusiveAccess::new(),
            slot: CosignerSlot::new(),
            identifier: OnceLock::new(),
        })
    }

    /// Identity-root xpub (`m/44'` or `m/46'`), needed for `identifier()`
    pub fn with_identity_root(mut self, root_xpub: Xpub) -> KeystoreResult<Self> {
        let root = AbsoluteKeypath::identity_root(self.mode);
        if root_xpub.depth != 1 || root_xpub.child_number != ChildNumber::from(root.last()) {
            return Err(KeystoreError::configuration(format!(
                "Identity-root xpub must be the key at {} (got depth {}, child {})",
                root, root_xpub.depth, root_xpub.child_number
            )));
        }
        self.root_xpub = Some(root_xpub);
        Ok(self)
    }

    pub fn with_settings(mut self, settings: KeystoreSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn account_keypath(&self) -> &AbsoluteKeypath {
        &self.account_keypath
    }

    fn derive_xpub(&self, path: &AbsoluteKeypath) -> KeystoreResult<Xpub> {
        if *path == self.account_keypath {
            return Ok(self.account_xpub);
        }
        if *path == AbsoluteKeypath::identity_root(self.mode) {
            if let Some(root) = self.root_xpub {
                return Ok(root);
            }
        }

        let tail = path.strip_prefix(&self.account_keypath).ok_or_else(|| {
            KeystoreError::unsupported(format!(
                "Remote cosigner only exposes keys below {}",
                self.account_keypath
            ))
        })?;
        if tail.iter().any(|c| c.is_hardened()) {
            return Err(KeystoreError::unsupported(format!(
                "Hardened derivation at {} needs the cosigner's private key",
                path
            )));
        }

        let secp = Secp256k1::verification_only();
        let children: Vec<ChildNumber> = tail.iter().map(|c| ChildNumber::from(*c)).collect();
        Ok(self.account_xpub.derive_pub(&secp, &children)?)
    }

    fn derive_key(&self, path: &AbsoluteKeypath) -> KeystoreResult<PublicKey> {
        Ok(self.derive_xpub(path)?.public_key)
    }
}

impl<C: CosignerChannel> Keystore for RemoteKeystore<C> {
    fn kind(&self) -> KeystoreKind {
        KeystoreKind::RemoteSigner
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
        let root = self.root_xpub.as_ref().ok_or_else(|| {
            KeystoreError::unsupported("Remote cosigner did not share its identity-root xpub")
        })?;
        Ok(self
            .identifier
            .get_or_init(|| Identifier::from_xpub(root))
            .clone())
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
            "Remote cosigners cannot display addresses to this user",
        ))
    }

    fn extended_public_key(&self, path: &AbsoluteKeypath) -> KeystoreResult<Xpub> {
        let _guard = self.access.acquire(self.settings.busy_policy, "extended_public_key")?;
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
        let keys = expected_signing_keys(tx, cosigner, |path| self.derive_key(path))?;

        let request = tx.sign_request();
        crate::log_debug!(
            "remote",
            "Requesting cosigner signatures",
            transaction_id = request.transaction_id,
            cosigner = cosigner
        );
        let raw = self.channel.request_signatures(&request, cancel)?;

        let signatures = parse_signatures(raw, &keys)?;
        cancel.check()?;
        tx.attach_signatures(cosigner, signatures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::transport::{SignRequest, TransportResult};
    use bitcoin::bip32::Xpriv;
    use bitcoin::NetworkKind;

    struct SilentChannel;

    impl CosignerChannel for SilentChannel {
        fn request_signatures(
            &self,
            _request: &SignRequest,
            _cancel: &CancellationToken,
        ) -> TransportResult<Vec<[u8; 64]>> {
            Ok(Vec::new())
        }
    }

    fn xpub_at(seed: &[u8], path: &AbsoluteKeypath) -> Xpub {
        let secp = Secp256k1::new();
        let master = Xpriv::new_master(NetworkKind::Main, seed).unwrap();
        Xpub::from_priv(&secp, &master.derive_priv(&secp, &path.to_derivation_path()).unwrap())
    }

    fn remote(seed: &[u8]) -> RemoteKeystore<SilentChannel> {
        let account: AbsoluteKeypath = "m/48'/0'/0'/2'".parse().unwrap();
        let xpub = xpub_at(seed, &account);
        RemoteKeystore::new(SilentChannel, account, xpub, SigningMode::Multisig).unwrap()
    }

    #[test]
    fn test_account_xpub_fixture() {
        let ks = remote(&[1u8; 64]);
        let xpub = ks.extended_public_key(&"m/48'/0'/0'/2'".parse().unwrap()).unwrap();
        assert_eq!(
            xpub.to_string(),
            "xpub6ESghgmLD5FuqvXEbeiDS5WDT7nrbkcQHVGCcatqeMSqgeH7MjExsH6wnbgo5DU8bUUGGhQf9D8DwjHRBaGTq2VzbzHsQZMWPdcETmmbLAr"
        );
    }

    #[test]
    fn test_non_hardened_descendants_match_seed() {
        let ks = remote(&[1u8; 64]);
        let path: AbsoluteKeypath = "m/48'/0'/0'/2'/0/7".parse().unwrap();
        assert_eq!(ks.extended_public_key(&path).unwrap(), xpub_at(&[1u8; 64], &path));
    }

    #[test]
    fn test_hardened_and_foreign_paths_unsupported() {
        let ks = remote(&[1u8; 64]);
        let hardened = ks
            .extended_public_key(&"m/48'/0'/0'/2'/0'".parse().unwrap())
            .unwrap_err();
        assert_eq!(hardened.code, ErrorCode::UnsupportedOperation);
        let foreign = ks
            .extended_public_key(&"m/84'/0'/0'/0/0".parse().unwrap())
            .unwrap_err();
        assert_eq!(foreign.code, ErrorCode::UnsupportedOperation);
    }

    #[test]
    fn test_identifier_needs_identity_root() {
        let ks = remote(&[1u8; 64]);
        assert_eq!(ks.identifier().unwrap_err().code, ErrorCode::UnsupportedOperation);

        let root = xpub_at(&[1u8; 64], &"m/46'".parse().unwrap());
        let ks = remote(&[1u8; 64]).with_identity_root(root).unwrap();
        assert_eq!(
            ks.identifier().unwrap().as_str(),
            "e510197e7ea04292458865bfc0828dec35f6c049737198926e3ffffc7610d5bf"
        );
        assert!(!ks.has_secure_output());
    }

    #[test]
    fn test_identity_root_must_match_mode() {
        let account = xpub_at(&[1u8; 64], &"m/48'/0'/0'/2'".parse().unwrap());
        let single_root = xpub_at(&[1u8; 64], &"m/44'".parse().unwrap());
        for wrong in [account, single_root] {
            let err = match remote(&[1u8; 64]).with_identity_root(wrong) {
                Ok(_) => panic!("identity root accepted a key from the wrong path"),
                Err(err) => err,
            };
            assert_eq!(err.code, ErrorCode::Configuration);
        }
    }

    #[test]
    fn test_depth_mismatch_rejected() {
        let root = xpub_at(&[1u8; 64], &"m/46'".parse().unwrap());
        let result = RemoteKeystore::new(
            SilentChannel,
            "m/48'/0'/0'/2'".parse().unwrap(),
            root,
            SigningMode::Multisig,
        );
        assert!(result.is_err());
    }
}
