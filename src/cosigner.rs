//! Cosigner Registry and Signing Configuration
//!
//! Multisig script construction is order-sensitive, so every participant
//! must compute the same cosigner indices independently. The ordering rule
//! travels inside the serialized configuration; nothing is agreed out of
//! band.
//!
//! Validation happens when a configuration is built or loaded. A rejected
//! configuration is never partially applied.

use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{KeystoreError, KeystoreResult};
use crate::identifier::Identifier;
use crate::keypath::AbsoluteKeypath;
use crate::keystore::Keystore;
use crate::transaction::TxInput;
use crate::types::{ScriptType, SigningMode};

/// Rule assigning cosigner indices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CosignerOrdering {
    /// Index follows the lexicographic order of identifiers
    #[default]
    AscendingIdentifier,
    /// Index follows the order cosigners were registered in
    RegistrationOrder,
}

/// One member of a multisig group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosignerEntry {
    pub index: usize,
    pub identifier: Identifier,
    /// Account-level xpub
    pub xpub: Xpub,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MultisigConfigurationData")]
pub struct MultisigConfiguration {
    script_type: ScriptType,
    account_keypath: AbsoluteKeypath,
    threshold: usize,
    ordering: CosignerOrdering,
    cosigners: Vec<CosignerEntry>,
}

/// Unvalidated wire form
#[derive(Deserialize)]
struct MultisigConfigurationData {
    script_type: ScriptType,
    account_keypath: AbsoluteKeypath,
    threshold: usize,
    #[serde(default)]
    ordering: CosignerOrdering,
    cosigners: Vec<CosignerEntry>,
}

impl TryFrom<MultisigConfigurationData> for MultisigConfiguration {
    type Error = KeystoreError;

    fn try_from(data: MultisigConfigurationData) -> KeystoreResult<Self> {
        let mut cosigners = data.cosigners;
        cosigners.sort_by_key(|c| c.index);
        let config = MultisigConfiguration {
            script_type: data.script_type,
            account_keypath: data.account_keypath,
            threshold: data.threshold,
            ordering: data.ordering,
            cosigners,
        };
        config.validate()?;
        Ok(config)
    }
}

impl MultisigConfiguration {
    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    pub fn account_keypath(&self) -> &AbsoluteKeypath {
        &self.account_keypath
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn ordering(&self) -> CosignerOrdering {
        self.ordering
    }

    pub fn cosigners(&self) -> &[CosignerEntry] {
        &self.cosigners
    }

    pub fn cosigner_count(&self) -> usize {
        self.cosigners.len()
    }

    pub fn cosigner(&self, index: usize) -> Option<&CosignerEntry> {
        self.cosigners.get(index)
    }

    pub fn index_of(&self, identifier: &Identifier) -> Option<usize> {
        self.cosigners
            .iter()
            .find(|c| &c.identifier == identifier)
            .map(|c| c.index)
    }

    /// Check every structural rule. Cosigners must already be sorted by index.
    pub fn validate(&self) -> KeystoreResult<()> {
        if !self.script_type.is_multisig() {
            return Err(KeystoreError::configuration(format!(
                "Script type {} is not a multisig script",
                self.script_type
            )));
        }

        if self.account_keypath.depth() != 4 {
            return Err(KeystoreError::configuration(format!(
                "Multisig account keypath {} must have four segments",
                self.account_keypath
            )));
        }

        let n = self.cosigners.len();
        if n == 0 {
            return Err(KeystoreError::configuration("Multisig configuration has no cosigners"));
        }
        if self.threshold == 0 || self.threshold > n {
            return Err(KeystoreError::configuration(format!(
                "Threshold {} is invalid for {} cosigners",
                self.threshold, n
            )));
        }

        for (position, cosigner) in self.cosigners.iter().enumerate() {
            if cosigner.index != position {
                return Err(KeystoreError::configuration(format!(
                    "Cosigner indices must be exactly 0..{}; found {} at position {}",
                    n, cosigner.index, position
                )));
            }
        }

        check_distinct(self.cosigners.iter().map(|c| (&c.identifier, &c.xpub)))?;

        if self.ordering == CosignerOrdering::AscendingIdentifier
            && self
                .cosigners
                .windows(2)
                .any(|pair| pair[0].identifier >= pair[1].identifier)
        {
            return Err(KeystoreError::configuration(
                "Cosigner indices do not follow ascending identifier order",
            ));
        }

        Ok(())
    }

    /// Signing key of every cosigner for an address keypath below the account
    pub fn cosigner_pubkeys(&self, keypath: &AbsoluteKeypath) -> KeystoreResult<Vec<PublicKey>> {
        self.cosigners
            .iter()
            .map(|c| derive_below_account(&c.xpub, &self.account_keypath, keypath))
            .collect()
    }
}

/// Reject duplicate identifiers and duplicate xpubs.
///
/// An identifier seen with two different xpubs means two backends share a
/// seed but disagree on derivation; that is reported separately.
fn check_distinct<'a>(
    entries: impl Iterator<Item = (&'a Identifier, &'a Xpub)>,
) -> KeystoreResult<()> {
    let mut by_identifier: HashMap<&Identifier, &Xpub> = HashMap::new();
    let mut xpubs: HashSet<&Xpub> = HashSet::new();

    for (identifier, xpub) in entries {
        if let Some(existing) = by_identifier.insert(identifier, xpub) {
            if existing != xpub {
                return Err(KeystoreError::configuration(format!(
                    "Cosigner {} reported two different account xpubs",
                    identifier.short()
                ))
                .with_details("seed or derivation mismatch between backends"));
            }
            return Err(KeystoreError::configuration(format!(
                "Cosigner {} registered more than once",
                identifier.short()
            )));
        }
        if !xpubs.insert(xpub) {
            return Err(KeystoreError::configuration(format!(
                "Account xpub of cosigner {} is already used by another cosigner",
                identifier.short()
            )));
        }
    }
    Ok(())
}

fn derive_below_account(
    account_xpub: &Xpub,
    account_keypath: &AbsoluteKeypath,
    keypath: &AbsoluteKeypath,
) -> KeystoreResult<PublicKey> {
    let tail = keypath.strip_prefix(account_keypath).ok_or_else(|| {
        KeystoreError::invalid_path(format!(
            "Keypath {} is not below account {}",
            keypath, account_keypath
        ))
    })?;
    if tail.iter().any(|c| c.is_hardened()) {
        return Err(KeystoreError::invalid_path(format!(
            "Keypath {} is hardened below the account",
            keypath
        )));
    }
    let secp = Secp256k1::verification_only();
    let children: Vec<ChildNumber> = tail.iter().map(|c| ChildNumber::from(*c)).collect();
    Ok(account_xpub.derive_pub(&secp, &children)?.public_key)
}

// =============================================================================
// Registry
// =============================================================================

/// Collects cosigners and assigns their indices
#[derive(Debug, Clone)]
pub struct CosignerRegistry {
    script_type: ScriptType,
    account_keypath: AbsoluteKeypath,
    threshold: usize,
    ordering: CosignerOrdering,
    registered: Vec<(Identifier, Xpub)>,
}

impl CosignerRegistry {
    pub fn new(
        script_type: ScriptType,
        account_keypath: AbsoluteKeypath,
        threshold: usize,
        ordering: CosignerOrdering,
    ) -> Self {
        Self {
            script_type,
            account_keypath,
            threshold,
            ordering,
            registered: Vec::new(),
        }
    }

    pub fn account_keypath(&self) -> &AbsoluteKeypath {
        &self.account_keypath
    }

    /// Record a cosigner. Duplicates are reported by [`CosignerRegistry::build`].
    pub fn register(&mut self, identifier: Identifier, xpub: Xpub) -> &mut Self {
        self.registered.push((identifier, xpub));
        self
    }

    /// Record a keystore by asking it for its identifier and account xpub
    pub fn register_keystore(&mut self, keystore: &dyn Keystore) -> KeystoreResult<&mut Self> {
        if keystore.signing_mode() != SigningMode::Multisig {
            return Err(KeystoreError::configuration(format!(
                "A {} keystore in single-sig mode cannot join a multisig group",
                keystore.kind()
            )));
        }
        let identifier = keystore.identifier()?;
        let xpub = keystore.extended_public_key(&self.account_keypath)?;
        Ok(self.register(identifier, xpub))
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Validate and assign indices
    pub fn build(&self) -> KeystoreResult<MultisigConfiguration> {
        check_distinct(self.registered.iter().map(|(id, xpub)| (id, xpub)))?;

        let mut ordered = self.registered.clone();
        if self.ordering == CosignerOrdering::AscendingIdentifier {
            ordered.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let config = MultisigConfiguration {
            script_type: self.script_type,
            account_keypath: self.account_keypath.clone(),
            threshold: self.threshold,
            ordering: self.ordering,
            cosigners: ordered
                .into_iter()
                .enumerate()
                .map(|(index, (identifier, xpub))| CosignerEntry { index, identifier, xpub })
                .collect(),
        };
        config.validate()?;

        crate::log_info!(
            "cosigner",
            "Multisig configuration built",
            threshold = config.threshold,
            cosigners = config.cosigner_count(),
            ordering = format!("{:?}", config.ordering)
        );
        Ok(config)
    }

    /// Fix each keystore's cosigner index from `config`.
    ///
    /// Every keystore is checked first (membership, xpub, bindability); no
    /// index is bound unless all of them pass.
    pub fn bind(config: &MultisigConfiguration, keystores: &[&dyn Keystore]) -> KeystoreResult<()> {
        let mut plan = Vec::with_capacity(keystores.len());
        let mut seen = HashSet::new();

        for keystore in keystores {
            if keystore.signing_mode() != SigningMode::Multisig {
                return Err(KeystoreError::configuration(
                    "Single-sig keystores cannot be bound to a multisig configuration",
                ));
            }
            let identifier = keystore.identifier()?;
            let index = config.index_of(&identifier).ok_or_else(|| {
                KeystoreError::configuration(format!(
                    "Keystore {} is not part of this configuration",
                    identifier.short()
                ))
            })?;
            if !seen.insert(index) {
                return Err(KeystoreError::configuration(format!(
                    "Keystore {} passed more than once",
                    identifier.short()
                )));
            }

            let xpub = keystore.extended_public_key(&config.account_keypath)?;
            if xpub != config.cosigners[index].xpub {
                return Err(KeystoreError::configuration(format!(
                    "Keystore {} derives a different account xpub than configured",
                    identifier.short()
                ))
                .with_details("seed or derivation mismatch between backends"));
            }

            if !keystore.can_bind_cosigner_index(index) {
                return Err(KeystoreError::configuration(format!(
                    "Keystore {} is already bound to index {:?}",
                    identifier.short(),
                    keystore.bound_cosigner_index()
                )));
            }
            plan.push((*keystore, index));
        }

        for (keystore, index) in plan {
            keystore.bind_cosigner_index(index)?;
        }
        Ok(())
    }
}

// =============================================================================
// Signing Configuration
// =============================================================================

/// What a transaction is signed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SigningConfiguration {
    SingleSig {
        script_type: ScriptType,
        account_keypath: AbsoluteKeypath,
        xpub: Xpub,
    },
    Multisig(MultisigConfiguration),
}

impl SigningConfiguration {
    pub fn single_sig(
        script_type: ScriptType,
        account_keypath: AbsoluteKeypath,
        xpub: Xpub,
    ) -> KeystoreResult<Self> {
        if script_type.is_multisig() {
            return Err(KeystoreError::configuration(format!(
                "Script type {} needs a multisig configuration",
                script_type
            )));
        }
        Ok(SigningConfiguration::SingleSig {
            script_type,
            account_keypath,
            xpub,
        })
    }

    /// Single-sig configuration for the account of `keystore`
    pub fn single_sig_from_keystore(
        keystore: &dyn Keystore,
        script_type: ScriptType,
        account_keypath: AbsoluteKeypath,
    ) -> KeystoreResult<Self> {
        if keystore.signing_mode() != SigningMode::SingleSig {
            return Err(KeystoreError::configuration(
                "Multisig keystores need a multisig configuration",
            ));
        }
        let xpub = keystore.extended_public_key(&account_keypath)?;
        Self::single_sig(script_type, account_keypath, xpub)
    }

    pub fn signing_mode(&self) -> SigningMode {
        match self {
            SigningConfiguration::SingleSig { .. } => SigningMode::SingleSig,
            SigningConfiguration::Multisig(_) => SigningMode::Multisig,
        }
    }

    pub fn script_type(&self) -> ScriptType {
        match self {
            SigningConfiguration::SingleSig { script_type, .. } => *script_type,
            SigningConfiguration::Multisig(config) => config.script_type(),
        }
    }

    pub fn account_keypath(&self) -> &AbsoluteKeypath {
        match self {
            SigningConfiguration::SingleSig { account_keypath, .. } => account_keypath,
            SigningConfiguration::Multisig(config) => config.account_keypath(),
        }
    }

    /// Canonical identity root for this configuration's signing mode
    pub fn identity_root(&self) -> AbsoluteKeypath {
        AbsoluteKeypath::identity_root(self.signing_mode())
    }

    pub fn cosigner_count(&self) -> usize {
        match self {
            SigningConfiguration::SingleSig { .. } => 1,
            SigningConfiguration::Multisig(config) => config.cosigner_count(),
        }
    }

    pub fn threshold(&self) -> usize {
        match self {
            SigningConfiguration::SingleSig { .. } => 1,
            SigningConfiguration::Multisig(config) => config.threshold(),
        }
    }

    pub fn cosigner_pubkeys(&self, keypath: &AbsoluteKeypath) -> KeystoreResult<Vec<PublicKey>> {
        match self {
            SigningConfiguration::SingleSig {
                account_keypath,
                xpub,
                ..
            } => Ok(vec![derive_below_account(xpub, account_keypath, keypath)?]),
            SigningConfiguration::Multisig(config) => config.cosigner_pubkeys(keypath),
        }
    }

    /// Build a transaction input whose signing keys come from this configuration
    pub fn input(&self, keypath: AbsoluteKeypath, sighash: [u8; 32]) -> KeystoreResult<TxInput> {
        let cosigner_pubkeys = self.cosigner_pubkeys(&keypath)?;
        Ok(TxInput {
            sighash,
            keypath,
            cosigner_pubkeys,
        })
    }
}

impl From<MultisigConfiguration> for SigningConfiguration {
    fn from(config: MultisigConfiguration) -> Self {
        SigningConfiguration::Multisig(config)
    }
}
