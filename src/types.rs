//! Shared types for the keystore core
//!
//! Script types, signing modes and the coin parameter provider boundary.

use bitcoin::{Network, NetworkKind};
use serde::{Deserialize, Serialize};

use crate::config::KeystoreSettings;
use crate::error::{KeystoreError, KeystoreResult};
use crate::keypath::{bip_purposes, coin_types, AbsoluteKeypath};

// =============================================================================
// Script Types
// =============================================================================

/// Output script variant a derived key is used in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptType {
    P2pkh,
    P2wpkhP2sh,
    P2wpkh,
    P2tr,
    /// Native segwit multisig
    P2wsh,
    /// Nested segwit multisig
    P2wshP2sh,
}

impl ScriptType {
    pub fn is_multisig(&self) -> bool {
        matches!(self, ScriptType::P2wsh | ScriptType::P2wshP2sh)
    }

    /// BIP purpose expected at the first keypath segment
    pub fn purpose(&self) -> u32 {
        match self {
            ScriptType::P2pkh => bip_purposes::BIP44,
            ScriptType::P2wpkhP2sh => bip_purposes::BIP49,
            ScriptType::P2wpkh => bip_purposes::BIP84,
            ScriptType::P2tr => bip_purposes::BIP86,
            ScriptType::P2wsh | ScriptType::P2wshP2sh => bip_purposes::BIP48,
        }
    }

    /// BIP-48 script index (fourth account segment) for multisig scripts
    pub fn bip48_script_index(&self) -> Option<u32> {
        match self {
            ScriptType::P2wshP2sh => Some(1),
            ScriptType::P2wsh => Some(2),
            _ => None,
        }
    }

    pub fn signing_mode(&self) -> SigningMode {
        if self.is_multisig() {
            SigningMode::Multisig
        } else {
            SigningMode::SingleSig
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScriptType::P2pkh => "p2pkh",
            ScriptType::P2wpkhP2sh => "p2wpkh-p2sh",
            ScriptType::P2wpkh => "p2wpkh",
            ScriptType::P2tr => "p2tr",
            ScriptType::P2wsh => "p2wsh",
            ScriptType::P2wshP2sh => "p2wsh-p2sh",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ScriptType {
    type Err = KeystoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "p2pkh" => Ok(ScriptType::P2pkh),
            "p2wpkh-p2sh" => Ok(ScriptType::P2wpkhP2sh),
            "p2wpkh" => Ok(ScriptType::P2wpkh),
            "p2tr" => Ok(ScriptType::P2tr),
            "p2wsh" => Ok(ScriptType::P2wsh),
            "p2wsh-p2sh" => Ok(ScriptType::P2wshP2sh),
            other => Err(KeystoreError::invalid_input(format!(
                "Unknown script type: {}",
                other
            ))),
        }
    }
}

/// Whether a keystore session signs alone or as one cosigner of many
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMode {
    SingleSig,
    Multisig,
}

// =============================================================================
// Coin Parameters
// =============================================================================

/// Network parameter provider, consumed read-only
pub trait Coin: Send + Sync {
    /// Short code such as `btc`
    fn code(&self) -> &str;

    fn network(&self) -> Network;

    /// SLIP-0044 coin type expected at the second keypath segment
    fn coin_type(&self) -> u32;

    fn network_kind(&self) -> NetworkKind {
        NetworkKind::from(self.network())
    }

    /// Check that `path` is well-formed for `script_type` on this coin
    fn validate_keypath(
        &self,
        path: &AbsoluteKeypath,
        script_type: ScriptType,
        settings: &KeystoreSettings,
    ) -> KeystoreResult<()>;
}

/// Bitcoin mainnet/testnet parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitcoinCoin {
    code: &'static str,
    network: Network,
}

impl BitcoinCoin {
    pub fn mainnet() -> Self {
        Self { code: "btc", network: Network::Bitcoin }
    }

    pub fn testnet() -> Self {
        Self { code: "tbtc", network: Network::Testnet }
    }
}

impl Coin for BitcoinCoin {
    fn code(&self) -> &str {
        self.code
    }

    fn network(&self) -> Network {
        self.network
    }

    fn coin_type(&self) -> u32 {
        match self.network {
            Network::Bitcoin => coin_types::BITCOIN,
            _ => coin_types::BITCOIN_TESTNET,
        }
    }

    fn validate_keypath(
        &self,
        path: &AbsoluteKeypath,
        script_type: ScriptType,
        settings: &KeystoreSettings,
    ) -> KeystoreResult<()> {
        // purpose'/coin'/account'[/script']/change/index
        let account_depth = 3 + usize::from(script_type.is_multisig());
        let expected_depth = account_depth + 2;
        if path.depth() != expected_depth {
            return Err(KeystoreError::invalid_path(format!(
                "Keypath {} has depth {}, expected {} for {}",
                path,
                path.depth(),
                expected_depth,
                script_type
            )));
        }

        if settings.enforce_script_purpose && path.purpose() != script_type.purpose() {
            return Err(KeystoreError::invalid_path(format!(
                "Purpose {} does not match script type {} (expected {})",
                path.purpose(),
                script_type,
                script_type.purpose()
            )));
        }

        if path.coin_type() != Some(self.coin_type()) {
            return Err(KeystoreError::invalid_path(format!(
                "Coin type {:?} is not valid for {} (expected {})",
                path.coin_type(),
                self.code,
                self.coin_type()
            )));
        }

        if let Some(expected) = script_type.bip48_script_index() {
            let actual = path.components()[3].index();
            if actual != expected {
                return Err(KeystoreError::invalid_path(format!(
                    "Script index {} does not match {} (expected {})",
                    actual, script_type, expected
                )));
            }
        }

        let components = path.components();
        if settings.require_hardened_account
            && components[..account_depth].iter().any(|c| !c.is_hardened())
        {
            return Err(KeystoreError::invalid_path(
                "Purpose, coin type and account should be hardened (')",
            ));
        }

        if path.has_hardened_after(account_depth) {
            return Err(KeystoreError::invalid_path(
                "Change and address index must not be hardened",
            ));
        }

        let change = components[account_depth].index();
        if settings.standard_change_only && change > 1 {
            return Err(KeystoreError::invalid_path(format!(
                "Non-standard change value: {}",
                change
            )));
        }

        Ok(())
    }
}
