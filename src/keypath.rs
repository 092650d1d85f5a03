//! Absolute BIP-32 keypaths
//!
//! Every derivation request crossing the keystore contract carries an
//! absolute path from the master key (`m/...`). Relative paths are never
//! accepted, so two backends can never disagree about an implicit base.

use bitcoin::bip32::{ChildNumber, DerivationPath};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{KeystoreError, KeystoreResult};
use crate::types::{ScriptType, SigningMode};

/// Standard BIP purposes
pub mod bip_purposes {
    pub const BIP44: u32 = 44; // Legacy (P2PKH)
    pub const BIP46: u32 = 46; // Multisig identity root
    pub const BIP48: u32 = 48; // Multisig accounts
    pub const BIP49: u32 = 49; // SegWit compatible (P2SH-P2WPKH)
    pub const BIP84: u32 = 84; // Native SegWit (P2WPKH)
    pub const BIP86: u32 = 86; // Taproot (P2TR)
}

/// Coin types from SLIP-0044
pub mod coin_types {
    pub const BITCOIN: u32 = 0;
    pub const BITCOIN_TESTNET: u32 = 1;
}

/// Hardened offset for BIP-32 derivation
pub const HARDENED: u32 = 0x80000000;

/// BIP32 serializes depth as one byte
pub const MAX_DEPTH: usize = 255;

/// Single component of a keypath
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeypathComponent {
    index: u32,
    hardened: bool,
}

impl KeypathComponent {
    pub fn new(index: u32, hardened: bool) -> KeystoreResult<Self> {
        if index >= HARDENED {
            return Err(KeystoreError::invalid_path(format!(
                "Path component {} exceeds maximum value",
                index
            )));
        }
        Ok(Self { index, hardened })
    }

    pub fn hardened(index: u32) -> KeystoreResult<Self> {
        Self::new(index, true)
    }

    pub fn normal(index: u32) -> KeystoreResult<Self> {
        Self::new(index, false)
    }

    /// Index without the hardened bit
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_hardened(&self) -> bool {
        self.hardened
    }

    /// Get the full index including hardened bit
    pub fn full_index(&self) -> u32 {
        if self.hardened {
            self.index | HARDENED
        } else {
            self.index
        }
    }
}

impl From<KeypathComponent> for ChildNumber {
    fn from(c: KeypathComponent) -> Self {
        if c.hardened {
            ChildNumber::Hardened { index: c.index }
        } else {
            ChildNumber::Normal { index: c.index }
        }
    }
}

impl fmt::Display for KeypathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// Non-empty absolute derivation path from the master key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbsoluteKeypath {
    components: Vec<KeypathComponent>,
}

impl AbsoluteKeypath {
    pub fn new(components: Vec<KeypathComponent>) -> KeystoreResult<Self> {
        if components.is_empty() {
            return Err(KeystoreError::invalid_path("Empty derivation path"));
        }
        if components.len() > MAX_DEPTH {
            return Err(KeystoreError::invalid_path(format!(
                "Derivation path has {} levels, at most {} allowed",
                components.len(),
                MAX_DEPTH
            )));
        }
        Ok(Self { components })
    }

    /// Root used to derive a keystore's identifier
    ///
    /// `m/44'` for single-sig, `m/46'` for multisig.
    pub fn identity_root(mode: SigningMode) -> Self {
        let purpose = match mode {
            SigningMode::SingleSig => bip_purposes::BIP44,
            SigningMode::Multisig => bip_purposes::BIP46,
        };
        Self {
            components: vec![KeypathComponent { index: purpose, hardened: true }],
        }
    }

    /// Account keypath for a script type: `m/purpose'/coin'/account'`, with the
    /// BIP-48 script index appended for multisig scripts.
    pub fn account(script_type: ScriptType, coin_type: u32, account: u32) -> KeystoreResult<Self> {
        let mut components = vec![
            KeypathComponent::hardened(script_type.purpose())?,
            KeypathComponent::hardened(coin_type)?,
            KeypathComponent::hardened(account)?,
        ];
        if let Some(script_index) = script_type.bip48_script_index() {
            components.push(KeypathComponent::hardened(script_index)?);
        }
        Self::new(components)
    }

    pub fn components(&self) -> &[KeypathComponent] {
        &self.components
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    pub fn last(&self) -> KeypathComponent {
        // Non-empty by construction
        self.components[self.components.len() - 1]
    }

    /// Path one level up, `None` for a depth-1 path
    pub fn parent(&self) -> Option<Self> {
        if self.components.len() <= 1 {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, index: u32, hardened: bool) -> KeystoreResult<Self> {
        let mut components = self.components.clone();
        components.push(KeypathComponent::new(index, hardened)?);
        Self::new(components)
    }

    pub fn is_prefix_of(&self, other: &AbsoluteKeypath) -> bool {
        other.components.starts_with(&self.components)
    }

    /// Components of `self` below `prefix`, `None` if `prefix` is not a prefix
    pub fn strip_prefix(&self, prefix: &AbsoluteKeypath) -> Option<&[KeypathComponent]> {
        self.components.strip_prefix(prefix.components.as_slice())
    }

    pub fn has_hardened_after(&self, depth: usize) -> bool {
        self.components.iter().skip(depth).any(|c| c.hardened)
    }

    pub fn purpose(&self) -> u32 {
        self.components[0].index
    }

    pub fn coin_type(&self) -> Option<u32> {
        self.components.get(1).map(|c| c.index)
    }

    pub fn account_index(&self) -> Option<u32> {
        self.components.get(2).map(|c| c.index)
    }

    pub fn to_derivation_path(&self) -> DerivationPath {
        self.components
            .iter()
            .map(|c| ChildNumber::from(*c))
            .collect::<Vec<_>>()
            .into()
    }
}

impl fmt::Display for AbsoluteKeypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

impl FromStr for AbsoluteKeypath {
    type Err = KeystoreError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let trimmed = path.trim();

        // Must start with m/
        if !trimmed.starts_with("m/") && !trimmed.starts_with("M/") {
            return Err(KeystoreError::invalid_path(format!(
                "Keypath '{}' must start with 'm/'",
                path
            )));
        }

        let path_part = &trimmed[2..];
        if path_part.is_empty() {
            return Err(KeystoreError::invalid_path("Empty derivation path"));
        }

        let components = path_part
            .split('/')
            .map(parse_component)
            .collect::<KeystoreResult<Vec<_>>>()?;

        Self::new(components)
    }
}

/// Parse a single path component
fn parse_component(s: &str) -> KeystoreResult<KeypathComponent> {
    let trimmed = s.trim();

    if trimmed.is_empty() {
        return Err(KeystoreError::invalid_path("Empty path component"));
    }

    let (number_str, hardened) = match trimmed.strip_suffix(['\'', 'h', 'H']) {
        Some(rest) => (rest, true),
        None => (trimmed, false),
    };

    let index: u32 = number_str
        .parse()
        .map_err(|e| KeystoreError::invalid_path(format!("Invalid path component '{}': {}", s, e)))?;

    KeypathComponent::new(index, hardened)
}

impl Serialize for AbsoluteKeypath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AbsoluteKeypath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Account keypath plus the change/address suffix the wallet fills in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeypathTemplate {
    account: AbsoluteKeypath,
}

impl KeypathTemplate {
    pub fn new(account: AbsoluteKeypath) -> Self {
        Self { account }
    }

    pub fn account(&self) -> &AbsoluteKeypath {
        &self.account
    }

    /// `<account>/change/index`, both non-hardened
    pub fn address(&self, change: u32, index: u32) -> KeystoreResult<AbsoluteKeypath> {
        if change > 1 {
            return Err(KeystoreError::invalid_path(format!(
                "Non-standard change value: {}. Should be 0 (external) or 1 (internal)",
                change
            )));
        }
        self.account.child(change, false)?.child(index, false)
    }
}
