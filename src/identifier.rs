//! Keystore identity
//!
//! A keystore's identifier is the SHA-256 of the compressed public key at its
//! identity root (`m/44'` single-sig, `m/46'` multisig), rendered as 64
//! lowercase hex characters. The same seed always yields the same identifier,
//! independent of the backend that holds it.

use bitcoin::bip32::Xpub;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{KeystoreError, KeystoreResult};
use crate::keypath::AbsoluteKeypath;
use crate::keystore::Keystore;

/// Length of an identifier in hex characters
pub const IDENTIFIER_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Hash the public key of an identity-root xpub
    pub fn from_xpub(xpub: &Xpub) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(xpub.public_key.serialize());
        Identifier(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines and UI labels
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = KeystoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != IDENTIFIER_HEX_LEN {
            return Err(KeystoreError::invalid_input(format!(
                "Identifier must be {} hex characters, got {}",
                IDENTIFIER_HEX_LEN,
                s.len()
            )));
        }
        if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(KeystoreError::invalid_input("Identifier must be lowercase hex"));
        }
        Ok(Identifier(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Derive the identifier of any keystore through its own public derivation
pub fn derive_identifier<K: Keystore + ?Sized>(keystore: &K) -> KeystoreResult<Identifier> {
    let root = AbsoluteKeypath::identity_root(keystore.signing_mode());
    let xpub = keystore.extended_public_key(&root)?;
    Ok(Identifier::from_xpub(&xpub))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::bip32::Xpriv;
    use bitcoin::secp256k1::Secp256k1;
    use bitcoin::NetworkKind;

    const VECTOR2_SEED: &str = "fffcf9f6f3f0edeae7e4e1dedbd8d5d2cfccc9c6c3c0bdbab7b4b1aeaba8a5a29f9c999693908d8a8784817e7b7875726f6c696663605d5a5754514e4b484542";

    fn xpub_at(seed: &[u8], path: &str) -> Xpub {
        let secp = Secp256k1::new();
        let master = Xpriv::new_master(NetworkKind::Main, seed).unwrap();
        let path: AbsoluteKeypath = path.parse().unwrap();
        let child = master.derive_priv(&secp, &path.to_derivation_path()).unwrap();
        Xpub::from_priv(&secp, &child)
    }

    #[test]
    fn test_identifier_fixture() {
        let seed = hex::decode(VECTOR2_SEED).unwrap();
        let single = Identifier::from_xpub(&xpub_at(&seed, "m/44'"));
        assert_eq!(
            single.as_str(),
            "782a4cb14d97acf9c2e0834c1670a2b811bb2be8563d5fc11d4d32604291a74f"
        );
        let multi = Identifier::from_xpub(&xpub_at(&seed, "m/46'"));
        assert_eq!(
            multi.as_str(),
            "5a1db954aa259e1080889ffe439e9ccfe0136874617e2d583c86628e3db933b6"
        );
    }

    #[test]
    fn test_identifier_differs_per_seed() {
        let a = Identifier::from_xpub(&xpub_at(&[1u8; 64], "m/46'"));
        let b = Identifier::from_xpub(&xpub_at(&[2u8; 64], "m/46'"));
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), IDENTIFIER_HEX_LEN);
    }

    #[test]
    fn test_parse_rejects_bad_identifiers() {
        assert!("abc".parse::<Identifier>().is_err());
        let upper = "782A4CB14D97ACF9C2E0834C1670A2B811BB2BE8563D5FC11D4D32604291A74F";
        assert!(upper.parse::<Identifier>().is_err());
        let ok = "782a4cb14d97acf9c2e0834c1670a2b811bb2be8563d5fc11d4d32604291a74f";
        let id: Identifier = ok.parse().unwrap();
        assert_eq!(id.short(), "782a4cb1");
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let bad: Result<Identifier, _> = serde_json::from_str("\"zz\"");
        assert!(bad.is_err());
    }
}
