//! Serde helpers for byte arrays
//!
//! Sighashes and chain codes are fixed-size arrays; they travel as hex strings.

use serde::{Deserialize, Deserializer, Serializer};

/// Serialize/deserialize [u8; 32] as hex string
pub mod hex32 {
    use super::*;

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Holder {
        #[serde(with = "super::hex32")]
        sighash: [u8; 32],
    }

    #[test]
    fn test_hex32_rejects_wrong_length() {
        let short: Result<Holder, _> = serde_json::from_str(r#"{"sighash":"abcd"}"#);
        assert!(short.is_err());
    }

    #[test]
    fn test_hex32_encodes_lowercase_hex() {
        let json = serde_json::to_string(&Holder { sighash: [0xab; 32] }).unwrap();
        assert_eq!(json, format!(r#"{{"sighash":"{}"}}"#, "ab".repeat(32)));
    }
}
