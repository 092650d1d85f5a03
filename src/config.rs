//! Keystore Configuration
//!
//! Centralized settings with:
//! - Strictness presets (standard, strict)
//! - Runtime updates through a lock-protected manager
//! - Environment overrides for embedding applications
//! - Validation of setting combinations

use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use crate::error::{KeystoreError, KeystoreResult};

/// What a keystore handle does when a second call arrives while one is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Fail the second call with a busy error
    Reject,
    /// Block the second call until the first completes
    Wait,
}

/// Settings presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrictnessLevel {
    Standard,
    Strict,
    Custom,
}

/// Keystore settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreSettings {
    pub level: StrictnessLevel,

    /// Behaviour on concurrent calls to one handle
    pub busy_policy: BusyPolicy,

    // Path validation
    /// Purpose, coin type and account segments must be hardened
    pub require_hardened_account: bool,
    /// First path segment must be the purpose of the script type
    pub enforce_script_purpose: bool,
    /// Change segment must be 0 (receive) or 1 (change)
    pub standard_change_only: bool,

    // Signing
    /// Verify each attached signature against the signer's key
    pub verify_attached_signatures: bool,

    /// Emit debug-level log lines
    pub debug_logging: bool,
}

impl Default for KeystoreSettings {
    fn default() -> Self {
        Self::standard()
    }
}

impl KeystoreSettings {
    /// Standard preset
    pub fn standard() -> Self {
        Self {
            level: StrictnessLevel::Standard,
            busy_policy: BusyPolicy::Reject,
            require_hardened_account: true,
            enforce_script_purpose: true,
            standard_change_only: false,
            verify_attached_signatures: true,
            debug_logging: false,
        }
    }

    /// Strict preset
    pub fn strict() -> Self {
        Self {
            level: StrictnessLevel::Strict,
            busy_policy: BusyPolicy::Reject,
            require_hardened_account: true,
            enforce_script_purpose: true,
            standard_change_only: true,
            verify_attached_signatures: true,
            debug_logging: false,
        }
    }

    /// Load a preset and apply `HD_KEYSTORE_*` environment overrides
    pub fn from_env() -> KeystoreResult<Self> {
        let mut settings = match std::env::var("HD_KEYSTORE_LEVEL").ok().as_deref() {
            None | Some("standard") => Self::standard(),
            Some("strict") => Self::strict(),
            Some(other) => {
                return Err(KeystoreError::invalid_input(format!(
                    "Unknown HD_KEYSTORE_LEVEL '{}'",
                    other
                )))
            }
        };

        if let Ok(policy) = std::env::var("HD_KEYSTORE_BUSY_POLICY") {
            settings.busy_policy = parse_busy_policy(&policy)?;
            settings.level = StrictnessLevel::Custom;
        }

        if let Ok(debug) = std::env::var("HD_KEYSTORE_DEBUG") {
            settings.debug_logging = matches!(debug.as_str(), "1" | "true" | "yes");
        }

        Ok(settings)
    }

    /// Validate settings consistency
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !self.require_hardened_account {
            warnings.push(
                "Warning: Unhardened account keypaths allow sibling key recovery from one leaked child key"
                    .to_string(),
            );
        }

        if !self.enforce_script_purpose {
            warnings.push(
                "Warning: Addresses may be displayed for keypaths of a different script type"
                    .to_string(),
            );
        }

        if !self.verify_attached_signatures {
            warnings.push("Warning: Attached signatures are not verified before finalizing".to_string());
        }

        if self.level == StrictnessLevel::Strict && self.busy_policy == BusyPolicy::Wait {
            warnings.push("Warning: Strict level with a waiting busy policy".to_string());
        }

        warnings
    }
}

fn parse_busy_policy(value: &str) -> KeystoreResult<BusyPolicy> {
    match value {
        "reject" => Ok(BusyPolicy::Reject),
        "wait" => Ok(BusyPolicy::Wait),
        other => Err(KeystoreError::invalid_input(format!(
            "Unknown busy policy '{}'",
            other
        ))),
    }
}

/// Lock-protected settings shared by keystores of one application
pub struct KeystoreConfig {
    config: RwLock<KeystoreSettings>,
}

impl KeystoreConfig {
    pub fn new() -> Self {
        Self {
            config: RwLock::new(KeystoreSettings::default()),
        }
    }

    pub fn with_settings(settings: KeystoreSettings) -> Self {
        Self {
            config: RwLock::new(settings),
        }
    }

    /// Get current settings
    pub fn settings(&self) -> KeystoreSettings {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|_| KeystoreSettings::strict())
    }

    pub fn level(&self) -> StrictnessLevel {
        self.config
            .read()
            .map(|c| c.level)
            .unwrap_or(StrictnessLevel::Strict)
    }

    /// Set level (applies preset)
    pub fn set_level(&self, level: StrictnessLevel) {
        let Ok(mut config) = self.config.write() else { return };
        *config = match level {
            StrictnessLevel::Standard => KeystoreSettings::standard(),
            StrictnessLevel::Strict => KeystoreSettings::strict(),
            StrictnessLevel::Custom => {
                let mut current = config.clone();
                current.level = StrictnessLevel::Custom;
                current
            }
        };
    }

    /// Update settings in place, returning validation warnings
    pub fn update<F>(&self, updater: F) -> Vec<String>
    where
        F: FnOnce(&mut KeystoreSettings),
    {
        let Ok(mut config) = self.config.write() else {
            return vec!["Failed to acquire config lock".to_string()];
        };
        config.level = StrictnessLevel::Custom;
        updater(&mut config);
        config.validate()
    }
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate_cleanly() {
        assert!(KeystoreSettings::standard().validate().is_empty());
        assert!(KeystoreSettings::strict().validate().is_empty());
    }

    #[test]
    fn test_update_marks_custom_and_warns() {
        let config = KeystoreConfig::new();
        let warnings = config.update(|s| s.verify_attached_signatures = false);
        assert_eq!(config.level(), StrictnessLevel::Custom);
        assert_eq!(warnings.len(), 1);
        assert!(!config.settings().verify_attached_signatures);
    }

    #[test]
    fn test_script_purpose_enforced_by_default() {
        assert!(KeystoreSettings::default().enforce_script_purpose);

        let config = KeystoreConfig::new();
        let warnings = config.update(|s| s.enforce_script_purpose = false);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("script type"));
    }

    #[test]
    fn test_set_level_applies_preset() {
        let config = KeystoreConfig::new();
        config.update(|s| s.busy_policy = BusyPolicy::Wait);
        config.set_level(StrictnessLevel::Strict);
        assert_eq!(config.settings(), KeystoreSettings::strict());
    }

    #[test]
    fn test_parse_busy_policy() {
        assert_eq!(parse_busy_policy("wait").unwrap(), BusyPolicy::Wait);
        assert_eq!(parse_busy_policy("reject").unwrap(), BusyPolicy::Reject);
        assert!(parse_busy_policy("queue").is_err());
    }
}
