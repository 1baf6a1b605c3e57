//! Crypto stream configuration.
//!
//! Loaded from TOML by the embedding server and handed to every crypto
//! stream at construction. Nothing here is re-read mid-connection.
//!
//! # Example
//!
//! ```toml
//! max_handshake_message_size = 16384
//! max_buffered_bytes = 65536
//! release_sequencer_on_confirm = true
//!
//! [versions]
//! enable_version_47 = true
//! disable_version_39 = true
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CryptoStreamError, Result};
use crate::stream::DEFAULT_MAX_BUFFERED_BYTES;
use crate::version::VersionFlags;

/// Default largest handshake message the reassembler accepts.
pub const DEFAULT_MAX_HANDSHAKE_MESSAGE_SIZE: usize = 16 * 1024;

/// Crypto stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoStreamConfig {
    /// Which transport versions may be offered
    pub versions: VersionFlags,

    /// Largest single handshake message, in bytes
    pub max_handshake_message_size: usize,

    /// How far past the consumed offset received crypto data may reach
    pub max_buffered_bytes: u64,

    /// Release sequencer memory once the handshake is confirmed and no
    /// partial message is pending
    pub release_sequencer_on_confirm: bool,
}

impl Default for CryptoStreamConfig {
    fn default() -> Self {
        Self {
            versions: VersionFlags::default(),
            max_handshake_message_size: DEFAULT_MAX_HANDSHAKE_MESSAGE_SIZE,
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
            release_sequencer_on_confirm: true,
        }
    }
}

impl CryptoStreamConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: CryptoStreamConfig =
            toml::from_str(input).map_err(|e| CryptoStreamError::Config(e.to_string()))?;
        config
            .validate()
            .map_err(|errors| CryptoStreamError::Config(errors.join("; ")))?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Returns `Ok(())` if valid, or a list of error messages if invalid.
    pub fn validate(&self) -> core::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_handshake_message_size == 0 {
            errors.push("max_handshake_message_size must be greater than 0".to_string());
        }
        // Header is 4 bytes; a full message has to fit behind the gap.
        if (self.max_handshake_message_size as u64).saturating_add(4) > self.max_buffered_bytes {
            errors.push(format!(
                "max_buffered_bytes ({}) must hold a full handshake message ({} + 4 bytes)",
                self.max_buffered_bytes, self.max_handshake_message_size
            ));
        }

        let flags = self.versions;
        let any_enabled = flags.enable_version_99
            || flags.enable_version_47
            || flags.enable_version_46
            || flags.enable_version_44
            || flags.enable_version_43
            || !flags.disable_version_39;
        if !any_enabled {
            errors.push("at least one transport version must be enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CryptoStreamConfig::default().validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = CryptoStreamConfig::from_toml_str(
            r#"
            release_sequencer_on_confirm = false

            [versions]
            enable_version_47 = true
            "#,
        )
        .unwrap();

        assert!(!config.release_sequencer_on_confirm);
        assert!(config.versions.enable_version_47);
        assert!(config.versions.enable_version_46);
        assert_eq!(
            config.max_handshake_message_size,
            DEFAULT_MAX_HANDSHAKE_MESSAGE_SIZE
        );
    }

    #[test]
    fn test_validation_errors_are_collected() {
        let mut config = CryptoStreamConfig::default();
        config.max_handshake_message_size = 0;
        config.versions = VersionFlags {
            enable_version_99: false,
            enable_version_47: false,
            enable_version_46: false,
            enable_version_44: false,
            enable_version_43: false,
            disable_version_39: true,
        };

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = CryptoStreamConfig::from_toml_str("max_buffered_bytes = \"lots\"").unwrap_err();
        assert!(matches!(err, CryptoStreamError::Config(_)));
    }
}
