//! # Transport Versions and Crypto Framing Mode
//!
//! Handshake data travels in one of two mutually exclusive ways, decided by
//! the negotiated transport version:
//!
//! - **Legacy** (versions before 47): a single generic stream carries all
//!   handshake bytes. Packets do not say which encryption level a byte
//!   belongs to, so retransmission recovers it from send history.
//! - **Modern** (47 and later): CRYPTO frames carry a level tag and every
//!   level has its own independently buffered byte stream.
//!
//! Which versions are offered at all is controlled by [`VersionFlags`].
//! Flags are read once when a [`VersionManager`] is built or updated, never
//! mid-connection.

#![forbid(unsafe_code)]

use core::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Transport Versions
// ============================================================================

/// Transport versions this crate knows how to frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportVersion {
    V39,
    V43,
    V44,
    V46,
    V47,
    V99,
}

impl TransportVersion {
    /// Every known version, newest first.
    pub const ALL: [TransportVersion; 6] = [
        TransportVersion::V99,
        TransportVersion::V47,
        TransportVersion::V46,
        TransportVersion::V44,
        TransportVersion::V43,
        TransportVersion::V39,
    ];

    pub const fn number(self) -> u32 {
        match self {
            TransportVersion::V39 => 39,
            TransportVersion::V43 => 43,
            TransportVersion::V44 => 44,
            TransportVersion::V46 => 46,
            TransportVersion::V47 => 47,
            TransportVersion::V99 => 99,
        }
    }

    /// Look a version up by number.
    pub fn from_number(number: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.number() == number)
    }

    /// 32-bit version label as it appears on the wire ("Q0xx").
    pub fn label(self) -> u32 {
        let n = self.number();
        u32::from_be_bytes([b'Q', b'0', b'0' + (n / 10) as u8, b'0' + (n % 10) as u8])
    }

    /// Whether handshake data travels in level-tagged CRYPTO frames.
    pub const fn uses_crypto_frames(self) -> bool {
        self.number() >= 47
    }

    /// Whether packets use the IETF invariant long header.
    pub const fn has_ietf_invariant_header(self) -> bool {
        self.number() > 43
    }

    /// Whether long headers carry a length field.
    pub const fn has_long_header_lengths(self) -> bool {
        self.number() >= 99
    }
}

impl fmt::Display for TransportVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{:03}", self.number())
    }
}

// ============================================================================
// Crypto Framing Mode
// ============================================================================

/// How handshake data is framed, fixed for a connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptoFramingMode {
    /// Single generic stream, no level tags
    Legacy,

    /// One CRYPTO-framed substream per encryption level
    Modern,
}

impl CryptoFramingMode {
    pub const fn for_version(version: TransportVersion) -> Self {
        if version.uses_crypto_frames() {
            CryptoFramingMode::Modern
        } else {
            CryptoFramingMode::Legacy
        }
    }

    pub const fn is_legacy(self) -> bool {
        matches!(self, CryptoFramingMode::Legacy)
    }

    pub const fn is_modern(self) -> bool {
        matches!(self, CryptoFramingMode::Modern)
    }
}

// ============================================================================
// Version Flags
// ============================================================================

/// Which versions may be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionFlags {
    pub enable_version_99: bool,
    pub enable_version_47: bool,
    pub enable_version_46: bool,
    pub enable_version_44: bool,
    pub enable_version_43: bool,
    pub disable_version_39: bool,
}

impl Default for VersionFlags {
    fn default() -> Self {
        Self {
            enable_version_99: false,
            enable_version_47: false,
            enable_version_46: true,
            enable_version_44: true,
            enable_version_43: true,
            disable_version_39: false,
        }
    }
}

impl VersionFlags {
    /// Every version enabled.
    pub fn all_enabled() -> Self {
        Self {
            enable_version_99: true,
            enable_version_47: true,
            enable_version_46: true,
            enable_version_44: true,
            enable_version_43: true,
            disable_version_39: false,
        }
    }

    pub fn allows(&self, version: TransportVersion) -> bool {
        match version {
            TransportVersion::V99 => self.enable_version_99,
            TransportVersion::V47 => self.enable_version_47,
            TransportVersion::V46 => self.enable_version_46,
            TransportVersion::V44 => self.enable_version_44,
            TransportVersion::V43 => self.enable_version_43,
            TransportVersion::V39 => !self.disable_version_39,
        }
    }
}

// ============================================================================
// Version Manager
// ============================================================================

/// Filters the versions an endpoint may use according to [`VersionFlags`].
#[derive(Debug, Clone)]
pub struct VersionManager {
    flags: VersionFlags,

    /// Versions that may be supported, in preference order
    allowed: Vec<TransportVersion>,

    /// `allowed` filtered by `flags`
    filtered: Vec<TransportVersion>,
}

impl VersionManager {
    pub fn new(allowed: Vec<TransportVersion>, flags: VersionFlags) -> Self {
        let mut manager = Self {
            flags,
            allowed,
            filtered: Vec::new(),
        };
        manager.refilter();
        manager
    }

    /// Manager over every known version.
    pub fn with_flags(flags: VersionFlags) -> Self {
        Self::new(TransportVersion::ALL.to_vec(), flags)
    }

    pub fn flags(&self) -> VersionFlags {
        self.flags
    }

    /// Replace the flags. Connections already negotiated are unaffected.
    pub fn update_flags(&mut self, flags: VersionFlags) {
        if self.flags == flags {
            return;
        }
        self.flags = flags;
        self.refilter();
    }

    /// Currently supported versions, in preference order.
    pub fn supported_versions(&self) -> &[TransportVersion] {
        &self.filtered
    }

    /// Pick our most preferred version that the peer also offers.
    pub fn select_version(&self, peer_versions: &[TransportVersion]) -> Option<TransportVersion> {
        self.filtered
            .iter()
            .copied()
            .find(|v| peer_versions.contains(v))
    }

    fn refilter(&mut self) {
        let flags = self.flags;
        self.filtered = self
            .allowed
            .iter()
            .copied()
            .filter(|v| flags.allows(*v))
            .collect();
        tracing::debug!(
            supported = ?self.filtered,
            "Refiltered supported transport versions"
        );
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_mode_by_version() {
        assert_eq!(
            CryptoFramingMode::for_version(TransportVersion::V46),
            CryptoFramingMode::Legacy
        );
        assert_eq!(
            CryptoFramingMode::for_version(TransportVersion::V47),
            CryptoFramingMode::Modern
        );
        assert!(CryptoFramingMode::for_version(TransportVersion::V99).is_modern());
        assert!(CryptoFramingMode::for_version(TransportVersion::V39).is_legacy());
    }

    #[test]
    fn test_version_labels() {
        assert_eq!(TransportVersion::V43.label(), u32::from_be_bytes(*b"Q043"));
        assert_eq!(TransportVersion::V99.to_string(), "Q099");
        assert_eq!(TransportVersion::from_number(47), Some(TransportVersion::V47));
        assert_eq!(TransportVersion::from_number(45), None);
    }

    #[test]
    fn test_default_flags_filter_versions() {
        let manager = VersionManager::with_flags(VersionFlags::default());
        assert_eq!(
            manager.supported_versions(),
            &[
                TransportVersion::V46,
                TransportVersion::V44,
                TransportVersion::V43,
                TransportVersion::V39
            ]
        );
    }

    #[test]
    fn test_update_flags_refilters() {
        let mut manager = VersionManager::with_flags(VersionFlags::default());
        let mut flags = VersionFlags::default();
        flags.enable_version_47 = true;
        flags.disable_version_39 = true;
        manager.update_flags(flags);

        assert_eq!(manager.supported_versions()[0], TransportVersion::V47);
        assert!(!manager.supported_versions().contains(&TransportVersion::V39));
    }

    #[test]
    fn test_select_version_prefers_newest_shared() {
        let manager = VersionManager::with_flags(VersionFlags::all_enabled());
        assert_eq!(
            manager.select_version(&[TransportVersion::V43, TransportVersion::V47]),
            Some(TransportVersion::V47)
        );

        let legacy_only = VersionManager::with_flags(VersionFlags::default());
        assert_eq!(legacy_only.select_version(&[TransportVersion::V99]), None);
    }
}
