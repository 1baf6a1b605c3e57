//! # Handshake Packet Framing
//!
//! Two framing questions the crypto stream answers for the packet layer:
//!
//! - Which long header type the next handshake packet at a level should
//!   carry. Only packets that may hold the very first handshake byte are
//!   special, so the decision is expressed through a [`LongHeaderPolicy`]
//!   the packet layer can replace.
//! - How many bytes of packet overhead surround a crypto message, used to
//!   size the first flight.

#![forbid(unsafe_code)]

use crate::types::{ByteCount, EncryptionLevel, LongHeaderType};
use crate::version::TransportVersion;

/// Selects the long header type for handshake packets.
pub trait LongHeaderPolicy {
    /// Header type for data sent at `level`, or `None` when packets at that
    /// level use the short header.
    ///
    /// `first_handshake_byte` is decided by level, not by offset: it is true
    /// for all data at the unencrypted level, where the handshake starts.
    fn long_header_type(
        &self,
        level: EncryptionLevel,
        first_handshake_byte: bool,
    ) -> Option<LongHeaderType>;
}

/// Default header selection.
///
/// Unencrypted data is Initial, other data below forward-secure is
/// Handshake, and forward-secure data uses the short header.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelRelativePolicy;

impl LongHeaderPolicy for LevelRelativePolicy {
    fn long_header_type(
        &self,
        level: EncryptionLevel,
        first_handshake_byte: bool,
    ) -> Option<LongHeaderType> {
        match level {
            EncryptionLevel::ForwardSecure => None,
            _ if first_handshake_byte => Some(LongHeaderType::Initial),
            _ => Some(LongHeaderType::Handshake),
        }
    }
}

/// Connection ID length used in handshake packets.
const CONNECTION_ID_LENGTH: ByteCount = 8;

/// Version label length.
const VERSION_LENGTH: ByteCount = 4;

/// Diversification nonce length.
const NONCE_LENGTH: ByteCount = 32;

/// Type byte + stream id + offset + data length of the carrying frame.
const FRAME_OVERHEAD: ByteCount = 1 + 1 + 1 + 2;

/// Flags byte of the public header.
const PUBLIC_FLAGS_LENGTH: ByteCount = 1;

/// Packet overhead of sending a crypto handshake message.
pub fn crypto_message_framing_overhead(version: TransportVersion) -> ByteCount {
    let packet_number_length = if version.has_ietf_invariant_header() { 4 } else { 1 };
    PUBLIC_FLAGS_LENGTH
        + CONNECTION_ID_LENGTH
        + VERSION_LENGTH
        + NONCE_LENGTH
        + packet_number_length
        + FRAME_OVERHEAD
}
