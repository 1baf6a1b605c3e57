//! # Core Crypto Stream Types
//!
//! Encryption levels, offsets and the already-parsed frame shapes the crypto
//! stream consumes. Wire encoding of frames belongs to the packet layer.

#![forbid(unsafe_code)]

use core::fmt;

// ============================================================================
// Offsets and Lengths
// ============================================================================

/// Byte offset within a stream (or within one encryption level's crypto stream)
pub type StreamOffset = u64;

/// Count of bytes
pub type ByteCount = u64;

/// Maximum value for a QUIC variable-length integer (2^62 - 1)
pub const VARINT_MAX: u64 = (1u64 << 62) - 1;

/// Largest offset any stream may reach. Stream offsets are varints on the wire.
pub const MAX_STREAM_LENGTH: StreamOffset = VARINT_MAX;

/// Stream identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    /// Stream carrying the handshake on versions without CRYPTO frames.
    pub const LEGACY_CRYPTO: StreamId = StreamId(1);
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Encryption Levels
// ============================================================================

/// Number of encryption levels with their own crypto substream.
pub const NUM_ENCRYPTION_LEVELS: usize = 3;

/// Encryption Level
///
/// A stage of the handshake key schedule. Crypto data at different levels
/// forms logically independent byte streams. Ordering follows the handshake:
/// `None < ZeroRtt < ForwardSecure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EncryptionLevel {
    /// Unencrypted (Initial) data
    None,

    /// Data protected with 0-RTT/handshake keys
    ZeroRtt,

    /// Data protected with 1-RTT keys
    ForwardSecure,
}

impl EncryptionLevel {
    /// All levels in stage order.
    pub const ALL: [EncryptionLevel; NUM_ENCRYPTION_LEVELS] = [
        EncryptionLevel::None,
        EncryptionLevel::ZeroRtt,
        EncryptionLevel::ForwardSecure,
    ];

    /// Ordinal used to index per-level arrays.
    pub const fn index(self) -> usize {
        match self {
            EncryptionLevel::None => 0,
            EncryptionLevel::ZeroRtt => 1,
            EncryptionLevel::ForwardSecure => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            EncryptionLevel::None => "ENCRYPTION_NONE",
            EncryptionLevel::ZeroRtt => "ENCRYPTION_ZERO_RTT",
            EncryptionLevel::ForwardSecure => "ENCRYPTION_FORWARD_SECURE",
        }
    }
}

impl fmt::Display for EncryptionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Perspective {
    Client,
    Server,
}

/// Long header packet type selected for handshake packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LongHeaderType {
    /// First flight of unencrypted handshake data
    Initial,

    /// Unencrypted handshake data after the first flight
    Handshake,

    /// 0-RTT protected packets
    ZeroRttProtected,
}

// ============================================================================
// Frames (already parsed)
// ============================================================================

/// CRYPTO Frame (RFC 9000 Section 19.6)
///
/// Handshake data tagged with the encryption level of the packet it arrived
/// in. Only versions with per-level framing carry these.
#[derive(Debug, Clone, Copy)]
pub struct CryptoFrame<'a> {
    /// Encryption level of the enclosing packet
    pub level: EncryptionLevel,

    /// Byte offset within this level's crypto stream
    pub offset: StreamOffset,

    /// Crypto data (lifetime-bound reference to packet buffer)
    pub data: &'a [u8],
}

impl<'a> CryptoFrame<'a> {
    pub fn new(level: EncryptionLevel, offset: StreamOffset, data: &'a [u8]) -> Self {
        Self {
            level,
            offset,
            data,
        }
    }
}

/// STREAM Frame for the legacy crypto stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamFrame<'a> {
    /// Stream ID
    pub stream_id: StreamId,

    /// Byte offset in stream
    pub offset: StreamOffset,

    /// FIN bit: indicates final frame in stream
    pub fin: bool,

    /// Stream data (lifetime-bound reference to packet buffer)
    pub data: &'a [u8],
}

/// Result of handing stream data to the connection for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumedData {
    /// Bytes the connection accepted
    pub bytes_consumed: usize,

    /// Whether the FIN was accepted
    pub fin_consumed: bool,
}

impl ConsumedData {
    pub const fn new(bytes_consumed: usize, fin_consumed: bool) -> Self {
        Self {
            bytes_consumed,
            fin_consumed,
        }
    }
}

impl fmt::Display for ConsumedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bytes_consumed: {} fin_consumed: {}",
            self.bytes_consumed, self.fin_consumed
        )
    }
}
