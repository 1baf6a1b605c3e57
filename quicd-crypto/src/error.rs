//! Crypto Stream Error Types
//!
//! Two kinds of failure leave the crypto stream:
//! - **Connection closes**: a [`QuicErrorCode`] plus detail string handed to
//!   the connection via `close_connection_with_details`. These are fatal.
//! - **Local failures**: a [`CryptoStreamError`] returned to the caller, who
//!   decides what to do next (e.g. keying material requested too early).

#![forbid(unsafe_code)]

use thiserror::Error;

/// Transport Error Codes as defined in RFC 9000 Section 20.1
///
/// These errors trigger immediate connection closure and are sent in
/// CONNECTION_CLOSE frames of type 0x1c.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum TransportError {
    /// No error (0x00) - Used for graceful shutdown
    NoError = 0x00,

    /// Internal Error (0x01) - Implementation error
    InternalError = 0x01,

    /// Stream State Error (0x05) - Frame received in invalid stream state
    StreamStateError = 0x05,

    /// Final Size Error (0x06) - Data beyond or contradicting the final size
    FinalSizeError = 0x06,

    /// Frame Encoding Error (0x07) - Frame encoding error
    FrameEncodingError = 0x07,

    /// Protocol Violation (0x0a) - Generic protocol violation
    ProtocolViolation = 0x0a,

    /// Crypto Buffer Exceeded (0x0d) - CRYPTO data buffer overflowed
    CryptoBufferExceeded = 0x0d,
}

impl TransportError {
    /// Wire code carried in CONNECTION_CLOSE.
    pub const fn to_code(self) -> u64 {
        self as u64
    }
}

/// Connection close codes emitted by the crypto stream.
///
/// Each code is distinguishable in logs and maps onto an RFC 9000 transport
/// error for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuicErrorCode {
    /// Local bookkeeping went wrong, or the peer acked data we never sent.
    InternalError,

    /// Crypto data arrived in a STREAM frame on a version using CRYPTO frames.
    InvalidStreamData,

    /// A CRYPTO frame arrived on a version that predates CRYPTO frames.
    InvalidCryptoFrame,

    /// Handshake data exceeded the maximum representable stream length.
    StreamLengthOverflow,

    /// Received handshake data contradicts the stream's final size.
    StreamDataBeyondCloseOffset,

    /// Out-of-order crypto data exceeded the reassembly buffer limit.
    CryptoBufferExceeded,

    /// A single handshake message exceeded the reassembly limit.
    CryptoMessageTooLong,

    /// The handshake message type is unknown to the parser.
    InvalidCryptoMessageType,

    /// The handshake state machine rejected a message.
    HandshakeFailed,
}

impl QuicErrorCode {
    /// Transport error sent to the peer for this close code.
    pub const fn transport_error(self) -> TransportError {
        match self {
            QuicErrorCode::InternalError => TransportError::InternalError,
            QuicErrorCode::InvalidStreamData => TransportError::StreamStateError,
            QuicErrorCode::InvalidCryptoFrame => TransportError::FrameEncodingError,
            QuicErrorCode::StreamLengthOverflow => TransportError::CryptoBufferExceeded,
            QuicErrorCode::StreamDataBeyondCloseOffset => TransportError::FinalSizeError,
            QuicErrorCode::CryptoBufferExceeded => TransportError::CryptoBufferExceeded,
            QuicErrorCode::CryptoMessageTooLong => TransportError::CryptoBufferExceeded,
            QuicErrorCode::InvalidCryptoMessageType => TransportError::ProtocolViolation,
            QuicErrorCode::HandshakeFailed => TransportError::ProtocolViolation,
        }
    }

    /// Stable name used in log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            QuicErrorCode::InternalError => "QUIC_INTERNAL_ERROR",
            QuicErrorCode::InvalidStreamData => "QUIC_INVALID_STREAM_DATA",
            QuicErrorCode::InvalidCryptoFrame => "QUIC_INVALID_CRYPTO_FRAME",
            QuicErrorCode::StreamLengthOverflow => "QUIC_STREAM_LENGTH_OVERFLOW",
            QuicErrorCode::StreamDataBeyondCloseOffset => "QUIC_STREAM_DATA_BEYOND_CLOSE_OFFSET",
            QuicErrorCode::CryptoBufferExceeded => "QUIC_CRYPTO_BUFFER_EXCEEDED",
            QuicErrorCode::CryptoMessageTooLong => "QUIC_CRYPTO_MESSAGE_TOO_LONG",
            QuicErrorCode::InvalidCryptoMessageType => "QUIC_INVALID_CRYPTO_MESSAGE_TYPE",
            QuicErrorCode::HandshakeFailed => "QUIC_HANDSHAKE_FAILED",
        }
    }
}

impl core::fmt::Display for QuicErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a handshake message parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {detail}")]
pub struct ParserError {
    /// Close code the connection should use.
    pub code: QuicErrorCode,
    /// Human-readable detail for CONNECTION_CLOSE.
    pub detail: String,
}

impl ParserError {
    pub fn new(code: QuicErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

/// Local (non-fatal) crypto stream failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoStreamError {
    /// Keying material requested before forward-secure keys were confirmed.
    #[error("handshake not confirmed")]
    HandshakeNotConfirmed,

    /// Exporter label contains a NUL byte.
    #[error("exporter label may not contain NUL bytes")]
    InvalidLabel,

    /// Exporter context does not fit a 32-bit length prefix.
    #[error("exporter context too long: {0} bytes")]
    ContextTooLong(usize),

    /// HKDF cannot produce that much output.
    #[error("requested keying material too long: {0} bytes")]
    KeyingMaterialTooLong(usize),

    /// An acknowledgment covered bytes that were never written.
    #[error("ack of unsent data [{offset}, {end})")]
    AckOfUnsentData { offset: u64, end: u64 },

    /// Reading or writing outside the buffered range.
    #[error("range [{offset}, {end}) is not buffered")]
    RangeNotBuffered { offset: u64, end: u64 },

    /// Received data would grow the reassembly buffer past its limit.
    #[error("reassembly buffer exceeded: [{offset}, {end}) with limit {limit}")]
    BufferExceeded { offset: u64, end: u64, limit: u64 },

    /// A FIN or frame disagrees with the final size already known.
    #[error("final size {final_size} contradicts received data ending at {received}")]
    FinalSizeMismatch { final_size: u64, received: u64 },

    /// The configuration does not allow this transport version.
    #[error("transport version {0} is disabled")]
    VersionDisabled(crate::version::TransportVersion),

    /// Handshake message parsing failed.
    #[error(transparent)]
    Parser(#[from] ParserError),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Generic Result Type for crypto stream operations
pub type Result<T> = core::result::Result<T, CryptoStreamError>;
