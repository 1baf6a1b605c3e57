//! quicd-crypto: QUIC Crypto Stream
//!
//! This crate carries the QUIC handshake across encryption levels: it
//! buffers outgoing handshake data per level, reassembles incoming data,
//! tracks acknowledgment and loss, and resends what was lost at the level
//! it was first sent at.
//!
//! # Architecture
//!
//! - **Sans-I/O**: the connection is passed into every operation as a
//!   [`CryptoConnection`]; the stream never owns sockets or timers
//! - **Single-threaded**: one connection drives its stream; no locks
//! - **Two framing modes**: CRYPTO frames per level (version 47 and later)
//!   or a single handshake stream (earlier versions), fixed at construction
//! - **Zero-copy payloads**: buffered data is held as `bytes::Bytes`
//!
//! # RFC Compliance
//!
//! - **RFC 9000**: stream offsets, CRYPTO frames, transport error codes
//! - **RFC 9001**: encryption levels and handshake data transport
//! - **RFC 5869**: HKDF for keying material export
//!
//! # Module Organization
//!
//! - `crypto`: the crypto stream, handshake message parser, keying export
//! - `stream`: send buffer and sequencer used by each substream
//! - `connection`: the connection interface and encryption level guard
//! - `interval`: byte range sets
//! - `version`: transport versions, framing mode and version flags
//! - `config`: crypto stream configuration
//! - `telemetry`: logging setup and byte counters
//! - `error`: close codes and local errors
//! - `types`: levels, offsets and parsed frames

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod interval;
pub mod stream;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export key types
pub use config::CryptoStreamConfig;
pub use connection::{CryptoConnection, EncryptionLevelGuard};
pub use crypto::{
    CryptoMessageParser, CryptoStream, CryptoSubstream, HandshakeMessageParser, LongHeaderPolicy,
    NegotiatedParameters,
};
pub use error::{CryptoStreamError, ParserError, QuicErrorCode, Result, TransportError};
pub use interval::IntervalSet;
pub use stream::{StreamSendBuffer, StreamSequencer};
pub use telemetry::CryptoStreamStats;
pub use types::{
    ByteCount, ConsumedData, CryptoFrame, EncryptionLevel, LongHeaderType, Perspective,
    StreamFrame, StreamId, StreamOffset,
};
pub use version::{CryptoFramingMode, TransportVersion, VersionFlags, VersionManager};
