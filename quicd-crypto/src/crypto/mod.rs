//! # Crypto Stream Module (RFC 9001 Section 4)
//!
//! Handshake data transport: per-level substreams, handshake message
//! reassembly, header type selection and keying material export.
//!
//! - `stream`: [`CryptoStream`], the entry point used by the connection
//! - `substream`: send buffer + sequencer pair per encryption level
//! - `parser`: handshake message framing
//! - `framing`: long header selection and crypto packet overhead
//! - `keying`: HKDF-based keying material exporter

pub mod framing;
pub mod keying;
pub mod parser;
pub mod stream;
pub mod substream;


pub use framing::{crypto_message_framing_overhead, LevelRelativePolicy, LongHeaderPolicy};
pub use keying::export_keying_material;
pub use parser::{
    encode_handshake_message, CryptoMessageParser, HandshakeMessage, HandshakeMessageParser,
};
pub use stream::{CryptoStream, NegotiatedParameters};
pub use substream::CryptoSubstream;
