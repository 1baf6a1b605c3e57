//! # Handshake Message Parsing (RFC 9001 Section 4.1.3)
//!
//! The crypto stream hands every contiguous region of handshake bytes to a
//! [`CryptoMessageParser`] together with the encryption level it arrived at.
//! What the messages mean is the handshake state machine's business; the
//! parser only has to say whether input was acceptable and how many bytes
//! of an incomplete message it is still holding.
//!
//! [`HandshakeMessageParser`] is the stock implementation: it splits the
//! byte stream into TLS handshake messages
//!
//! ```text
//! Handshake {
//!   msg_type (8),
//!   length (24),
//!   body (length * 8),
//! }
//! ```
//!
//! and queues complete ones for the handshake driver.

#![forbid(unsafe_code)]

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

use crate::config::CryptoStreamConfig;
use crate::error::{ParserError, QuicErrorCode};
use crate::types::EncryptionLevel;

/// Consumer of reassembled handshake bytes.
pub trait CryptoMessageParser {
    /// Feed `input` received at `level`.
    ///
    /// An error is fatal for the connection.
    fn process_input(&mut self, input: &[u8], level: EncryptionLevel) -> Result<(), ParserError>;

    /// Bytes of a partially received message held by the parser.
    fn input_bytes_remaining(&self) -> usize;
}

/// Length of the type + length header.
const HEADER_LEN: usize = 4;

/// TLS 1.3 handshake message types (RFC 8446 Section 4).
const KNOWN_MESSAGE_TYPES: [u8; 11] = [
    1,   // client_hello
    2,   // server_hello
    4,   // new_session_ticket
    5,   // end_of_early_data
    8,   // encrypted_extensions
    11,  // certificate
    13,  // certificate_request
    15,  // certificate_verify
    20,  // finished
    24,  // key_update
    254, // message_hash
];

/// A complete handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    /// Level the message arrived at
    pub level: EncryptionLevel,

    pub msg_type: u8,

    /// Message body, without the 4-byte header
    pub body: Bytes,
}

/// Splits handshake bytes into TLS handshake messages.
#[derive(Debug)]
pub struct HandshakeMessageParser {
    max_message_size: usize,

    /// Bytes of the message being assembled
    partial: BytesMut,

    /// Level the partial message started at
    partial_level: Option<EncryptionLevel>,

    messages: VecDeque<HandshakeMessage>,

    /// Sticky: once failed, all further input fails
    error: Option<ParserError>,
}

impl HandshakeMessageParser {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            partial: BytesMut::new(),
            partial_level: None,
            messages: VecDeque::new(),
            error: None,
        }
    }

    /// Parser limited to the configured handshake message size.
    pub fn with_config(config: &CryptoStreamConfig) -> Self {
        Self::new(config.max_handshake_message_size)
    }

    /// Take the oldest complete message.
    pub fn pop_message(&mut self) -> Option<HandshakeMessage> {
        self.messages.pop_front()
    }

    /// Complete messages waiting to be taken.
    pub fn pending_messages(&self) -> usize {
        self.messages.len()
    }

    pub fn error(&self) -> Option<&ParserError> {
        self.error.as_ref()
    }

    fn fail(&mut self, code: QuicErrorCode, detail: String) -> ParserError {
        let err = ParserError::new(code, detail);
        self.error = Some(err.clone());
        err
    }

    fn parse_messages(&mut self, level: EncryptionLevel) -> Result<(), ParserError> {
        while self.partial.len() >= HEADER_LEN {
            let msg_type = self.partial[0];
            if !KNOWN_MESSAGE_TYPES.contains(&msg_type) {
                return Err(self.fail(
                    QuicErrorCode::InvalidCryptoMessageType,
                    format!("Unknown handshake message type {}", msg_type),
                ));
            }

            let length = u32::from_be_bytes([0, self.partial[1], self.partial[2], self.partial[3]])
                as usize;
            if length > self.max_message_size {
                return Err(self.fail(
                    QuicErrorCode::CryptoMessageTooLong,
                    format!(
                        "Handshake message of {} bytes exceeds limit of {}",
                        length, self.max_message_size
                    ),
                ));
            }
            if self.partial.len() < HEADER_LEN + length {
                break;
            }

            self.partial.advance(HEADER_LEN);
            let body = self.partial.split_to(length).freeze();
            self.messages.push_back(HandshakeMessage {
                level,
                msg_type,
                body,
            });
        }

        if self.partial.is_empty() {
            self.partial_level = None;
        }
        Ok(())
    }
}

impl CryptoMessageParser for HandshakeMessageParser {
    fn process_input(&mut self, input: &[u8], level: EncryptionLevel) -> Result<(), ParserError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        if let Some(partial_level) = self.partial_level {
            if partial_level != level && !input.is_empty() {
                return Err(self.fail(
                    QuicErrorCode::HandshakeFailed,
                    format!(
                        "Handshake message started at {} continued at {}",
                        partial_level, level
                    ),
                ));
            }
        }

        if input.is_empty() {
            return Ok(());
        }
        self.partial.extend_from_slice(input);
        self.partial_level = Some(level);
        self.parse_messages(level)
    }

    fn input_bytes_remaining(&self) -> usize {
        self.partial.len()
    }
}

/// Build a handshake message with its 4-byte header.
pub fn encode_handshake_message(msg_type: u8, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    let len = (body.len() as u32).to_be_bytes();
    out.extend_from_slice(&[msg_type, len[1], len[2], len[3]]);
    out.extend_from_slice(body);
    out.freeze()
}
