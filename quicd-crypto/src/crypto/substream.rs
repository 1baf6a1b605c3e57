//! Per-level crypto substream.

#![forbid(unsafe_code)]

use crate::stream::{StreamSendBuffer, StreamSequencer};

/// Send buffer and sequencer for one encryption level.
///
/// Created with the crypto stream and never replaced.
#[derive(Debug)]
pub struct CryptoSubstream {
    pub send_buffer: StreamSendBuffer,
    pub sequencer: StreamSequencer,
}

impl CryptoSubstream {
    pub fn new(max_buffered_bytes: u64) -> Self {
        Self {
            send_buffer: StreamSendBuffer::new(),
            sequencer: StreamSequencer::new(max_buffered_bytes),
        }
    }
}
