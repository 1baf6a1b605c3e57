//! # Stream Data Buffers (RFC 9000 Section 2)
//!
//! Byte-level building blocks shared by every crypto substream:
//! - [`StreamSendBuffer`]: outbound ledger with ack/loss/retransmission state
//! - [`StreamSequencer`]: inbound reordering into a contiguous prefix

pub mod send_buffer;
pub mod sequencer;

pub use send_buffer::{StreamPendingRetransmission, StreamSendBuffer};
pub use sequencer::{StreamSequencer, DEFAULT_MAX_BUFFERED_BYTES};
