//! # Stream Sequencer (RFC 9000 Section 2.2)
//!
//! Inbound reassembly for one stream. Frames may arrive out of order or
//! overlap; the sequencer stores them and exposes only the contiguous prefix
//! starting at the consumed offset.
//!
//! ```text
//! consumed        readable prefix      gap      out-of-order
//! ────────┬────────────────────────┬─────────┬──────────────┐
//!         │ ███████████████████████│         │ ████████████ │
//! ────────┴────────────────────────┴─────────┴──────────────┘
//! ```
//!
//! Storage covers `[consumed, highest received)` and shrinks as data is
//! consumed. Once the owner knows no more data is coming, the backing
//! allocation can be released entirely.

#![forbid(unsafe_code)]

use bytes::{Buf, BytesMut};

use crate::error::{CryptoStreamError, Result};
use crate::interval::IntervalSet;
use crate::types::{ByteCount, StreamOffset, MAX_STREAM_LENGTH};

/// Default cap on how far past the consumed offset data may be buffered.
pub const DEFAULT_MAX_BUFFERED_BYTES: u64 = 64 * 1024;

/// Inbound reordering buffer exposing the contiguous readable prefix.
#[derive(Debug)]
pub struct StreamSequencer {
    /// Bytes `[consumed, consumed + buffer.len())`; gaps hold zeros
    buffer: BytesMut,

    /// Received ranges not yet consumed
    received: IntervalSet,

    /// Bytes handed to the reader
    num_bytes_consumed: StreamOffset,

    /// Largest distance past `num_bytes_consumed` data may reach
    max_buffered_bytes: u64,

    /// Offset of the FIN, if seen
    close_offset: Option<StreamOffset>,

    /// End of the furthest data ever received
    highest_received: StreamOffset,

    /// No allocation is held since the last release
    buffer_released: bool,

    /// Times the backing storage was released
    buffer_releases: u64,
}

impl Default for StreamSequencer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFERED_BYTES)
    }
}

impl StreamSequencer {
    pub fn new(max_buffered_bytes: u64) -> Self {
        Self {
            buffer: BytesMut::new(),
            received: IntervalSet::new(),
            num_bytes_consumed: 0,
            max_buffered_bytes,
            close_offset: None,
            highest_received: 0,
            buffer_released: true,
            buffer_releases: 0,
        }
    }

    /// Store `data` received at `offset`.
    ///
    /// Bytes that were already consumed are dropped. Data reaching beyond
    /// the buffering limit or past a known final size is rejected.
    pub fn on_frame(&mut self, offset: StreamOffset, data: &[u8]) -> Result<()> {
        let end = match offset.checked_add(data.len() as u64) {
            Some(end) if end <= MAX_STREAM_LENGTH => end,
            _ => {
                return Err(CryptoStreamError::BufferExceeded {
                    offset,
                    end: offset.saturating_add(data.len() as u64),
                    limit: MAX_STREAM_LENGTH,
                })
            }
        };

        if let Some(final_size) = self.close_offset {
            if end > final_size {
                return Err(CryptoStreamError::FinalSizeMismatch {
                    final_size,
                    received: end,
                });
            }
        }
        if data.is_empty() || end <= self.num_bytes_consumed {
            // Duplicate of data already delivered.
            return Ok(());
        }
        if end - self.num_bytes_consumed > self.max_buffered_bytes {
            return Err(CryptoStreamError::BufferExceeded {
                offset,
                end,
                limit: self.num_bytes_consumed + self.max_buffered_bytes,
            });
        }

        let start = offset.max(self.num_bytes_consumed);
        let skip = (start - offset) as usize;
        let rel_start = (start - self.num_bytes_consumed) as usize;
        let rel_end = (end - self.num_bytes_consumed) as usize;

        if self.buffer.len() < rel_end {
            self.buffer.resize(rel_end, 0);
        }
        self.buffer[rel_start..rel_end].copy_from_slice(&data[skip..]);
        self.received.add(start, end);
        self.highest_received = self.highest_received.max(end);
        self.buffer_released = false;
        Ok(())
    }

    /// Store a frame carrying the FIN bit.
    ///
    /// The final size may be announced once. A second FIN must agree with
    /// it, and no data may already have been received past it.
    pub fn on_fin_frame(&mut self, offset: StreamOffset, data: &[u8]) -> Result<()> {
        let final_size = offset.saturating_add(data.len() as u64);
        if let Some(known) = self.close_offset {
            if known != final_size {
                return Err(CryptoStreamError::FinalSizeMismatch {
                    final_size: known,
                    received: final_size,
                });
            }
        }
        if final_size < self.highest_received {
            return Err(CryptoStreamError::FinalSizeMismatch {
                final_size,
                received: self.highest_received,
            });
        }
        self.on_frame(offset, data)?;
        self.close_offset = Some(final_size);
        Ok(())
    }

    /// Final size announced by a FIN, if any.
    pub fn close_offset(&self) -> Option<StreamOffset> {
        self.close_offset
    }

    /// The contiguous bytes available from the consumed offset, if any.
    pub fn readable_region(&self) -> Option<&[u8]> {
        let first = self.received.first()?;
        if first.start > self.num_bytes_consumed {
            return None;
        }
        let len = (first.end - self.num_bytes_consumed) as usize;
        Some(&self.buffer[..len])
    }

    /// Number of contiguous readable bytes.
    pub fn readable_bytes(&self) -> usize {
        self.readable_region().map_or(0, <[u8]>::len)
    }

    /// Advance the consumed offset by `num_bytes` readable bytes.
    pub fn mark_consumed(&mut self, num_bytes: usize) {
        let readable = self.readable_bytes();
        debug_assert!(num_bytes <= readable, "consumed past readable data");
        let num_bytes = num_bytes.min(readable);
        if num_bytes == 0 {
            return;
        }

        self.buffer.advance(num_bytes);
        let new_consumed = self.num_bytes_consumed + num_bytes as u64;
        self.received.remove(self.num_bytes_consumed, new_consumed);
        self.num_bytes_consumed = new_consumed;
    }

    /// Free the backing allocation if nothing is buffered.
    ///
    /// Returns true if memory was released.
    pub fn release_buffer_if_empty(&mut self) -> bool {
        if !self.received.is_empty() || self.buffer_released {
            return false;
        }
        self.buffer = BytesMut::new();
        self.buffer_released = true;
        self.buffer_releases += 1;
        true
    }

    pub fn num_bytes_consumed(&self) -> StreamOffset {
        self.num_bytes_consumed
    }

    /// Received bytes not yet consumed, including out-of-order ones.
    pub fn num_bytes_buffered(&self) -> ByteCount {
        self.received.total_len()
    }

    /// Whether any received data is waiting behind a gap.
    pub fn has_out_of_order_data(&self) -> bool {
        match self.received.first() {
            Some(first) => first.start > self.num_bytes_consumed || self.received.len() > 1,
            None => false,
        }
    }

    /// True once the FIN was seen and all data up to it consumed.
    pub fn is_closed(&self) -> bool {
        self.close_offset
            .map_or(false, |close| self.num_bytes_consumed >= close)
    }

    pub fn buffer_releases(&self) -> u64 {
        self.buffer_releases
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }
}
