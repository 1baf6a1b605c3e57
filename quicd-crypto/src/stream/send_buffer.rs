//! # Stream Send Buffer (RFC 9000 Section 2.2, 13.3)
//!
//! Outbound byte ledger for one stream. Every byte moves through:
//!
//! ```text
//! saved ──consumed──▶ Outstanding ──ack──▶ Acknowledged (terminal)
//!                        │    ▲
//!                      lost  retransmitted
//!                        ▼    │
//!                   Pending retransmission
//! ```
//!
//! Bytes stay in memory until they are acknowledged; fully acked slices at
//! the front of the buffer are released.

#![forbid(unsafe_code)]

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CryptoStreamError, Result};
use crate::interval::IntervalSet;
use crate::types::{ByteCount, StreamOffset};

/// A lost range waiting to be resent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPendingRetransmission {
    pub offset: StreamOffset,
    pub length: ByteCount,
}

impl StreamPendingRetransmission {
    pub const fn new(offset: StreamOffset, length: ByteCount) -> Self {
        Self { offset, length }
    }

    pub const fn end(&self) -> StreamOffset {
        self.offset + self.length
    }
}

/// Saved data with its stream offset.
#[derive(Debug, Clone)]
struct BufferedSlice {
    offset: StreamOffset,
    data: Bytes,
}

impl BufferedSlice {
    fn end(&self) -> StreamOffset {
        self.offset + self.data.len() as u64
    }
}

/// Outbound byte ledger with ack, loss and retransmission tracking.
#[derive(Debug, Default)]
pub struct StreamSendBuffer {
    /// Saved data not yet released, ordered by offset
    slices: VecDeque<BufferedSlice>,

    /// Total bytes ever saved
    stream_offset: StreamOffset,

    /// Bytes handed to the connection at least once
    stream_bytes_written: StreamOffset,

    /// Sent bytes not yet acknowledged
    stream_bytes_outstanding: ByteCount,

    bytes_acked: IntervalSet,

    /// Membership of pending retransmissions
    pending_retransmissions: IntervalSet,

    /// Loss records in the order they were reported
    loss_order: VecDeque<(StreamOffset, StreamOffset)>,
}

impl StreamSendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data` at the current stream offset.
    pub fn save_stream_data(&mut self, data: &[u8]) {
        self.save_bytes(Bytes::copy_from_slice(data));
    }

    /// Append already-owned bytes at the current stream offset.
    pub fn save_bytes(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        let len = data.len() as u64;
        self.slices.push_back(BufferedSlice {
            offset: self.stream_offset,
            data,
        });
        self.stream_offset += len;
    }

    /// Record that the connection accepted `bytes_consumed` new bytes.
    pub fn on_stream_data_consumed(&mut self, bytes_consumed: usize) {
        let consumed = bytes_consumed as u64;
        let unsent = self.stream_offset - self.stream_bytes_written;
        debug_assert!(consumed <= unsent, "consumed more than was buffered");
        let consumed = consumed.min(unsent);
        self.stream_bytes_written += consumed;
        self.stream_bytes_outstanding += consumed;
    }

    /// Copy `[offset, offset + length)` into `writer`.
    ///
    /// Returns false if any part of the range has been released or was
    /// never saved.
    pub fn write_stream_data(
        &self,
        offset: StreamOffset,
        length: ByteCount,
        writer: &mut BytesMut,
    ) -> bool {
        let end = match offset.checked_add(length) {
            Some(end) if end <= self.stream_offset => end,
            _ => return false,
        };
        if length == 0 {
            return true;
        }
        match self.slices.front() {
            Some(front) if front.offset <= offset => {}
            _ => return false,
        }

        writer.reserve(length as usize);
        let mut cursor = offset;
        for slice in &self.slices {
            if slice.end() <= cursor {
                continue;
            }
            if slice.offset >= end {
                break;
            }
            let from = (cursor - slice.offset) as usize;
            let to = (end.min(slice.end()) - slice.offset) as usize;
            writer.put_slice(&slice.data[from..to]);
            cursor = slice.offset + to as u64;
        }
        cursor == end
    }

    /// Owned copy of `[offset, offset + length)`.
    pub fn stream_data(&self, offset: StreamOffset, length: ByteCount) -> Result<Bytes> {
        let mut writer = BytesMut::with_capacity(length as usize);
        if self.write_stream_data(offset, length, &mut writer) {
            Ok(writer.freeze())
        } else {
            Err(CryptoStreamError::RangeNotBuffered {
                offset,
                end: offset.saturating_add(length),
            })
        }
    }

    /// Mark `[offset, offset + length)` acknowledged.
    ///
    /// Returns the number of bytes that were not acknowledged before.
    /// Acknowledging bytes that were never sent is an error.
    pub fn on_stream_data_acked(
        &mut self,
        offset: StreamOffset,
        length: ByteCount,
    ) -> Result<ByteCount> {
        if length == 0 {
            return Ok(0);
        }
        let end = match offset.checked_add(length) {
            Some(end) if end <= self.stream_bytes_written => end,
            _ => {
                return Err(CryptoStreamError::AckOfUnsentData {
                    offset,
                    end: offset.saturating_add(length),
                })
            }
        };

        let mut newly_acked = IntervalSet::from_range(offset, end);
        newly_acked.difference(&self.bytes_acked);
        let newly_acked_length = newly_acked.total_len();
        if newly_acked_length == 0 {
            return Ok(0);
        }

        self.bytes_acked.add(offset, end);
        self.stream_bytes_outstanding -= newly_acked_length;
        self.pending_retransmissions.remove(offset, end);
        self.free_acked_slices();

        Ok(newly_acked_length)
    }

    /// Mark `[offset, offset + length)` lost. Acked bytes are never lost.
    ///
    /// Returns the number of bytes that became pending retransmission.
    pub fn on_stream_data_lost(&mut self, offset: StreamOffset, length: ByteCount) -> ByteCount {
        if length == 0 {
            return 0;
        }
        let end = offset.saturating_add(length).min(self.stream_bytes_written);
        if offset >= end {
            return 0;
        }

        let mut bytes_lost = IntervalSet::from_range(offset, end);
        bytes_lost.difference(&self.bytes_acked);
        bytes_lost.difference(&self.pending_retransmissions);
        if bytes_lost.is_empty() {
            return 0;
        }

        let lost_length = bytes_lost.total_len();
        for range in bytes_lost.iter() {
            self.loss_order.push_back((range.start, range.end));
        }
        self.pending_retransmissions.add_set(&bytes_lost);
        lost_length
    }

    /// Record that `[offset, offset + length)` has been resent.
    pub fn on_stream_data_retransmitted(&mut self, offset: StreamOffset, length: ByteCount) {
        if length == 0 {
            return;
        }
        self.pending_retransmissions
            .remove(offset, offset.saturating_add(length));
    }

    pub fn has_pending_retransmission(&self) -> bool {
        !self.pending_retransmissions.is_empty()
    }

    /// Next range to resend, oldest loss first.
    ///
    /// Only returns bytes that are still pending: acked or already resent
    /// sub-ranges of a loss record are skipped.
    pub fn next_pending_retransmission(&mut self) -> Option<StreamPendingRetransmission> {
        while let Some(&(start, end)) = self.loss_order.front() {
            if let Some(range) = self.pending_retransmissions.intersect_range(start, end).first() {
                return Some(StreamPendingRetransmission::new(
                    range.start,
                    range.end - range.start,
                ));
            }
            self.loss_order.pop_front();
        }
        // Loss records and pending set are kept together, so this only
        // happens when nothing is pending.
        self.pending_retransmissions
            .first()
            .map(|range| StreamPendingRetransmission::new(range.start, range.end - range.start))
    }

    /// True if any byte of the range was sent and is not yet acknowledged.
    pub fn is_stream_data_outstanding(&self, offset: StreamOffset, length: ByteCount) -> bool {
        if length == 0 {
            return false;
        }
        let end = offset.saturating_add(length).min(self.stream_bytes_written);
        if offset >= end {
            return false;
        }
        !self.bytes_acked.contains_range(offset, end)
    }

    /// Treat every saved byte as acknowledged without a peer ack.
    ///
    /// Unsent bytes are dropped from the send queue as well. Returns the
    /// number of bytes that were force-acked.
    pub fn neuter(&mut self) -> ByteCount {
        let mut to_ack = self.bytes_acked.clone();
        to_ack.complement(0, self.stream_offset);
        let neutered = to_ack.total_len();

        self.stream_bytes_written = self.stream_offset;
        self.bytes_acked.add(0, self.stream_offset);
        self.stream_bytes_outstanding = 0;
        self.pending_retransmissions.clear();
        self.loss_order.clear();
        self.free_acked_slices();
        neutered
    }

    /// Total bytes ever saved.
    pub fn stream_offset(&self) -> StreamOffset {
        self.stream_offset
    }

    /// Bytes handed to the connection at least once.
    pub fn stream_bytes_written(&self) -> StreamOffset {
        self.stream_bytes_written
    }

    /// Saved bytes never handed to the connection.
    pub fn unsent_bytes(&self) -> ByteCount {
        self.stream_offset - self.stream_bytes_written
    }

    /// Sent bytes not yet acknowledged.
    pub fn stream_bytes_outstanding(&self) -> ByteCount {
        self.stream_bytes_outstanding
    }

    pub fn bytes_acked(&self) -> &IntervalSet {
        &self.bytes_acked
    }

    pub fn pending_retransmissions(&self) -> &IntervalSet {
        &self.pending_retransmissions
    }

    /// Bytes still held in memory.
    pub fn size(&self) -> usize {
        self.slices.iter().map(|s| s.data.len()).sum()
    }

    /// Buffer whose first `offset` bytes were already sent and acked.
    #[cfg(test)]
    pub(crate) fn starting_at(offset: StreamOffset) -> Self {
        let mut buffer = Self::new();
        buffer.stream_offset = offset;
        buffer.stream_bytes_written = offset;
        buffer.bytes_acked.add(0, offset);
        buffer
    }

    fn free_acked_slices(&mut self) {
        while let Some(front) = self.slices.front() {
            if !self.bytes_acked.contains_range(front.offset, front.end()) {
                break;
            }
            self.slices.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starting_at_offset_has_nothing_outstanding() {
        let mut buffer = StreamSendBuffer::starting_at(1000);
        assert_eq!(buffer.stream_offset(), 1000);
        assert!(!buffer.is_stream_data_outstanding(0, 1000));

        buffer.save_stream_data(b"tail");
        buffer.on_stream_data_consumed(4);
        assert!(buffer.is_stream_data_outstanding(1000, 4));
        assert_eq!(buffer.stream_bytes_outstanding(), 4);
    }

    fn sent_buffer(data: &[u8]) -> StreamSendBuffer {
        let mut buffer = StreamSendBuffer::new();
        buffer.save_stream_data(data);
        buffer.on_stream_data_consumed(data.len());
        buffer
    }

    #[test]
    fn test_save_advances_stream_offset() {
        let mut buffer = StreamSendBuffer::new();
        buffer.save_stream_data(b"hello");
        buffer.save_stream_data(b"");
        buffer.save_stream_data(b" world");

        assert_eq!(buffer.stream_offset(), 11);
        assert_eq!(buffer.stream_bytes_written(), 0);
        assert_eq!(buffer.unsent_bytes(), 11);
        assert_eq!(buffer.stream_data(3, 5).unwrap().as_ref(), b"lo wo");
    }

    #[test]
    fn test_ack_reports_newly_acked_bytes() {
        let mut buffer = sent_buffer(&[0u8; 10]);
        assert_eq!(buffer.stream_bytes_outstanding(), 10);

        assert_eq!(buffer.on_stream_data_acked(0, 4).unwrap(), 4);
        assert_eq!(buffer.on_stream_data_acked(2, 6).unwrap(), 4);
        assert_eq!(buffer.on_stream_data_acked(0, 8).unwrap(), 0);
        assert_eq!(buffer.stream_bytes_outstanding(), 2);
        assert_eq!(buffer.on_stream_data_acked(8, 2).unwrap(), 2);
        assert_eq!(buffer.stream_bytes_outstanding(), 0);
        assert_eq!(buffer.size(), 0);
    }

    #[test]
    fn test_ack_of_unsent_data_fails() {
        let mut buffer = StreamSendBuffer::new();
        buffer.save_stream_data(&[0u8; 10]);
        buffer.on_stream_data_consumed(5);

        assert_eq!(
            buffer.on_stream_data_acked(0, 10),
            Err(CryptoStreamError::AckOfUnsentData { offset: 0, end: 10 })
        );
        assert!(buffer.on_stream_data_acked(u64::MAX, 2).is_err());
        assert_eq!(buffer.on_stream_data_acked(0, 5).unwrap(), 5);
    }

    #[test]
    fn test_lost_acked_bytes_are_not_retransmitted() {
        let mut buffer = sent_buffer(&[0u8; 30]);
        buffer.on_stream_data_acked(10, 10).unwrap();

        assert_eq!(buffer.on_stream_data_lost(0, 30), 20);
        assert!(buffer.has_pending_retransmission());
        assert_eq!(
            buffer.next_pending_retransmission(),
            Some(StreamPendingRetransmission::new(0, 10))
        );
        buffer.on_stream_data_retransmitted(0, 10);
        assert_eq!(
            buffer.next_pending_retransmission(),
            Some(StreamPendingRetransmission::new(20, 10))
        );
        buffer.on_stream_data_retransmitted(20, 10);
        assert!(!buffer.has_pending_retransmission());
        assert_eq!(buffer.next_pending_retransmission(), None);
    }

    #[test]
    fn test_pending_retransmissions_follow_loss_order() {
        let mut buffer = sent_buffer(&[0u8; 30]);
        buffer.on_stream_data_lost(20, 5);
        buffer.on_stream_data_lost(0, 5);

        assert_eq!(
            buffer.next_pending_retransmission(),
            Some(StreamPendingRetransmission::new(20, 5))
        );
        buffer.on_stream_data_acked(20, 5).unwrap();
        assert_eq!(
            buffer.next_pending_retransmission(),
            Some(StreamPendingRetransmission::new(0, 5))
        );
    }

    #[test]
    fn test_outstanding_never_returns_after_ack() {
        let mut buffer = sent_buffer(&[0u8; 10]);
        assert!(buffer.is_stream_data_outstanding(0, 10));

        buffer.on_stream_data_acked(0, 10).unwrap();
        buffer.on_stream_data_lost(0, 10);
        assert!(!buffer.is_stream_data_outstanding(0, 10));
        assert!(!buffer.has_pending_retransmission());
    }

    #[test]
    fn test_neuter_acks_everything() {
        let mut buffer = StreamSendBuffer::new();
        buffer.save_stream_data(&[0u8; 8]);
        buffer.on_stream_data_consumed(5);
        buffer.on_stream_data_acked(0, 2).unwrap();
        buffer.on_stream_data_lost(2, 3);

        assert_eq!(buffer.neuter(), 6);
        assert_eq!(buffer.stream_bytes_outstanding(), 0);
        assert_eq!(buffer.unsent_bytes(), 0);
        assert!(!buffer.has_pending_retransmission());
        assert!(!buffer.is_stream_data_outstanding(0, 8));
        assert_eq!(buffer.size(), 0);
    }

    #[test]
    fn test_write_stream_data_spans_slices() {
        let mut buffer = StreamSendBuffer::new();
        buffer.save_stream_data(b"abc");
        buffer.save_stream_data(b"def");
        buffer.on_stream_data_consumed(6);

        let mut writer = BytesMut::new();
        assert!(buffer.write_stream_data(1, 4, &mut writer));
        assert_eq!(&writer[..], b"bcde");

        buffer.on_stream_data_acked(0, 3).unwrap();
        let mut writer = BytesMut::new();
        assert!(!buffer.write_stream_data(0, 2, &mut writer));
        assert!(!buffer.write_stream_data(4, 10, &mut writer));
    }
}
