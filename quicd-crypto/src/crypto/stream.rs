//! # Crypto Stream (RFC 9001 Section 4)
//!
//! Carries handshake data for one connection across encryption levels.
//!
//! ## Framing Modes
//!
//! The negotiated version fixes one of two framing modes for the lifetime
//! of the stream (see [`CryptoFramingMode`]):
//!
//! ```text
//! Modern                                Legacy
//! ┌────────────── CryptoStream ─────┐   ┌──────── CryptoStream ────────┐
//! │ None         ZeroRtt     FS     │   │   single substream            │
//! │ ┌────────┐  ┌────────┐ ┌──────┐ │   │   ┌──────────────────────┐    │
//! │ │send buf│  │send buf│ │ ...  │ │   │   │ send buf │ sequencer │    │
//! │ │sequencr│  │sequencr│ │      │ │   │   └──────────────────────┘    │
//! │ └────────┘  └────────┘ └──────┘ │   │   bytes_consumed[level]       │
//! └─────────────────────────────────┘   └───────────────────────────────┘
//!   CRYPTO frames, tagged by level        STREAM frames on stream 1
//! ```
//!
//! In modern mode every level is an independent byte stream and all
//! bookkeeping is already partitioned. In legacy mode the only record of
//! which level a byte went out at is the per-level consumed history, and
//! retransmission rebuilds the partition from it.
//!
//! ## Connection Access
//!
//! The stream is sans-I/O: every operation that talks to the connection
//! takes it as `&mut dyn CryptoConnection`. Sends at a specific level are
//! bracketed by an [`EncryptionLevelGuard`].
//!
//! ## Failure Classes
//!
//! - Peer violations close the connection with a specific close code.
//! - Operations invoked in the wrong framing mode are local bugs: logged at
//!   error level and the connection is closed with `InternalError`.
//! - Exporting keying material too early returns an error to the caller.

#![forbid(unsafe_code)]

use bytes::{Bytes, BytesMut};

use crate::config::CryptoStreamConfig;
use crate::connection::{CryptoConnection, EncryptionLevelGuard};
use crate::crypto::framing::{crypto_message_framing_overhead, LevelRelativePolicy, LongHeaderPolicy};
use crate::crypto::keying;
use crate::crypto::parser::CryptoMessageParser;
use crate::crypto::substream::CryptoSubstream;
use crate::error::{CryptoStreamError, QuicErrorCode, Result};
use crate::interval::IntervalSet;
use crate::stream::StreamSendBuffer;
use crate::telemetry::{endpoint, CryptoStreamStats};
use crate::types::{
    ByteCount, CryptoFrame, EncryptionLevel, Perspective, StreamFrame, StreamId, StreamOffset,
    MAX_STREAM_LENGTH, NUM_ENCRYPTION_LEVELS,
};
use crate::version::{CryptoFramingMode, TransportVersion};

const WRITING_TOO_MUCH_DATA: &str = "Writing too much crypto handshake data";
const ACK_OF_UNSENT_DATA: &str = "Trying to ack unsent crypto data.";

/// Parameters fixed once the handshake is confirmed.
#[derive(Debug, Clone, Default)]
pub struct NegotiatedParameters {
    /// Secret keying material is exported from
    pub subkey_secret: Bytes,
}

/// State used only when handshake data travels on a generic stream.
#[derive(Debug)]
struct LegacyState {
    substream: CryptoSubstream,

    /// Stream ranges the connection accepted while at each level
    bytes_consumed: [IntervalSet; NUM_ENCRYPTION_LEVELS],
}

/// Handshake data stream for one connection.
pub struct CryptoStream<P> {
    perspective: Perspective,
    version: TransportVersion,

    /// Fixed at construction
    mode: CryptoFramingMode,

    /// Indexed by [`EncryptionLevel::index`]; unused in legacy mode
    substreams: [CryptoSubstream; NUM_ENCRYPTION_LEVELS],

    legacy: LegacyState,

    parser: P,
    header_policy: Box<dyn LongHeaderPolicy>,

    /// Set once by the handshake, never cleared
    negotiated: Option<NegotiatedParameters>,

    release_sequencer_on_confirm: bool,
    stats: CryptoStreamStats,
}

impl<P: CryptoMessageParser> CryptoStream<P> {
    /// Create the stream for a connection that negotiated `version`.
    ///
    /// Fails if `config.versions` does not allow the version.
    pub fn new(
        perspective: Perspective,
        version: TransportVersion,
        config: &CryptoStreamConfig,
        parser: P,
    ) -> Result<Self> {
        if !config.versions.allows(version) {
            tracing::warn!(
                version = %version,
                "{}Refusing crypto stream for disabled version",
                endpoint(perspective)
            );
            return Err(CryptoStreamError::VersionDisabled(version));
        }

        let max_buffered_bytes = config.max_buffered_bytes;
        Ok(Self {
            perspective,
            version,
            mode: CryptoFramingMode::for_version(version),
            substreams: core::array::from_fn(|_| CryptoSubstream::new(max_buffered_bytes)),
            legacy: LegacyState {
                substream: CryptoSubstream::new(max_buffered_bytes),
                bytes_consumed: core::array::from_fn(|_| IntervalSet::new()),
            },
            parser,
            header_policy: Box::new(LevelRelativePolicy),
            negotiated: None,
            release_sequencer_on_confirm: config.release_sequencer_on_confirm,
            stats: CryptoStreamStats::default(),
        })
    }

    /// Replace the long header selection.
    pub fn with_header_policy(mut self, policy: impl LongHeaderPolicy + 'static) -> Self {
        self.header_policy = Box::new(policy);
        self
    }

    // ========================================================================
    // Handshake State
    // ========================================================================

    /// Mark the handshake confirmed. Later calls are ignored.
    pub fn confirm_handshake(&mut self, params: NegotiatedParameters) {
        if self.negotiated.is_some() {
            tracing::warn!("{}Handshake confirmed more than once", endpoint(self.perspective));
            return;
        }
        self.negotiated = Some(params);
        tracing::debug!("{}Handshake confirmed", endpoint(self.perspective));

        if self.release_sequencer_on_confirm && self.parser.input_bytes_remaining() == 0 {
            for substream in self
                .substreams
                .iter_mut()
                .chain(core::iter::once(&mut self.legacy.substream))
            {
                substream.sequencer.release_buffer_if_empty();
            }
        }
    }

    pub fn handshake_confirmed(&self) -> bool {
        self.negotiated.is_some()
    }

    /// Export keying material bound to `label` and `context`.
    ///
    /// Fails until the handshake is confirmed.
    pub fn export_keying_material(
        &self,
        label: &str,
        context: &[u8],
        result_len: usize,
    ) -> Result<Vec<u8>> {
        let params = self
            .negotiated
            .as_ref()
            .ok_or(CryptoStreamError::HandshakeNotConfirmed)?;
        keying::export_keying_material(&params.subkey_secret, label, context, result_len)
    }

    // ========================================================================
    // Ingress
    // ========================================================================

    /// Handle a CRYPTO frame.
    pub fn on_crypto_frame(&mut self, conn: &mut dyn CryptoConnection, frame: &CryptoFrame<'_>) {
        if self.mode.is_legacy() {
            tracing::warn!(
                version = %self.version,
                "{}Received CRYPTO frame on a version without CRYPTO frames",
                endpoint(self.perspective)
            );
            conn.close_connection_with_details(
                QuicErrorCode::InvalidCryptoFrame,
                "CRYPTO frame received on a version that does not use CRYPTO frames",
            );
            return;
        }

        let sequencer = &mut self.substreams[frame.level.index()].sequencer;
        if let Err(err) = sequencer.on_frame(frame.offset, frame.data) {
            close_on_sequencer_error(self.perspective, conn, &err);
            return;
        }
        self.drain(conn, frame.level);
    }

    /// Handle a STREAM frame for the handshake stream.
    pub fn on_stream_frame(&mut self, conn: &mut dyn CryptoConnection, frame: &StreamFrame<'_>) {
        if self.mode.is_modern() {
            tracing::warn!(
                version = %self.version,
                stream_id = %frame.stream_id,
                "{}Received crypto data in a STREAM frame",
                endpoint(self.perspective)
            );
            conn.close_connection_with_details(
                QuicErrorCode::InvalidStreamData,
                "Unexpected stream frame",
            );
            return;
        }

        let sequencer = &mut self.legacy.substream.sequencer;
        let result = if frame.fin {
            sequencer.on_fin_frame(frame.offset, frame.data)
        } else {
            sequencer.on_frame(frame.offset, frame.data)
        };
        if let Err(err) = result {
            close_on_sequencer_error(self.perspective, conn, &err);
            return;
        }
        self.on_data_available(conn);
    }

    /// Feed readable data at the connection's last decrypted level to the
    /// parser.
    pub fn on_data_available(&mut self, conn: &mut dyn CryptoConnection) {
        let level = conn.last_decrypted_level();
        self.drain(conn, level);
    }

    fn drain(&mut self, conn: &mut dyn CryptoConnection, level: EncryptionLevel) {
        let sequencer = match self.mode {
            CryptoFramingMode::Legacy => &mut self.legacy.substream.sequencer,
            CryptoFramingMode::Modern => &mut self.substreams[level.index()].sequencer,
        };

        while let Some(region) = sequencer.readable_region() {
            let len = region.len();
            if let Err(err) = self.parser.process_input(region, level) {
                tracing::warn!(
                    encryption_level = %level,
                    error = %err,
                    "{}Handshake message rejected",
                    endpoint(self.perspective)
                );
                conn.close_connection_with_details(err.code, &err.detail);
                return;
            }
            sequencer.mark_consumed(len);
            self.stats.bytes_read += len as u64;
        }

        if self.negotiated.is_some()
            && self.release_sequencer_on_confirm
            && self.parser.input_bytes_remaining() == 0
        {
            sequencer.release_buffer_if_empty();
        }
    }

    /// Total handshake bytes delivered to the parser.
    pub fn crypto_bytes_read(&self) -> ByteCount {
        match self.mode {
            CryptoFramingMode::Legacy => self.legacy.substream.sequencer.num_bytes_consumed(),
            CryptoFramingMode::Modern => self
                .substreams
                .iter()
                .map(|s| s.sequencer.num_bytes_consumed())
                .sum(),
        }
    }

    /// Handshake bytes delivered to the parser from `level`'s substream.
    pub fn bytes_read_on_level(&self, level: EncryptionLevel) -> ByteCount {
        self.substreams[level.index()].sequencer.num_bytes_consumed()
    }

    // ========================================================================
    // Egress
    // ========================================================================

    /// Send handshake data at `level`.
    ///
    /// In legacy mode `level` is ignored: data goes out at whatever level
    /// the connection is at.
    pub fn write_crypto_data(
        &mut self,
        conn: &mut dyn CryptoConnection,
        level: EncryptionLevel,
        data: &[u8],
    ) {
        if self.mode.is_legacy() {
            self.write_or_buffer_data(conn, data);
            return;
        }
        if data.is_empty() {
            tracing::error!("{}Bug: Empty crypto data being written", endpoint(self.perspective));
            return;
        }

        let length = data.len() as u64;
        let send_buffer = &mut self.substreams[level.index()].send_buffer;
        let offset = send_buffer.stream_offset();
        if MAX_STREAM_LENGTH - offset < length {
            tracing::error!(
                encryption_level = %level,
                offset,
                length,
                "{}Bug: {}",
                endpoint(self.perspective),
                WRITING_TOO_MUCH_DATA
            );
            conn.close_connection_with_details(
                QuicErrorCode::StreamLengthOverflow,
                WRITING_TOO_MUCH_DATA,
            );
            return;
        }

        let blocked_behind_unsent = send_buffer.unsent_bytes() > 0;
        send_buffer.save_stream_data(data);
        self.stats.bytes_written += length;
        if blocked_behind_unsent {
            tracing::debug!(
                encryption_level = %level,
                length,
                "{}Buffered crypto data behind unsent data",
                endpoint(self.perspective)
            );
            return;
        }

        set_header_type(self.header_policy.as_ref(), conn, level);
        let consumed = {
            let mut guard = EncryptionLevelGuard::switch(&mut *conn, level);
            guard.send_crypto_data(level, offset, data)
        };
        send_buffer.on_stream_data_consumed(consumed);
        self.stats.bytes_sent += consumed as u64;
    }

    /// Whether any level holds data the connection has not accepted yet.
    pub fn has_buffered_crypto_frames(&self) -> bool {
        if self.mode.is_legacy() {
            tracing::error!(
                "{}Bug: Versions without CRYPTO frames do not buffer CRYPTO frames",
                endpoint(self.perspective)
            );
            return false;
        }
        self.substreams
            .iter()
            .any(|s| s.send_buffer.unsent_bytes() > 0)
    }

    /// Send data that was buffered while the connection was blocked.
    pub fn write_buffered_crypto_frames(&mut self, conn: &mut dyn CryptoConnection) {
        if self.mode.is_legacy() {
            close_on_bug(
                self.perspective,
                conn,
                "Versions without CRYPTO frames do not write CRYPTO frames",
            );
            return;
        }

        for level in EncryptionLevel::ALL {
            let send_buffer = &mut self.substreams[level.index()].send_buffer;
            let unsent = send_buffer.unsent_bytes();
            if unsent == 0 {
                continue;
            }
            let offset = send_buffer.stream_bytes_written();
            let data = match send_buffer.stream_data(offset, unsent) {
                Ok(data) => data,
                Err(err) => {
                    close_on_bug(self.perspective, conn, &err.to_string());
                    return;
                }
            };

            set_header_type(self.header_policy.as_ref(), conn, level);
            let consumed = {
                let mut guard = EncryptionLevelGuard::switch(&mut *conn, level);
                guard.send_crypto_data(level, offset, &data)
            };
            send_buffer.on_stream_data_consumed(consumed);
            self.stats.bytes_sent += consumed as u64;
            if (consumed as u64) < unsent {
                // Write blocked.
                break;
            }
        }
    }

    /// Copy `[offset, offset + length)` of `level`'s data into `writer`.
    ///
    /// Used by the packet creator when it builds CRYPTO frames itself.
    pub fn write_crypto_frame(
        &self,
        level: EncryptionLevel,
        offset: StreamOffset,
        length: ByteCount,
        writer: &mut BytesMut,
    ) -> bool {
        if self.mode.is_legacy() {
            tracing::error!(
                "{}Bug: Versions without CRYPTO frames cannot write CRYPTO frames",
                endpoint(self.perspective)
            );
            return false;
        }
        self.substreams[level.index()]
            .send_buffer
            .write_stream_data(offset, length, writer)
    }

    /// Resume writing after the connection became writable.
    pub fn on_can_write(&mut self, conn: &mut dyn CryptoConnection) {
        match self.mode {
            CryptoFramingMode::Legacy => {
                if self.has_pending_retransmission() {
                    self.write_pending_retransmission(conn);
                    if self.has_pending_retransmission() {
                        return;
                    }
                }
                self.write_buffered_data(conn);
            }
            CryptoFramingMode::Modern => {
                self.write_pending_crypto_retransmission(conn);
                if self.has_pending_crypto_retransmission() {
                    return;
                }
                self.write_buffered_crypto_frames(conn);
            }
        }
    }

    /// Packet overhead around a handshake message for this version.
    pub fn framing_overhead(&self) -> ByteCount {
        crypto_message_framing_overhead(self.version)
    }

    // ========================================================================
    // Acknowledgment, Loss and Retransmission
    // ========================================================================

    /// Handle an ack of a CRYPTO frame.
    ///
    /// Returns true if any byte was newly acknowledged.
    pub fn on_crypto_frame_acked(
        &mut self,
        conn: &mut dyn CryptoConnection,
        level: EncryptionLevel,
        offset: StreamOffset,
        length: ByteCount,
    ) -> bool {
        if self.mode.is_legacy() {
            close_on_bug(
                self.perspective,
                conn,
                "Versions without CRYPTO frames cannot ack CRYPTO frames",
            );
            return false;
        }

        let send_buffer = &mut self.substreams[level.index()].send_buffer;
        match send_buffer.on_stream_data_acked(offset, length) {
            Ok(newly_acked) => {
                self.stats.bytes_acked += newly_acked;
                newly_acked > 0
            }
            Err(err) => {
                tracing::warn!(
                    encryption_level = %level,
                    error = %err,
                    "{}Peer acked crypto data that was never sent",
                    endpoint(self.perspective)
                );
                conn.close_connection_with_details(QuicErrorCode::InternalError, ACK_OF_UNSENT_DATA);
                false
            }
        }
    }

    /// Handle loss of a CRYPTO frame.
    pub fn on_crypto_frame_lost(
        &mut self,
        conn: &mut dyn CryptoConnection,
        level: EncryptionLevel,
        offset: StreamOffset,
        length: ByteCount,
    ) {
        if self.mode.is_legacy() {
            close_on_bug(
                self.perspective,
                conn,
                "Versions without CRYPTO frames cannot lose CRYPTO frames",
            );
            return;
        }
        self.stats.bytes_lost += self.substreams[level.index()]
            .send_buffer
            .on_stream_data_lost(offset, length);
    }

    /// Whether any level has lost CRYPTO data to resend.
    pub fn has_pending_crypto_retransmission(&self) -> bool {
        if self.mode.is_legacy() {
            return false;
        }
        self.substreams
            .iter()
            .any(|s| s.send_buffer.has_pending_retransmission())
    }

    /// Resend lost CRYPTO data, levels in stage order, oldest loss first.
    ///
    /// Stops as soon as the connection accepts less than asked for.
    pub fn write_pending_crypto_retransmission(&mut self, conn: &mut dyn CryptoConnection) {
        if self.mode.is_legacy() {
            close_on_bug(
                self.perspective,
                conn,
                "Versions without CRYPTO frames cannot write CRYPTO frames",
            );
            return;
        }

        let mut guard = EncryptionLevelGuard::new(&mut *conn);
        for level in EncryptionLevel::ALL {
            let send_buffer = &mut self.substreams[level.index()].send_buffer;
            if !send_buffer.has_pending_retransmission() {
                continue;
            }
            guard.set_level(level);

            while let Some(pending) = send_buffer.next_pending_retransmission() {
                let data = match send_buffer.stream_data(pending.offset, pending.length) {
                    Ok(data) => data,
                    Err(err) => {
                        close_on_bug(self.perspective, &mut *guard, &err.to_string());
                        return;
                    }
                };
                let consumed = guard.send_crypto_data(level, pending.offset, &data) as u64;
                send_buffer.on_stream_data_retransmitted(pending.offset, consumed);
                self.stats.bytes_retransmitted += consumed;
                tracing::debug!(
                    encryption_level = %level,
                    offset = pending.offset,
                    length = pending.length,
                    consumed,
                    "{}Retransmitted crypto data",
                    endpoint(self.perspective)
                );
                if consumed < pending.length {
                    return;
                }
            }
        }
    }

    /// Resend the unacked part of a specific lost CRYPTO frame.
    ///
    /// Returns false if the connection was write blocked.
    pub fn retransmit_data(
        &mut self,
        conn: &mut dyn CryptoConnection,
        level: EncryptionLevel,
        offset: StreamOffset,
        length: ByteCount,
    ) -> bool {
        if self.mode.is_legacy() {
            close_on_bug(
                self.perspective,
                conn,
                "Versions without CRYPTO frames cannot retransmit CRYPTO frames",
            );
            return false;
        }

        let send_buffer = &mut self.substreams[level.index()].send_buffer;
        let end = offset
            .saturating_add(length)
            .min(send_buffer.stream_bytes_written());
        if offset >= end {
            return true;
        }
        let mut retransmission = IntervalSet::from_range(offset, end);
        retransmission.difference(send_buffer.bytes_acked());
        if retransmission.is_empty() {
            return true;
        }

        let mut guard = EncryptionLevelGuard::switch(&mut *conn, level);
        for range in retransmission.iter() {
            let range_length = range.end - range.start;
            let data = match send_buffer.stream_data(range.start, range_length) {
                Ok(data) => data,
                Err(err) => {
                    close_on_bug(self.perspective, &mut *guard, &err.to_string());
                    return false;
                }
            };
            let consumed = guard.send_crypto_data(level, range.start, &data) as u64;
            send_buffer.on_stream_data_retransmitted(range.start, consumed);
            self.stats.bytes_retransmitted += consumed;
            if consumed < range_length {
                return false;
            }
        }
        true
    }

    /// Whether any byte of the frame is still unacknowledged.
    pub fn is_frame_outstanding(
        &self,
        level: EncryptionLevel,
        offset: StreamOffset,
        length: ByteCount,
    ) -> bool {
        if self.mode.is_legacy() {
            return false;
        }
        self.substreams[level.index()]
            .send_buffer
            .is_stream_data_outstanding(offset, length)
    }

    /// Whether sent handshake data is still waiting for acknowledgment.
    pub fn is_waiting_for_acks(&self) -> bool {
        match self.mode {
            CryptoFramingMode::Legacy => {
                self.legacy.substream.send_buffer.stream_bytes_outstanding() > 0
            }
            CryptoFramingMode::Modern => self
                .substreams
                .iter()
                .any(|s| s.send_buffer.stream_bytes_outstanding() > 0),
        }
    }

    /// Treat all unencrypted handshake data as acknowledged.
    ///
    /// For use once the connection can never send at the unencrypted level
    /// again. Counted as neutered, not acked.
    pub fn neuter_unencrypted_stream_data(&mut self) {
        let neutered = match self.mode {
            CryptoFramingMode::Legacy => {
                let send_buffer = &mut self.legacy.substream.send_buffer;
                let mut neutered = 0;
                for range in self.legacy.bytes_consumed[EncryptionLevel::None.index()].iter() {
                    match send_buffer.on_stream_data_acked(range.start, range.end - range.start) {
                        Ok(newly_acked) => neutered += newly_acked,
                        Err(err) => tracing::error!(
                            error = %err,
                            "{}Bug: Failed to neuter unencrypted data",
                            endpoint(self.perspective)
                        ),
                    }
                }
                neutered
            }
            CryptoFramingMode::Modern => self.substreams[EncryptionLevel::None.index()]
                .send_buffer
                .neuter(),
        };
        self.stats.bytes_neutered += neutered;
        tracing::debug!(
            neutered,
            "{}Neutered unencrypted crypto data",
            endpoint(self.perspective)
        );
    }

    // ========================================================================
    // Legacy Stream Path
    // ========================================================================

    /// Buffer `data` on the handshake stream and send what the connection
    /// accepts.
    pub fn write_or_buffer_data(&mut self, conn: &mut dyn CryptoConnection, data: &[u8]) {
        if self.mode.is_modern() {
            close_on_bug(
                self.perspective,
                conn,
                "Handshake stream writes are not used with CRYPTO frames",
            );
            return;
        }
        if data.is_empty() {
            tracing::error!("{}Bug: Empty crypto data being written", endpoint(self.perspective));
            return;
        }

        let length = data.len() as u64;
        let send_buffer = &mut self.legacy.substream.send_buffer;
        if MAX_STREAM_LENGTH - send_buffer.stream_offset() < length {
            tracing::error!(
                offset = send_buffer.stream_offset(),
                length,
                "{}Bug: {}",
                endpoint(self.perspective),
                WRITING_TOO_MUCH_DATA
            );
            conn.close_connection_with_details(
                QuicErrorCode::StreamLengthOverflow,
                WRITING_TOO_MUCH_DATA,
            );
            return;
        }

        let had_buffered_data = send_buffer.unsent_bytes() > 0;
        send_buffer.save_stream_data(data);
        self.stats.bytes_written += length;
        if !had_buffered_data {
            self.write_buffered_data(conn);
        }
    }

    fn write_buffered_data(&mut self, conn: &mut dyn CryptoConnection) {
        let send_buffer = &self.legacy.substream.send_buffer;
        let unsent = send_buffer.unsent_bytes();
        if unsent == 0 {
            return;
        }
        let offset = send_buffer.stream_bytes_written();
        let data = match send_buffer.stream_data(offset, unsent) {
            Ok(data) => data,
            Err(err) => {
                close_on_bug(self.perspective, conn, &err.to_string());
                return;
            }
        };
        let consumed = conn.writev_data(StreamId::LEGACY_CRYPTO, offset, &data, false);
        self.on_stream_data_consumed(conn, consumed.bytes_consumed);
    }

    /// Record that the connection accepted `bytes_consumed` new bytes at
    /// its current encryption level.
    pub fn on_stream_data_consumed(&mut self, conn: &mut dyn CryptoConnection, bytes_consumed: usize) {
        if self.mode.is_modern() {
            close_on_bug(
                self.perspective,
                conn,
                "Stream data consumed when CRYPTO frames should be in use",
            );
            return;
        }

        let send_buffer = &mut self.legacy.substream.send_buffer;
        let consumed = (bytes_consumed as u64).min(send_buffer.unsent_bytes());
        if consumed == 0 {
            return;
        }
        let offset = send_buffer.stream_bytes_written();
        let level = conn.encryption_level();
        self.legacy.bytes_consumed[level.index()].add(offset, offset + consumed);
        send_buffer.on_stream_data_consumed(consumed as usize);
        self.stats.bytes_sent += consumed;
    }

    /// Handle an ack of a handshake stream frame.
    ///
    /// Returns true if any byte was newly acknowledged.
    pub fn on_stream_frame_acked(
        &mut self,
        conn: &mut dyn CryptoConnection,
        offset: StreamOffset,
        length: ByteCount,
    ) -> bool {
        if self.mode.is_modern() {
            close_on_bug(
                self.perspective,
                conn,
                "Handshake stream frames are not used with CRYPTO frames",
            );
            return false;
        }

        match self.legacy.substream.send_buffer.on_stream_data_acked(offset, length) {
            Ok(newly_acked) => {
                self.stats.bytes_acked += newly_acked;
                newly_acked > 0
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "{}Peer acked handshake stream data that was never sent",
                    endpoint(self.perspective)
                );
                conn.close_connection_with_details(QuicErrorCode::InternalError, ACK_OF_UNSENT_DATA);
                false
            }
        }
    }

    /// Handle loss of a handshake stream frame.
    pub fn on_stream_frame_lost(
        &mut self,
        conn: &mut dyn CryptoConnection,
        offset: StreamOffset,
        length: ByteCount,
    ) {
        if self.mode.is_modern() {
            close_on_bug(
                self.perspective,
                conn,
                "Handshake stream frames are not used with CRYPTO frames",
            );
            return;
        }
        self.stats.bytes_lost += self
            .legacy
            .substream
            .send_buffer
            .on_stream_data_lost(offset, length);
    }

    /// Whether lost handshake data is waiting to be resent, in either mode.
    pub fn has_pending_retransmission(&self) -> bool {
        match self.mode {
            CryptoFramingMode::Legacy => {
                self.legacy.substream.send_buffer.has_pending_retransmission()
            }
            CryptoFramingMode::Modern => self.has_pending_crypto_retransmission(),
        }
    }

    /// Resend lost handshake stream data, each range at the level it was
    /// first sent at.
    pub fn write_pending_retransmission(&mut self, conn: &mut dyn CryptoConnection) {
        if self.mode.is_modern() {
            close_on_bug(
                self.perspective,
                conn,
                "Handshake stream retransmission is not used with CRYPTO frames",
            );
            return;
        }

        let mut guard = EncryptionLevelGuard::new(&mut *conn);
        let send_buffer = &mut self.legacy.substream.send_buffer;
        while let Some(pending) = send_buffer.next_pending_retransmission() {
            let mut retransmission = IntervalSet::from_range(pending.offset, pending.end());
            let mut level = EncryptionLevel::None;
            for candidate in EncryptionLevel::ALL {
                let history = &self.legacy.bytes_consumed[candidate.index()];
                if retransmission.intersects(history) {
                    level = candidate;
                    retransmission.intersection(history);
                    break;
                }
            }
            let range = match retransmission.first() {
                Some(range) => range,
                None => break,
            };
            let length = range.end - range.start;

            guard.set_level(level);
            match resend_stream_range(send_buffer, &mut *guard, range.start, length) {
                Ok(consumed) => {
                    self.stats.bytes_retransmitted += consumed;
                    tracing::debug!(
                        encryption_level = %level,
                        offset = range.start,
                        length,
                        consumed,
                        "{}Retransmitted handshake stream data",
                        endpoint(self.perspective)
                    );
                    if consumed < length {
                        break;
                    }
                }
                Err(err) => {
                    close_on_bug(self.perspective, &mut *guard, &err.to_string());
                    break;
                }
            }
        }
    }

    /// Resend the unacked part of `[offset, offset + length)`, splitting it
    /// by the level each byte was first sent at.
    ///
    /// Returns false if the connection was write blocked.
    pub fn retransmit_stream_data(
        &mut self,
        conn: &mut dyn CryptoConnection,
        offset: StreamOffset,
        length: ByteCount,
    ) -> bool {
        if self.mode.is_modern() {
            close_on_bug(
                self.perspective,
                conn,
                "Handshake stream retransmission is not used with CRYPTO frames",
            );
            return false;
        }

        let send_buffer = &mut self.legacy.substream.send_buffer;
        let end = offset
            .saturating_add(length)
            .min(send_buffer.stream_bytes_written());
        if offset >= end {
            return true;
        }

        let mut guard = EncryptionLevelGuard::new(&mut *conn);
        for level in EncryptionLevel::ALL {
            let mut retransmission =
                self.legacy.bytes_consumed[level.index()].intersect_range(offset, end);
            retransmission.difference(send_buffer.bytes_acked());
            if retransmission.is_empty() {
                continue;
            }

            guard.set_level(level);
            for range in retransmission.iter() {
                let range_length = range.end - range.start;
                match resend_stream_range(send_buffer, &mut *guard, range.start, range_length) {
                    Ok(consumed) => {
                        self.stats.bytes_retransmitted += consumed;
                        if consumed < range_length {
                            return false;
                        }
                    }
                    Err(err) => {
                        close_on_bug(self.perspective, &mut *guard, &err.to_string());
                        return false;
                    }
                }
            }
        }
        true
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn perspective(&self) -> Perspective {
        self.perspective
    }

    pub fn version(&self) -> TransportVersion {
        self.version
    }

    pub fn mode(&self) -> CryptoFramingMode {
        self.mode
    }

    pub fn stats(&self) -> &CryptoStreamStats {
        &self.stats
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }

    pub fn parser_mut(&mut self) -> &mut P {
        &mut self.parser
    }

    /// Substream for `level`. Only populated in modern mode.
    pub fn substream(&self, level: EncryptionLevel) -> &CryptoSubstream {
        &self.substreams[level.index()]
    }

    /// The single substream used in legacy mode.
    pub fn legacy_substream(&self) -> &CryptoSubstream {
        &self.legacy.substream
    }

    /// Handshake stream ranges the connection accepted while at `level`.
    pub fn legacy_bytes_consumed(&self, level: EncryptionLevel) -> &IntervalSet {
        &self.legacy.bytes_consumed[level.index()]
    }

    #[cfg(test)]
    pub(crate) fn substream_mut(&mut self, level: EncryptionLevel) -> &mut CryptoSubstream {
        &mut self.substreams[level.index()]
    }

    #[cfg(test)]
    pub(crate) fn legacy_substream_mut(&mut self) -> &mut CryptoSubstream {
        &mut self.legacy.substream
    }
}

fn close_on_bug(perspective: Perspective, conn: &mut dyn CryptoConnection, detail: &str) {
    tracing::error!("{}Bug: {}", endpoint(perspective), detail);
    conn.close_connection_with_details(QuicErrorCode::InternalError, detail);
}

fn close_on_sequencer_error(
    perspective: Perspective,
    conn: &mut dyn CryptoConnection,
    err: &CryptoStreamError,
) {
    let code = match err {
        CryptoStreamError::FinalSizeMismatch { .. } => QuicErrorCode::StreamDataBeyondCloseOffset,
        _ => QuicErrorCode::CryptoBufferExceeded,
    };
    tracing::warn!(error = %err, code = %code, "{}Rejected crypto data", endpoint(perspective));
    conn.close_connection_with_details(code, &err.to_string());
}

fn set_header_type(
    policy: &dyn LongHeaderPolicy,
    conn: &mut dyn CryptoConnection,
    level: EncryptionLevel,
) {
    // By level, never by cumulative offset.
    let first_handshake_byte = level == EncryptionLevel::None;
    if let Some(header_type) = policy.long_header_type(level, first_handshake_byte) {
        conn.set_long_header_type(header_type);
    }
}

fn resend_stream_range(
    send_buffer: &mut StreamSendBuffer,
    conn: &mut dyn CryptoConnection,
    offset: StreamOffset,
    length: ByteCount,
) -> Result<ByteCount> {
    let data = send_buffer.stream_data(offset, length)?;
    let consumed = conn
        .writev_data(StreamId::LEGACY_CRYPTO, offset, &data, false)
        .bytes_consumed as u64;
    send_buffer.on_stream_data_retransmitted(offset, consumed);
    Ok(consumed)
}
