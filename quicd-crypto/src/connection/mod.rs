//! # Connection Interface
//!
//! The crypto stream never owns the connection. The connection owns the
//! stream and passes itself into every crypto stream operation as a
//! [`CryptoConnection`], keeping the stream sans-I/O and easy to drive from
//! tests.
//!
//! ## Encryption Level Bracketing
//!
//! The connection's send path assumes "current encryption level" describes
//! the data being sent right now. The crypto stream therefore switches the
//! level around each send and restores it afterwards. [`EncryptionLevelGuard`]
//! performs the restore on drop, so an early return or a failed send cannot
//! leave the connection at the wrong level.

#![forbid(unsafe_code)]

use core::ops::{Deref, DerefMut};

use crate::error::QuicErrorCode;
use crate::types::{
    ConsumedData, EncryptionLevel, LongHeaderType, Perspective, StreamId, StreamOffset,
};

/// Services the crypto stream needs from its connection.
pub trait CryptoConnection {
    /// Which side of the connection this is.
    fn perspective(&self) -> Perspective;

    /// Level new packets are currently sent at.
    fn encryption_level(&self) -> EncryptionLevel;

    /// Change the level new packets are sent at.
    fn set_default_encryption_level(&mut self, level: EncryptionLevel);

    /// Level of the most recently decrypted packet.
    fn last_decrypted_level(&self) -> EncryptionLevel;

    /// Long header type for the next handshake packets.
    fn set_long_header_type(&mut self, header_type: LongHeaderType);

    /// Send `data` as CRYPTO frames at `level` starting at `offset`.
    ///
    /// Returns the number of bytes accepted; fewer than `data.len()` means
    /// the connection is write blocked.
    fn send_crypto_data(
        &mut self,
        level: EncryptionLevel,
        offset: StreamOffset,
        data: &[u8],
    ) -> usize;

    /// Send `data` as STREAM frames at the current encryption level.
    fn writev_data(
        &mut self,
        stream_id: StreamId,
        offset: StreamOffset,
        data: &[u8],
        fin: bool,
    ) -> ConsumedData;

    /// Tear the connection down with `error`.
    fn close_connection_with_details(&mut self, error: QuicErrorCode, details: &str);
}

/// Restores the connection's encryption level when dropped.
pub struct EncryptionLevelGuard<'a, C: CryptoConnection + ?Sized> {
    conn: &'a mut C,
    saved: EncryptionLevel,
}

impl<'a, C: CryptoConnection + ?Sized> EncryptionLevelGuard<'a, C> {
    /// Remember the connection's current level.
    pub fn new(conn: &'a mut C) -> Self {
        let saved = conn.encryption_level();
        Self { conn, saved }
    }

    /// Remember the current level, then switch to `level`.
    pub fn switch(conn: &'a mut C, level: EncryptionLevel) -> Self {
        let mut guard = Self::new(conn);
        guard.set_level(level);
        guard
    }

    pub fn set_level(&mut self, level: EncryptionLevel) {
        self.conn.set_default_encryption_level(level);
    }

    /// Level that will be restored.
    pub fn saved_level(&self) -> EncryptionLevel {
        self.saved
    }
}

impl<C: CryptoConnection + ?Sized> Deref for EncryptionLevelGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &*self.conn
    }
}

impl<C: CryptoConnection + ?Sized> DerefMut for EncryptionLevelGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut *self.conn
    }
}

impl<C: CryptoConnection + ?Sized> Drop for EncryptionLevelGuard<'_, C> {
    fn drop(&mut self) {
        self.conn.set_default_encryption_level(self.saved);
    }
}
