//! # Logging and Counters
//!
//! Log lines go through `tracing` with structured fields. Every crypto stream
//! log carries the endpoint perspective so client and server traces can be
//! told apart when both run in one process (tests, interop runners).
//!
//! [`CryptoStreamStats`] keeps per-stream byte counters. Neutered bytes are
//! counted separately from bytes the peer actually acknowledged.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::types::{ByteCount, Perspective};

/// Log prefix for the given side of the connection.
pub fn endpoint(perspective: Perspective) -> &'static str {
    match perspective {
        Perspective::Server => "Server: ",
        Perspective::Client => "Client: ",
    }
}

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`.
///
/// Safe to call more than once: later calls leave the first subscriber in
/// place.
pub fn init_logging(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .try_init();

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
    Ok(())
}

/// Byte counters for one crypto stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CryptoStreamStats {
    /// Handshake bytes queued for sending
    pub bytes_written: ByteCount,

    /// Bytes handed to the connection for the first time
    pub bytes_sent: ByteCount,

    /// Bytes the peer acknowledged
    pub bytes_acked: ByteCount,

    /// Bytes force-acked because their level can no longer be used
    pub bytes_neutered: ByteCount,

    /// Bytes reported lost
    pub bytes_lost: ByteCount,

    /// Bytes handed to the connection again after loss
    pub bytes_retransmitted: ByteCount,

    /// Bytes delivered to the handshake message parser
    pub bytes_read: ByteCount,
}
