//! # Keying Material Exporter
//!
//! Derives application keying material from the negotiated subkey secret
//! with HKDF-SHA256 (RFC 5869). No salt is used; the HKDF info is
//!
//! ```text
//! label || 0x00 || context_length (u32, little endian) || context
//! ```
//!
//! so a label can never run into its context.

#![forbid(unsafe_code)]

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{CryptoStreamError, Result};

/// HKDF-SHA256 can expand to at most 255 hash lengths.
pub const MAX_EXPORT_LENGTH: usize = 255 * 32;

/// Export `result_len` bytes of keying material bound to `label` and
/// `context`.
pub fn export_keying_material(
    subkey_secret: &[u8],
    label: &str,
    context: &[u8],
    result_len: usize,
) -> Result<Vec<u8>> {
    if label.as_bytes().contains(&0) {
        return Err(CryptoStreamError::InvalidLabel);
    }
    let context_len =
        u32::try_from(context.len()).map_err(|_| CryptoStreamError::ContextTooLong(context.len()))?;
    if result_len > MAX_EXPORT_LENGTH {
        return Err(CryptoStreamError::KeyingMaterialTooLong(result_len));
    }

    let mut info = Vec::with_capacity(label.len() + 1 + 4 + context.len());
    info.extend_from_slice(label.as_bytes());
    info.push(0);
    info.extend_from_slice(&context_len.to_le_bytes());
    info.extend_from_slice(context);

    let hkdf = Hkdf::<Sha256>::new(None, subkey_secret);
    let mut output = vec![0u8; result_len];
    hkdf.expand(&info, &mut output)
        .map_err(|_| CryptoStreamError::KeyingMaterialTooLong(result_len))?;
    Ok(output)
}
