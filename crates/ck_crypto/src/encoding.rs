//! Transport-safe encodings.
//!
//! Every byte field that leaves this crate (keys, ciphertexts, nonces, salts)
//! is standard base64. Identities are lowercase hex.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::CryptoError;

pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn from_base64(s: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(STANDARD.decode(s)?)
}

pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn from_hex(s: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(hex::decode(s)?)
}

/// Decode a base64 field that must be exactly `N` bytes long.
pub fn from_base64_fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N], CryptoError> {
    let bytes = from_base64(s)?;
    bytes.as_slice().try_into().map_err(|_| {
        CryptoError::InvalidKey(format!("{what} must be {N} bytes, got {}", bytes.len()))
    })
}
