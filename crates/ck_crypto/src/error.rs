use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Incorrect passcode (secretbox authentication failed)")]
    IncorrectPasscode,

    #[error("Decryption failed (wrong keys or tampered data)")]
    Decryption,

    #[error("Encryption failed")]
    Encryption,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Crypto engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
