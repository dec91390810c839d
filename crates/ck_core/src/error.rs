use ck_crypto::CryptoError;
use ck_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Keys already exist for {identity}")]
    DuplicateKey { identity: String },

    #[error("No keys found for {identity}")]
    KeyNotFound { identity: String },

    #[error("Session for {identity} is locked")]
    SessionLocked { identity: String },

    #[error("Incorrect passcode")]
    IncorrectPasscode,

    #[error("Message decryption failed")]
    Decryption,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Crypto error during {context}: {source}")]
    Crypto {
        context: &'static str,
        #[source]
        source: CryptoError,
    },

    #[error("Storage error during {context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ManagerError {
    /// Lift a crypto error, keeping the variants callers act on distinct.
    pub(crate) fn crypto(context: &'static str) -> impl FnOnce(CryptoError) -> ManagerError {
        move |source| match source {
            CryptoError::IncorrectPasscode => ManagerError::IncorrectPasscode,
            CryptoError::Decryption => ManagerError::Decryption,
            CryptoError::KeyDerivation(msg) => ManagerError::KeyDerivation(msg),
            source => ManagerError::Crypto { context, source },
        }
    }

    /// Lift a store error; record-level outcomes become manager variants.
    pub(crate) fn storage(context: &'static str) -> impl FnOnce(StoreError) -> ManagerError {
        move |source| match source {
            StoreError::Validation(msg) => ManagerError::Validation(msg),
            StoreError::DuplicateKey { key } => ManagerError::DuplicateKey { identity: key },
            StoreError::NotFound { key } => ManagerError::KeyNotFound { identity: key },
            source => ManagerError::Storage { context, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_outcomes_map_to_manager_variants() {
        let err = ManagerError::storage("save")(StoreError::DuplicateKey { key: "abc".into() });
        assert!(matches!(err, ManagerError::DuplicateKey { ref identity } if identity == "abc"));

        let err = ManagerError::storage("update")(StoreError::NotFound { key: "abc".into() });
        assert!(matches!(err, ManagerError::KeyNotFound { .. }));

        let err = ManagerError::storage("get")(StoreError::Closed);
        assert!(matches!(err, ManagerError::Storage { context: "get", .. }));
    }

    #[test]
    fn crypto_outcomes_map_to_manager_variants() {
        assert!(matches!(
            ManagerError::crypto("unlock")(CryptoError::IncorrectPasscode),
            ManagerError::IncorrectPasscode
        ));
        assert!(matches!(
            ManagerError::crypto("decrypt")(CryptoError::Decryption),
            ManagerError::Decryption
        ));
        let err = ManagerError::crypto("encrypt")(CryptoError::InvalidKey("short".into()));
        assert!(err.to_string().contains("encrypt"));
    }
}
