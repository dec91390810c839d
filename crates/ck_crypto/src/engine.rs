//! Crypto engine handle.
//!
//! A `CryptoEngine` bundles every primitive the key-management components
//! need, so that one explicitly constructed handle can be cloned into each
//! of them:
//!
//! - CSPRNG byte generation (OS RNG)
//! - Argon2id password hashing with configurable cost limits
//! - X25519 key pair generation
//! - crypto-box: X25519 key agreement + XSalsa20-Poly1305 (24-byte nonce)
//! - secretbox: XSalsa20-Poly1305 under a 32-byte key (24-byte nonce)
//!
//! Ciphertexts are `ciphertext || tag`; nonces are always carried
//! separately by the caller.
//!
//! The engine exposes an asynchronous ready signal. The first `ready()`
//! runs a one-time known-answer self test; the outcome is cached for the
//! lifetime of the handle and all its clones.

use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Symmetric key size of the secretbox primitive.
pub const KEY_SIZE: usize = 32;
/// Nonce size shared by secretbox and crypto-box.
pub const NONCE_SIZE: usize = 24;
/// Argon2id salt size.
pub const SALT_SIZE: usize = 16;
/// X25519 public / secret key size.
pub const BOX_KEY_SIZE: usize = 32;

// ── KDF limits ────────────────────────────────────────────────────────────────

/// Argon2id cost limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfLimits {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Lanes.
    pub parallelism: u32,
}

impl KdfLimits {
    /// Interactive-use limits: 64 MiB, 2 passes, 1 lane. Suitable for a
    /// foreground call, not for server-side hardening.
    pub const fn interactive() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }

    /// Custom limits, checked against Argon2's bounds.
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, CryptoError> {
        let limits = Self {
            memory_kib,
            iterations,
            parallelism,
        };
        limits.params()?;
        Ok(limits)
    }

    fn params(&self) -> Result<Params, CryptoError> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivation(format!("invalid Argon2 limits: {e}")))
    }
}

impl Default for KdfLimits {
    fn default() -> Self {
        Self::interactive()
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct EngineInner {
    limits: KdfLimits,
    ready: OnceCell<Result<(), String>>,
}

/// Shared crypto engine handle. Cheap to clone (Arc internally).
#[derive(Debug, Clone)]
pub struct CryptoEngine {
    inner: Arc<EngineInner>,
}

impl CryptoEngine {
    pub fn new(limits: KdfLimits) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                limits,
                ready: OnceCell::new(),
            }),
        }
    }

    pub fn limits(&self) -> KdfLimits {
        self.inner.limits
    }

    /// Wait for the engine to become usable. Idempotent: the self test runs
    /// once per handle and later calls return the cached outcome.
    pub async fn ready(&self) -> Result<(), CryptoError> {
        let outcome = self
            .inner
            .ready
            .get_or_init(|| async {
                let outcome = self.self_test().map_err(|e| e.to_string());
                match &outcome {
                    Ok(()) => debug!("[engine] self test passed"),
                    Err(e) => warn!("[engine] self test failed: {}", e),
                }
                outcome
            })
            .await;
        outcome.clone().map_err(CryptoError::EngineUnavailable)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner.ready.get(), Some(Ok(())))
    }

    /// `N` bytes from the OS CSPRNG.
    pub fn random_bytes<const N: usize>(&self) -> [u8; N] {
        let mut out = [0u8; N];
        OsRng.fill_bytes(&mut out);
        out
    }

    pub fn random_nonce(&self) -> [u8; NONCE_SIZE] {
        self.random_bytes()
    }

    /// Argon2id (v0x13) with this engine's limits, 32-byte output.
    pub fn derive_key(
        &self,
        passcode: &[u8],
        salt: &[u8],
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.inner.limits.params()?);
        let mut output = Zeroizing::new([0u8; KEY_SIZE]);
        argon2
            .hash_password_into(passcode, salt, output.as_mut_slice())
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(output)
    }

    /// Fresh X25519 key pair: `(secret, public)`.
    pub fn generate_box_keypair(&self) -> (Zeroizing<[u8; BOX_KEY_SIZE]>, [u8; BOX_KEY_SIZE]) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        (Zeroizing::new(secret.to_bytes()), public.to_bytes())
    }

    pub fn box_public_key(&self, secret: &[u8; BOX_KEY_SIZE]) -> [u8; BOX_KEY_SIZE] {
        let secret = StaticSecret::from(*secret);
        X25519Public::from(&secret).to_bytes()
    }

    pub fn box_seal(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
        their_public: &[u8; BOX_KEY_SIZE],
        our_secret: &[u8; BOX_KEY_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        public_box::seal(plaintext, nonce, their_public, our_secret)
    }

    pub fn box_open(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; NONCE_SIZE],
        their_public: &[u8; BOX_KEY_SIZE],
        our_secret: &[u8; BOX_KEY_SIZE],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        public_box::open(ciphertext, nonce, their_public, our_secret)
    }

    pub fn secretbox_seal(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
        key: &[u8; KEY_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        secret_box::seal(plaintext, nonce, key)
    }

    pub fn secretbox_open(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; NONCE_SIZE],
        key: &[u8; KEY_SIZE],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        secret_box::open(ciphertext, nonce, key)
    }

    fn self_test(&self) -> Result<(), CryptoError> {
        const PROBE: &[u8] = b"ck-engine-self-test";

        let key: Zeroizing<[u8; KEY_SIZE]> = Zeroizing::new(self.random_bytes());
        let nonce = self.random_nonce();
        let mut sealed = self.secretbox_seal(PROBE, &nonce, &key)?;
        if self.secretbox_open(&sealed, &nonce, &key)?.as_slice() != PROBE {
            return Err(CryptoError::EngineUnavailable("secretbox round trip mismatch".into()));
        }
        sealed[0] ^= 0x01;
        if self.secretbox_open(&sealed, &nonce, &key).is_ok() {
            return Err(CryptoError::EngineUnavailable("secretbox accepted tampered data".into()));
        }

        let (a_secret, a_public) = self.generate_box_keypair();
        let (b_secret, b_public) = self.generate_box_keypair();
        let sealed = self.box_seal(PROBE, &nonce, &b_public, &a_secret)?;
        if self.box_open(&sealed, &nonce, &a_public, &b_secret)?.as_slice() != PROBE {
            return Err(CryptoError::EngineUnavailable("crypto-box round trip mismatch".into()));
        }
        Ok(())
    }
}

impl Default for CryptoEngine {
    fn default() -> Self {
        Self::new(KdfLimits::interactive())
    }
}

// ── crypto-box (X25519 + XSalsa20-Poly1305) ───────────────────────────────────

mod public_box {
    use crypto_box::{
        aead::{Aead, Nonce},
        PublicKey, SalsaBox, SecretKey,
    };
    use zeroize::Zeroizing;

    use super::{BOX_KEY_SIZE, NONCE_SIZE};
    use crate::error::CryptoError;

    fn salsa_box(their_public: &[u8; BOX_KEY_SIZE], our_secret: &[u8; BOX_KEY_SIZE]) -> SalsaBox {
        let secret = SecretKey::from(*our_secret);
        SalsaBox::new(&PublicKey::from(*their_public), &secret)
    }

    pub(super) fn seal(
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
        their_public: &[u8; BOX_KEY_SIZE],
        our_secret: &[u8; BOX_KEY_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        salsa_box(their_public, our_secret)
            .encrypt(Nonce::<SalsaBox>::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::Encryption)
    }

    pub(super) fn open(
        ciphertext: &[u8],
        nonce: &[u8; NONCE_SIZE],
        their_public: &[u8; BOX_KEY_SIZE],
        our_secret: &[u8; BOX_KEY_SIZE],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        salsa_box(their_public, our_secret)
            .decrypt(Nonce::<SalsaBox>::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::Decryption)
    }
}

// ── secretbox (XSalsa20-Poly1305) ─────────────────────────────────────────────

mod secret_box {
    use crypto_secretbox::{
        aead::{Aead, KeyInit, Nonce},
        XSalsa20Poly1305,
    };
    use zeroize::Zeroizing;

    use super::{KEY_SIZE, NONCE_SIZE};
    use crate::error::CryptoError;

    fn cipher(key: &[u8; KEY_SIZE]) -> Result<XSalsa20Poly1305, CryptoError> {
        XSalsa20Poly1305::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKey("secretbox key must be 32 bytes".into()))
    }

    pub(super) fn seal(
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
        key: &[u8; KEY_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        cipher(key)?
            .encrypt(Nonce::<XSalsa20Poly1305>::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::Encryption)
    }

    pub(super) fn open(
        ciphertext: &[u8],
        nonce: &[u8; NONCE_SIZE],
        key: &[u8; KEY_SIZE],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        cipher(key)?
            .decrypt(Nonce::<XSalsa20Poly1305>::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::Decryption)
    }
}
