//! Dual-seal message envelope: what travels between peers.
//!
//! One plaintext is sealed twice with crypto-box, each half under its own
//! fresh random nonce:
//!
//!   for_recipient = box(plaintext, nonce_r, recipient_pk, sender_sk)
//!   for_sender    = box(plaintext, nonce_s, sender_pk,    sender_sk)
//!
//! The recipient opens `for_recipient` with (sender_pk, recipient_sk). The
//! sender reopens `for_sender` later with (sender_pk, sender_sk), so sent
//! messages stay readable without keeping plaintext around.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    encoding::{from_base64, from_base64_fixed, to_base64},
    engine::{CryptoEngine, BOX_KEY_SIZE, NONCE_SIZE},
    error::CryptoError,
    keys::decode_private_key,
};

/// One sealed copy of a message. Both fields base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedHalf {
    pub encrypted: String,
    pub nonce: String,
}

/// Wire / storage format of one chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub for_recipient: SealedHalf,
    pub for_sender: SealedHalf,
}

pub struct MessageCrypto {
    engine: CryptoEngine,
}

impl MessageCrypto {
    pub fn new(engine: CryptoEngine) -> Self {
        Self { engine }
    }

    /// Seal `plaintext` once for the recipient and once for the sender.
    pub fn encrypt_for_both(
        &self,
        plaintext: &[u8],
        recipient_public_key: &str,
        sender_public_key: &str,
        sender_private_key: &str,
    ) -> Result<MessageEnvelope, CryptoError> {
        let recipient_pk = decode_public_key(recipient_public_key)?;
        let sender_pk = decode_public_key(sender_public_key)?;
        let sender_sk = decode_private_key(sender_private_key)?;

        Ok(MessageEnvelope {
            for_recipient: self.seal_half(plaintext, &recipient_pk, &sender_sk)?,
            for_sender: self.seal_half(plaintext, &sender_pk, &sender_sk)?,
        })
    }

    /// Open one envelope half with the counterpart's public key and our own
    /// private key. Any authentication failure is `CryptoError::Decryption`.
    pub fn decrypt(
        &self,
        half: &SealedHalf,
        counterpart_public_key: &str,
        own_private_key: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let counterpart_pk = decode_public_key(counterpart_public_key)?;
        let own_sk = decode_private_key(own_private_key)?;
        let nonce: [u8; NONCE_SIZE] =
            from_base64_fixed(&half.nonce, "nonce").map_err(|_| CryptoError::Decryption)?;
        let sealed = from_base64(&half.encrypted).map_err(|_| CryptoError::Decryption)?;

        self.engine.box_open(&sealed, &nonce, &counterpart_pk, &own_sk)
    }

    fn seal_half(
        &self,
        plaintext: &[u8],
        their_public: &[u8; BOX_KEY_SIZE],
        our_secret: &[u8; BOX_KEY_SIZE],
    ) -> Result<SealedHalf, CryptoError> {
        let nonce = self.engine.random_nonce();
        let sealed = self.engine.box_seal(plaintext, &nonce, their_public, our_secret)?;
        Ok(SealedHalf {
            encrypted: to_base64(&sealed),
            nonce: to_base64(&nonce),
        })
    }
}

fn decode_public_key(public_key: &str) -> Result<[u8; BOX_KEY_SIZE], CryptoError> {
    from_base64_fixed(public_key, "public key")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{keys::KeyManagement, test_support::fast_engine, KeyPair};

    struct Fixture {
        messages: MessageCrypto,
        alice: KeyPair,
        bob: KeyPair,
    }

    fn fixture() -> Fixture {
        let engine = fast_engine();
        let keys = KeyManagement::new(engine.clone());
        Fixture {
            messages: MessageCrypto::new(engine),
            alice: keys.generate_key_pair(),
            bob: keys.generate_key_pair(),
        }
    }

    fn flip_byte(encoded: &str, index: usize) -> String {
        let mut bytes = from_base64(encoded).unwrap();
        bytes[index] ^= 0x01;
        to_base64(&bytes)
    }

    #[test]
    fn both_halves_roundtrip() {
        let f = fixture();
        for plaintext in [&b""[..], &b"hi bob"[..], &[0xFFu8; 4096][..]] {
            let env = f
                .messages
                .encrypt_for_both(plaintext, &f.bob.public_key, &f.alice.public_key, &f.alice.private_key)
                .unwrap();

            // Bob reads the recipient half.
            let read = f
                .messages
                .decrypt(&env.for_recipient, &f.alice.public_key, &f.bob.private_key)
                .unwrap();
            assert_eq!(read.as_slice(), plaintext);

            // Alice rereads her own sent copy.
            let reread = f
                .messages
                .decrypt(&env.for_sender, &f.alice.public_key, &f.alice.private_key)
                .unwrap();
            assert_eq!(reread.as_slice(), plaintext);
        }
    }

    #[test]
    fn halves_use_independent_nonces() {
        let f = fixture();
        let env = f
            .messages
            .encrypt_for_both(b"x", &f.bob.public_key, &f.alice.public_key, &f.alice.private_key)
            .unwrap();
        assert_ne!(env.for_recipient.nonce, env.for_sender.nonce);
        assert_eq!(from_base64(&env.for_sender.nonce).unwrap().len(), NONCE_SIZE);
    }

    #[test]
    fn nonces_never_repeat_across_messages() {
        let f = fixture();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let env = f
                .messages
                .encrypt_for_both(b"same", &f.bob.public_key, &f.alice.public_key, &f.alice.private_key)
                .unwrap();
            assert!(seen.insert(env.for_recipient.nonce));
            assert!(seen.insert(env.for_sender.nonce));
        }
    }

    #[test]
    fn third_party_cannot_open() {
        let f = fixture();
        let eve = KeyManagement::new(fast_engine()).generate_key_pair();
        let env = f
            .messages
            .encrypt_for_both(b"secret", &f.bob.public_key, &f.alice.public_key, &f.alice.private_key)
            .unwrap();
        assert!(matches!(
            f.messages.decrypt(&env.for_recipient, &f.alice.public_key, &eve.private_key),
            Err(CryptoError::Decryption)
        ));
        // Recipient cannot open the sender's half.
        assert!(matches!(
            f.messages.decrypt(&env.for_sender, &f.alice.public_key, &f.bob.private_key),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn tampering_is_detected() {
        let f = fixture();
        let env = f
            .messages
            .encrypt_for_both(b"tamper me", &f.bob.public_key, &f.alice.public_key, &f.alice.private_key)
            .unwrap();

        let ct_len = from_base64(&env.for_recipient.encrypted).unwrap().len();
        for i in 0..ct_len {
            let mut half = env.for_recipient.clone();
            half.encrypted = flip_byte(&half.encrypted, i);
            assert!(
                f.messages.decrypt(&half, &f.alice.public_key, &f.bob.private_key).is_err(),
                "ciphertext byte {i}"
            );
        }
        for i in 0..NONCE_SIZE {
            let mut half = env.for_recipient.clone();
            half.nonce = flip_byte(&half.nonce, i);
            assert!(
                f.messages.decrypt(&half, &f.alice.public_key, &f.bob.private_key).is_err(),
                "nonce byte {i}"
            );
        }
    }

    #[test]
    fn malformed_half_is_decryption_error() {
        let f = fixture();
        let half = SealedHalf {
            encrypted: "%%%".into(),
            nonce: to_base64(&[0u8; NONCE_SIZE]),
        };
        assert!(matches!(
            f.messages.decrypt(&half, &f.alice.public_key, &f.bob.private_key),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn envelope_wire_format_is_camel_case() {
        let f = fixture();
        let env = f
            .messages
            .encrypt_for_both(b"x", &f.bob.public_key, &f.alice.public_key, &f.alice.private_key)
            .unwrap();
        let json = serde_json::to_value(&env).unwrap();
        assert!(json["forRecipient"]["encrypted"].is_string());
        assert!(json["forSender"]["nonce"].is_string());
    }
}
