//! Per-session encrypted channel: P-256 ECDH key agreement, HKDF-SHA256
//! derivation, and AES-256-GCM record encryption.
//!
//! Mirrors the shape of the desktop application's `UnifiedEncryption`
//! context (an `Option` key guarded behind a lock, populated once a shared
//! secret exists) but the key agreement itself follows the project this
//! engine was extracted from: P-256, not X25519.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::RngCore;
use sha2::Sha256;
use std::sync::RwLock;

const HKDF_INFO: &[u8] = b"handshake data";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("no shared key established")]
    NoKey,
    #[error("malformed ciphertext")]
    Malformed,
    #[error("authentication failed")]
    Auth,
    #[error("invalid peer public key")]
    BadPeerKey,
}

/// Holds this side's ephemeral key pair and, once agreement completes, the
/// derived session key. A fresh instance is created per session.
pub struct CryptoContext {
    secret: EphemeralSecret,
    public: PublicKey,
    shared: RwLock<Option<[u8; 32]>>,
}

impl CryptoContext {
    pub fn generate_pair() -> Self {
        let mut rng = rand::rngs::OsRng;
        let secret = EphemeralSecret::random(&mut rng);
        let public = secret.public_key();
        Self {
            secret,
            public,
            shared: RwLock::new(None),
        }
    }

    /// This side's public key, PEM-encoded, to hand to the peer over the
    /// plaintext handshake channel.
    pub fn public_bytes(&self) -> String {
        use p256::pkcs8::EncodePublicKey;
        self.public
            .to_public_key_pem(p256::pkcs8::LineEnding::LF)
            .expect("P-256 public key always encodes to PEM")
    }

    /// Ingests the peer's PEM-encoded public key and derives the session
    /// key via ECDH + HKDF-SHA256. Idempotent: calling it again overwrites
    /// the previous key.
    pub fn accept_peer(&self, peer_pem: &str) -> Result<(), CryptoError> {
        use p256::pkcs8::DecodePublicKey;
        let peer_public =
            PublicKey::from_public_key_pem(peer_pem).map_err(|_| CryptoError::BadPeerKey)?;
        if peer_public.to_encoded_point(false).as_bytes()[0] != 0x04 {
            return Err(CryptoError::BadPeerKey);
        }
        let shared_secret = self.secret.diffie_hellman(&peer_public);
        let hk = Hkdf::<Sha256>::new(None, shared_secret.raw_secret_bytes().as_slice());
        let mut key = [0u8; 32];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|_| CryptoError::BadPeerKey)?;
        *self.shared.write().expect("lock poisoned") = Some(key);
        Ok(())
    }

    pub fn has_shared(&self) -> bool {
        self.shared.read().expect("lock poisoned").is_some()
    }

    /// Encrypts `plaintext`, returning `nonce(12) || ciphertext || tag(16)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let guard = self.shared.read().expect("lock poisoned");
        let key_bytes = guard.ok_or(CryptoError::NoKey)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Auth)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts a `nonce(12) || ciphertext || tag(16)` record.
    pub fn decrypt(&self, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if record.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed);
        }
        let guard = self.shared.read().expect("lock poisoned");
        let key_bytes = guard.ok_or(CryptoError::NoKey)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let (nonce_bytes, ciphertext) = record.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_yields_matching_keys() {
        let alice = CryptoContext::generate_pair();
        let bob = CryptoContext::generate_pair();

        alice.accept_peer(&bob.public_bytes()).unwrap();
        bob.accept_peer(&alice.public_bytes()).unwrap();

        assert!(alice.has_shared());
        assert!(bob.has_shared());
    }

    #[test]
    fn round_trip_encrypt_decrypt() {
        let alice = CryptoContext::generate_pair();
        let bob = CryptoContext::generate_pair();
        alice.accept_peer(&bob.public_bytes()).unwrap();
        bob.accept_peer(&alice.public_bytes()).unwrap();

        let record = alice.encrypt(b"hello from alice").unwrap();
        let plaintext = bob.decrypt(&record).unwrap();
        assert_eq!(plaintext, b"hello from alice");
    }

    #[test]
    fn decrypt_without_key_fails() {
        let ctx = CryptoContext::generate_pair();
        let err = ctx.decrypt(&[0u8; 32]).unwrap_err();
        assert!(matches!(err, CryptoError::NoKey));
    }

    #[test]
    fn decrypt_too_short_is_malformed() {
        let alice = CryptoContext::generate_pair();
        let bob = CryptoContext::generate_pair();
        alice.accept_peer(&bob.public_bytes()).unwrap();
        let err = alice.decrypt(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, CryptoError::Malformed));
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let alice = CryptoContext::generate_pair();
        let bob = CryptoContext::generate_pair();
        alice.accept_peer(&bob.public_bytes()).unwrap();
        bob.accept_peer(&alice.public_bytes()).unwrap();

        let mut record = alice.encrypt(b"integrity matters").unwrap();
        let last = record.len() - 1;
        record[last] ^= 0xFF;
        let err = bob.decrypt(&record).unwrap_err();
        assert!(matches!(err, CryptoError::Auth));
    }

    #[test]
    fn rejects_malformed_peer_key() {
        let ctx = CryptoContext::generate_pair();
        let err = ctx.accept_peer("not a pem key").unwrap_err();
        assert!(matches!(err, CryptoError::BadPeerKey));
    }
}
