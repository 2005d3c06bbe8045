//! Symmetric authenticated encryption for envelope payloads.
//!
//! AES-256-GCM with a 128-bit nonce drawn from the OS CSPRNG on every
//! call. A sealed blob is laid out as:
//!
//! ```text
//! nonce      [u8; 16]
//! ciphertext [u8; n]
//! tag        [u8; 16]   (appended by the AEAD primitive)
//! ```
//!
//! The codec knows nothing about command semantics and never persists
//! anything.

use std::fmt;
use std::sync::OnceLock;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::CryptoError;

/// AES-256-GCM parameterised for 16-byte nonces.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes (128 bits).
pub const NONCE_LEN: usize = 16;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

// ── EncryptionKey ────────────────────────────────────────────────

/// A 256-bit symmetric key.
///
/// Length is checked on construction, so a key that exists is always
/// usable.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Build a key from raw bytes. Anything but exactly 32 bytes is rejected.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Build a key from its standard base64 encoding.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidKeyEncoding)?;
        Self::from_slice(&bytes)
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Standard base64 encoding of the key.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

// ── TransportCodec ───────────────────────────────────────────────

/// Encrypts and decrypts opaque payloads with one fixed key.
pub struct TransportCodec {
    cipher: Aes256Gcm16,
}

impl TransportCodec {
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(key.as_bytes())),
        }
    }

    /// Seal `plaintext` under a fresh random nonce.
    ///
    /// Returns `nonce ‖ ciphertext ‖ tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::<U16>::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::SealFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Open a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails closed: a truncated blob or a tag mismatch returns an error
    /// and no plaintext at all.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Truncated(blob.len()));
        }
        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::<U16>::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

impl fmt::Debug for TransportCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCodec").finish_non_exhaustive()
    }
}

// ── CipherSlot ───────────────────────────────────────────────────

/// Holds the key for one channel.
///
/// The key is set at most once; sealing or opening before it is set
/// returns [`CryptoError::KeyNotSet`].
#[derive(Debug, Default)]
pub struct CipherSlot {
    codec: OnceLock<TransportCodec>,
}

impl CipherSlot {
    /// An empty slot (plaintext mode until a key is set).
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot that already holds `key`.
    pub fn with_key(key: &EncryptionKey) -> Self {
        let slot = Self::new();
        // A fresh slot is empty, so this cannot fail.
        let _ = slot.codec.set(TransportCodec::new(key));
        slot
    }

    /// Install the key. A second call is rejected.
    pub fn set_key(&self, key: &EncryptionKey) -> Result<(), CryptoError> {
        self.codec
            .set(TransportCodec::new(key))
            .map_err(|_| CryptoError::KeyAlreadySet)
    }

    pub fn is_key_set(&self) -> bool {
        self.codec.get().is_some()
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.codec
            .get()
            .ok_or(CryptoError::KeyNotSet)?
            .encrypt(plaintext)
    }

    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.codec.get().ok_or(CryptoError::KeyNotSet)?.decrypt(blob)
    }
}

// ── Tests ────────────────────────────────────────────────────────
