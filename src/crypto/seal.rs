//! Passphrase sealing for persisted provider storage.
//!
//! # Algorithms
//!
//! - **Key Derivation**: Argon2id (64 MB, 3 iterations, 4 lanes)
//! - **Encryption**: ChaCha20-Poly1305
//!
//! The storage key is derived once per file (one salt per file) and every
//! save seals the whole document under a fresh random nonce.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::types::{KeywardError, Result};

// =============================================================================
// Constants
// =============================================================================

/// Argon2id memory cost in KiB (64 MB)
pub const ARGON2_MEMORY_KB: u32 = 65536;

/// Argon2id iteration count
pub const ARGON2_ITERATIONS: u32 = 3;

/// Argon2id parallelism (threads)
pub const ARGON2_PARALLELISM: u32 = 4;

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Sealed envelope format version
pub const SEAL_VERSION: u32 = 1;

/// Sealed document as written to disk (JSON, base64 fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedBox {
    pub version: u32,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// A storage key bound to its salt
pub struct Sealer {
    key: Zeroizing<[u8; 32]>,
    salt: [u8; SALT_LEN],
}

impl std::fmt::Debug for Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sealer").finish_non_exhaustive()
    }
}

/// Derive a 256-bit storage key from a passphrase using Argon2id.
pub fn derive_storage_key(passphrase: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(
        ARGON2_MEMORY_KB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(32),
    )
    .map_err(|e| KeywardError::Internal(format!("Invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase, salt, key.as_mut())
        .map_err(|e| KeywardError::Internal(format!("Key derivation failed: {e}")))?;

    Ok(key)
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| KeywardError::Storage(format!("sealed {name} is not base64: {e}")))
}

impl Sealer {
    /// New sealer with a fresh random salt.
    pub fn new(passphrase: &str) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = derive_storage_key(passphrase.as_bytes(), &salt)?;
        Ok(Self { key, salt })
    }

    /// Rebuild the sealer that produced `sealed`.
    pub fn for_box(passphrase: &str, sealed: &SealedBox) -> Result<Self> {
        let salt: [u8; SALT_LEN] = decode_field("salt", &sealed.salt)?
            .try_into()
            .map_err(|_| KeywardError::Storage("sealed salt has the wrong length".into()))?;
        let key = derive_storage_key(passphrase.as_bytes(), &salt)?;
        Ok(Self { key, salt })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedBox> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.key.as_ref()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| KeywardError::Internal(format!("Encryption failed: {e}")))?;

        Ok(SealedBox {
            version: SEAL_VERSION,
            salt: BASE64.encode(self.salt),
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    pub fn open(&self, sealed: &SealedBox) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.version != SEAL_VERSION {
            return Err(KeywardError::Storage(format!(
                "unsupported sealed storage version {}",
                sealed.version
            )));
        }
        let nonce = decode_field("nonce", &sealed.nonce)?;
        if nonce.len() != NONCE_LEN {
            return Err(KeywardError::Storage("sealed nonce has the wrong length".into()));
        }
        let ciphertext = decode_field("ciphertext", &sealed.ciphertext)?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.key.as_ref()));
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| {
                KeywardError::Storage("Failed to open sealed storage (wrong passphrase?)".into())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_derivation_is_deterministic() {
        let salt = [3u8; SALT_LEN];
        let key1 = derive_storage_key(b"passphrase", &salt).unwrap();
        let key2 = derive_storage_key(b"passphrase", &salt).unwrap();
        assert_eq!(*key1, *key2);

        let key3 = derive_storage_key(b"passphrase", &[4u8; SALT_LEN]).unwrap();
        assert_ne!(*key1, *key3);
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let sealer = Sealer::new("correct horse").unwrap();
        let sealed = sealer.seal(b"{\"keys\":{}}").unwrap();

        let reopened = Sealer::for_box("correct horse", &sealed).unwrap();
        assert_eq!(reopened.open(&sealed).unwrap().as_slice(), b"{\"keys\":{}}");
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let sealed = Sealer::new("right").unwrap().seal(b"secret").unwrap();
        let wrong = Sealer::for_box("wrong", &sealed).unwrap();
        assert!(wrong.open(&sealed).is_err());
    }
}
