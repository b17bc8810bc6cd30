//! Live key objects
//!
//! A `CryptoKey` owns its key material and never leaves the process. Only its
//! metadata (type, algorithm, extractable, usages) is projected onto the wire.

use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::algorithm::{AlgorithmName, KeyAlgorithm, KeyFormat, KeyType, KeyUsages, NamedCurve};
use super::{CryptoError, CryptoResult};

/// Ed25519 raw key length in bytes
pub const ED25519_KEY_LEN: usize = 32;

/// Key material held by a live key
pub(crate) enum KeyMaterial {
    /// AES, HMAC and HKDF secrets
    Secret(Zeroizing<Vec<u8>>),
    EcPrivate(p256::SecretKey),
    EcPublic(p256::PublicKey),
    Ed25519Private(ed25519_dalek::SigningKey),
    Ed25519Public(ed25519_dalek::VerifyingKey),
}

impl Clone for KeyMaterial {
    fn clone(&self) -> Self {
        match self {
            KeyMaterial::Secret(bytes) => KeyMaterial::Secret(bytes.clone()),
            KeyMaterial::EcPrivate(k) => KeyMaterial::EcPrivate(k.clone()),
            KeyMaterial::EcPublic(k) => KeyMaterial::EcPublic(k.clone()),
            KeyMaterial::Ed25519Private(k) => KeyMaterial::Ed25519Private(k.clone()),
            KeyMaterial::Ed25519Public(k) => KeyMaterial::Ed25519Public(*k),
        }
    }
}

/// A provider-native key object
#[derive(Clone)]
pub struct CryptoKey {
    kind: KeyType,
    algorithm: KeyAlgorithm,
    extractable: bool,
    usages: KeyUsages,
    pub(crate) material: KeyMaterial,
}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoKey")
            .field("kind", &self.kind)
            .field("algorithm", &self.algorithm)
            .field("extractable", &self.extractable)
            .field("usages", &self.usages)
            .finish_non_exhaustive()
    }
}

/// Result of key generation: symmetric families yield one key, asymmetric
/// families a pair. The shape is decided from the algorithm up front.
#[derive(Debug, Clone)]
pub enum GeneratedKey {
    Single(CryptoKey),
    Pair { public: CryptoKey, private: CryptoKey },
}

impl CryptoKey {
    pub(crate) fn new(
        kind: KeyType,
        algorithm: KeyAlgorithm,
        extractable: bool,
        usages: KeyUsages,
        material: KeyMaterial,
    ) -> Self {
        Self {
            kind,
            algorithm,
            extractable,
            usages,
            material,
        }
    }

    pub fn kind(&self) -> KeyType {
        self.kind
    }

    pub fn algorithm(&self) -> &KeyAlgorithm {
        &self.algorithm
    }

    pub fn extractable(&self) -> bool {
        self.extractable
    }

    pub fn usages(&self) -> &KeyUsages {
        &self.usages
    }

    /// Same material under different metadata (storage getItem overrides).
    pub fn with_metadata(
        &self,
        algorithm: KeyAlgorithm,
        extractable: bool,
        usages: KeyUsages,
    ) -> CryptoResult<Self> {
        let compatible = match (&self.material, algorithm.name) {
            (KeyMaterial::Secret(_), name) => name == self.algorithm.name,
            (KeyMaterial::EcPrivate(_) | KeyMaterial::EcPublic(_), name) => {
                matches!(name, AlgorithmName::Ecdsa | AlgorithmName::Ecdh)
            }
            (KeyMaterial::Ed25519Private(_) | KeyMaterial::Ed25519Public(_), name) => {
                name == AlgorithmName::Ed25519
            }
        };
        if !compatible {
            return Err(CryptoError::InvalidParameters(format!(
                "a {} {} key cannot be used as {}",
                self.kind, self.algorithm.name, algorithm.name
            )));
        }
        Ok(Self {
            kind: self.kind,
            algorithm,
            extractable,
            usages,
            material: self.material.clone(),
        })
    }

    /// Force the extractable flag off (hardware policy).
    pub fn into_non_extractable(mut self) -> Self {
        self.extractable = false;
        self
    }

    /// Content-derived identifier: SHA-256 over the algorithm name plus the
    /// public point for asymmetric keys, or plus a domain-separated secret
    /// for symmetric keys.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.algorithm.name.to_string().as_bytes());
        hasher.update(b":");
        match &self.material {
            KeyMaterial::Secret(bytes) => {
                hasher.update(b"keyward:secret:");
                hasher.update(bytes.as_slice());
            }
            KeyMaterial::EcPrivate(k) => {
                hasher.update(k.public_key().to_encoded_point(true).as_bytes());
            }
            KeyMaterial::EcPublic(k) => {
                hasher.update(k.to_encoded_point(true).as_bytes());
            }
            KeyMaterial::Ed25519Private(k) => hasher.update(k.verifying_key().as_bytes()),
            KeyMaterial::Ed25519Public(k) => hasher.update(k.as_bytes()),
        }
        hex::encode(hasher.finalize())
    }

    /// Serialize the key material, ignoring the extractable flag.
    ///
    /// Used by storage; callers on the wire path go through
    /// `engine::export_key`, which enforces extractability.
    pub fn serialize_material(&self, format: KeyFormat) -> CryptoResult<Vec<u8>> {
        let unsupported = || {
            CryptoError::UnsupportedFormat(format!(
                "{format} for a {} {} key",
                self.kind, self.algorithm.name
            ))
        };
        match (&self.material, format) {
            (KeyMaterial::Secret(bytes), KeyFormat::Raw) => Ok(bytes.to_vec()),
            (KeyMaterial::EcPublic(k), KeyFormat::Raw) => {
                Ok(k.to_encoded_point(false).as_bytes().to_vec())
            }
            (KeyMaterial::EcPublic(k), KeyFormat::Spki) => {
                use p256::pkcs8::EncodePublicKey as _;
                k.to_public_key_der()
                    .map(|doc| doc.as_bytes().to_vec())
                    .map_err(|e| CryptoError::OperationFailed(format!("SPKI encoding failed: {e}")))
            }
            (KeyMaterial::EcPrivate(k), KeyFormat::Pkcs8) => {
                use p256::pkcs8::EncodePrivateKey as _;
                k.to_pkcs8_der()
                    .map(|doc| doc.as_bytes().to_vec())
                    .map_err(|e| {
                        CryptoError::OperationFailed(format!("PKCS#8 encoding failed: {e}"))
                    })
            }
            (KeyMaterial::Ed25519Public(k), KeyFormat::Raw) => Ok(k.to_bytes().to_vec()),
            (KeyMaterial::Ed25519Public(k), KeyFormat::Spki) => k
                .to_public_key_der()
                .map(|doc| doc.as_bytes().to_vec())
                .map_err(|e| CryptoError::OperationFailed(format!("SPKI encoding failed: {e}"))),
            (KeyMaterial::Ed25519Private(k), KeyFormat::Pkcs8) => k
                .to_pkcs8_der()
                .map(|doc| doc.as_bytes().to_vec())
                .map_err(|e| CryptoError::OperationFailed(format!("PKCS#8 encoding failed: {e}"))),
            _ => Err(unsupported()),
        }
    }

    /// Native format used when persisting this key.
    pub fn storage_format(&self) -> KeyFormat {
        match self.kind {
            KeyType::Secret => KeyFormat::Raw,
            KeyType::Public => KeyFormat::Spki,
            KeyType::Private => KeyFormat::Pkcs8,
        }
    }

    /// Parse key material in `format` for `algorithm`.
    pub fn deserialize_material(
        format: KeyFormat,
        data: &[u8],
        algorithm: &KeyAlgorithm,
        extractable: bool,
        usages: KeyUsages,
    ) -> CryptoResult<Self> {
        let invalid = |e: String| CryptoError::InvalidKeyData(e);
        let (kind, material, algorithm) = match (algorithm.name, format) {
            (AlgorithmName::AesGcm, KeyFormat::Raw) => {
                let bits = (data.len() * 8) as u32;
                if !matches!(bits, 128 | 256) {
                    return Err(invalid(format!("AES key must be 16 or 32 bytes, got {}", data.len())));
                }
                if algorithm.length.is_some_and(|len| len != bits) {
                    return Err(invalid("AES key length does not match algorithm length".into()));
                }
                (
                    KeyType::Secret,
                    KeyMaterial::Secret(Zeroizing::new(data.to_vec())),
                    KeyAlgorithm::aes_gcm(bits),
                )
            }
            (AlgorithmName::Hmac, KeyFormat::Raw) => {
                if data.is_empty() {
                    return Err(invalid("HMAC key must not be empty".into()));
                }
                let hash = algorithm
                    .hash
                    .ok_or_else(|| CryptoError::InvalidParameters("HMAC requires a hash".into()))?;
                let bits = (data.len() * 8) as u32;
                (
                    KeyType::Secret,
                    KeyMaterial::Secret(Zeroizing::new(data.to_vec())),
                    KeyAlgorithm::hmac(hash, bits),
                )
            }
            (AlgorithmName::Hkdf, KeyFormat::Raw) => {
                if extractable {
                    return Err(CryptoError::InvalidParameters(
                        "HKDF keys cannot be extractable".into(),
                    ));
                }
                (
                    KeyType::Secret,
                    KeyMaterial::Secret(Zeroizing::new(data.to_vec())),
                    KeyAlgorithm::hkdf(),
                )
            }
            (name @ (AlgorithmName::Ecdsa | AlgorithmName::Ecdh), format) => {
                if algorithm.named_curve != Some(NamedCurve::P256) {
                    return Err(CryptoError::InvalidParameters(format!(
                        "{name} import requires namedCurve P-256"
                    )));
                }
                let alg = KeyAlgorithm::ec(name, NamedCurve::P256);
                match format {
                    KeyFormat::Raw => {
                        let k = p256::PublicKey::from_sec1_bytes(data)
                            .map_err(|e| invalid(format!("invalid P-256 point: {e}")))?;
                        (KeyType::Public, KeyMaterial::EcPublic(k), alg)
                    }
                    KeyFormat::Spki => {
                        use p256::pkcs8::DecodePublicKey as _;
                        let k = p256::PublicKey::from_public_key_der(data)
                            .map_err(|e| invalid(format!("invalid SPKI: {e}")))?;
                        (KeyType::Public, KeyMaterial::EcPublic(k), alg)
                    }
                    KeyFormat::Pkcs8 => {
                        use p256::pkcs8::DecodePrivateKey as _;
                        let k = p256::SecretKey::from_pkcs8_der(data)
                            .map_err(|e| invalid(format!("invalid PKCS#8: {e}")))?;
                        (KeyType::Private, KeyMaterial::EcPrivate(k), alg)
                    }
                }
            }
            (AlgorithmName::Ed25519, KeyFormat::Raw) => {
                let bytes: [u8; ED25519_KEY_LEN] = data
                    .try_into()
                    .map_err(|_| invalid(format!("Ed25519 public key must be 32 bytes, got {}", data.len())))?;
                let k = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                    .map_err(|e| invalid(format!("invalid Ed25519 point: {e}")))?;
                (KeyType::Public, KeyMaterial::Ed25519Public(k), KeyAlgorithm::ed25519())
            }
            (AlgorithmName::Ed25519, KeyFormat::Spki) => {
                let k = ed25519_dalek::VerifyingKey::from_public_key_der(data)
                    .map_err(|e| invalid(format!("invalid SPKI: {e}")))?;
                (KeyType::Public, KeyMaterial::Ed25519Public(k), KeyAlgorithm::ed25519())
            }
            (AlgorithmName::Ed25519, KeyFormat::Pkcs8) => {
                let k = ed25519_dalek::SigningKey::from_pkcs8_der(data)
                    .map_err(|e| invalid(format!("invalid PKCS#8: {e}")))?;
                (KeyType::Private, KeyMaterial::Ed25519Private(k), KeyAlgorithm::ed25519())
            }
            (name, format) => {
                return Err(CryptoError::UnsupportedFormat(format!(
                    "{format} import for {name}"
                )))
            }
        };

        // Public keys are always extractable.
        let extractable = extractable || kind == KeyType::Public;
        Ok(Self::new(kind, algorithm, extractable, usages, material))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::algorithm::KeyUsage;

    fn aes_key(bytes: &[u8]) -> CryptoKey {
        CryptoKey::deserialize_material(
            KeyFormat::Raw,
            bytes,
            &KeyAlgorithm::aes_gcm((bytes.len() * 8) as u32),
            true,
            KeyUsages::new(vec![KeyUsage::Encrypt]),
        )
        .unwrap()
    }

    #[test]
    fn test_fingerprint_is_content_derived() {
        let a = aes_key(&[7u8; 32]);
        let b = aes_key(&[7u8; 32]);
        let c = aes_key(&[8u8; 32]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_fingerprint_separates_algorithms() {
        let aes = aes_key(&[7u8; 32]);
        let hmac = CryptoKey::deserialize_material(
            KeyFormat::Raw,
            &[7u8; 32],
            &KeyAlgorithm::hmac(crate::crypto::HashAlgorithm::Sha256, 256),
            true,
            KeyUsages::new(vec![KeyUsage::Sign]),
        )
        .unwrap();
        assert_ne!(aes.fingerprint(), hmac.fingerprint());
    }

    #[test]
    fn test_aes_import_rejects_bad_length() {
        let result = CryptoKey::deserialize_material(
            KeyFormat::Raw,
            &[0u8; 20],
            &KeyAlgorithm::aes_gcm(128),
            true,
            KeyUsages::default(),
        );
        assert!(matches!(result, Err(CryptoError::InvalidKeyData(_))));
    }

    #[test]
    fn test_with_metadata_rejects_family_change() {
        let key = aes_key(&[1u8; 16]);
        let result = key.with_metadata(
            KeyAlgorithm::hmac(crate::crypto::HashAlgorithm::Sha256, 128),
            true,
            KeyUsages::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_hides_material() {
        let key = aes_key(&[9u8; 16]);
        let debug = format!("{key:?}");
        assert!(!debug.contains("material"));
    }
}
