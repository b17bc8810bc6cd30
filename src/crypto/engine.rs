//! Software crypto engine
//!
//! Stateless operations over live keys. Every operation checks the key's
//! usages and extractability itself.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use ed25519_dalek::{Signer as _, Verifier as _};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use super::algorithm::{
    pair_usages, AesGcmParams, AlgorithmName, DeriveParams, HashAlgorithm, KeyAlgorithm,
    KeyFormat, KeyType, KeyUsage, KeyUsages,
};
use super::key::{CryptoKey, GeneratedKey, KeyMaterial};
use super::{CryptoError, CryptoResult};

/// AES-GCM nonce length in bytes
pub const AES_GCM_IV_LEN: usize = 12;

/// AES-GCM authentication tag length in bits
pub const AES_GCM_TAG_BITS: u32 = 128;

fn require_usage(key: &CryptoKey, usage: KeyUsage) -> CryptoResult<()> {
    if key.usages().contains(usage) {
        Ok(())
    } else {
        Err(CryptoError::InvalidParameters(format!(
            "key does not permit '{usage}'"
        )))
    }
}

fn secret_bytes(key: &CryptoKey) -> CryptoResult<&[u8]> {
    match &key.material {
        KeyMaterial::Secret(bytes) => Ok(bytes.as_slice()),
        _ => Err(CryptoError::InvalidParameters(format!(
            "expected a secret key, got a {} key",
            key.kind()
        ))),
    }
}

// =============================================================================
// Key generation
// =============================================================================

/// Generate a key or key pair.
///
/// Asymmetric families always produce a pair; usages are split between the
/// halves and the public half is always extractable.
pub fn generate_key(
    algorithm: &KeyAlgorithm,
    extractable: bool,
    usages: KeyUsages,
) -> CryptoResult<GeneratedKey> {
    if algorithm.name.is_asymmetric() {
        if !usages.is_subset_of(&pair_usages(algorithm.name)) {
            return Err(CryptoError::InvalidParameters(format!(
                "invalid usages for {} key pair",
                algorithm.name
            )));
        }
        let private_usages = usages.intersect(algorithm.name.permitted_usages(KeyType::Private));
        let public_usages = usages.intersect(algorithm.name.permitted_usages(KeyType::Public));
        if private_usages.is_empty() {
            return Err(CryptoError::InvalidParameters(format!(
                "{} private key needs at least one usage",
                algorithm.name
            )));
        }

        let (private_material, public_material) = match algorithm.name {
            AlgorithmName::Ecdsa | AlgorithmName::Ecdh => {
                let secret = p256::SecretKey::random(&mut OsRng);
                let public = secret.public_key();
                (KeyMaterial::EcPrivate(secret), KeyMaterial::EcPublic(public))
            }
            AlgorithmName::Ed25519 => {
                let signing = ed25519_dalek::SigningKey::generate(&mut OsRng);
                let verifying = signing.verifying_key();
                (
                    KeyMaterial::Ed25519Private(signing),
                    KeyMaterial::Ed25519Public(verifying),
                )
            }
            other => return Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        };

        return Ok(GeneratedKey::Pair {
            public: CryptoKey::new(
                KeyType::Public,
                algorithm.clone(),
                true,
                public_usages,
                public_material,
            ),
            private: CryptoKey::new(
                KeyType::Private,
                algorithm.clone(),
                extractable,
                private_usages,
                private_material,
            ),
        });
    }

    super::validate_usages(algorithm.name, KeyType::Secret, &usages)?;
    let bits = match algorithm.name {
        AlgorithmName::AesGcm | AlgorithmName::Hmac => algorithm.length.ok_or_else(|| {
            CryptoError::InvalidParameters(format!("{} requires a length", algorithm.name))
        })?,
        AlgorithmName::Hkdf => {
            return Err(CryptoError::InvalidParameters(
                "HKDF keys are imported, not generated".into(),
            ))
        }
        other => return Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
    };

    let mut bytes = Zeroizing::new(vec![0u8; (bits as usize).div_ceil(8)]);
    OsRng.fill_bytes(bytes.as_mut_slice());
    Ok(GeneratedKey::Single(CryptoKey::new(
        KeyType::Secret,
        algorithm.clone(),
        extractable,
        usages,
        KeyMaterial::Secret(bytes),
    )))
}

// =============================================================================
// Import / export
// =============================================================================

/// Import key material.
pub fn import_key(
    format: KeyFormat,
    data: &[u8],
    algorithm: &KeyAlgorithm,
    extractable: bool,
    usages: KeyUsages,
) -> CryptoResult<CryptoKey> {
    let key = CryptoKey::deserialize_material(format, data, algorithm, extractable, usages)?;
    super::validate_usages(key.algorithm().name, key.kind(), key.usages())?;
    Ok(key)
}

/// Export key material. Private and secret keys must be extractable.
pub fn export_key(format: KeyFormat, key: &CryptoKey) -> CryptoResult<Vec<u8>> {
    if !key.extractable() && key.kind() != KeyType::Public {
        return Err(CryptoError::NotExtractable);
    }
    key.serialize_material(format)
}

// =============================================================================
// Encryption
// =============================================================================

fn check_gcm_params(params: &AesGcmParams) -> CryptoResult<()> {
    if params.iv.len() != AES_GCM_IV_LEN {
        return Err(CryptoError::InvalidParameters(format!(
            "AES-GCM iv must be {AES_GCM_IV_LEN} bytes, got {}",
            params.iv.len()
        )));
    }
    if params.tag_length != AES_GCM_TAG_BITS {
        return Err(CryptoError::InvalidParameters(format!(
            "AES-GCM tagLength {} is not supported",
            params.tag_length
        )));
    }
    Ok(())
}

fn aes_gcm(
    key: &CryptoKey,
    params: &AesGcmParams,
    data: &[u8],
    encrypt: bool,
) -> CryptoResult<Vec<u8>> {
    if key.algorithm().name != AlgorithmName::AesGcm {
        return Err(CryptoError::InvalidParameters(format!(
            "AES-GCM operation with a {} key",
            key.algorithm().name
        )));
    }
    check_gcm_params(params)?;
    let raw = secret_bytes(key)?;
    let nonce = Nonce::from_slice(&params.iv);
    let payload = Payload {
        msg: data,
        aad: &params.additional_data,
    };

    let result = match raw.len() {
        16 => {
            let cipher = Aes128Gcm::new_from_slice(raw)
                .map_err(|e| CryptoError::InvalidKeyData(e.to_string()))?;
            if encrypt {
                cipher.encrypt(nonce, payload)
            } else {
                cipher.decrypt(nonce, payload)
            }
        }
        32 => {
            let cipher = Aes256Gcm::new_from_slice(raw)
                .map_err(|e| CryptoError::InvalidKeyData(e.to_string()))?;
            if encrypt {
                cipher.encrypt(nonce, payload)
            } else {
                cipher.decrypt(nonce, payload)
            }
        }
        other => {
            return Err(CryptoError::InvalidKeyData(format!(
                "unsupported AES key size {other}"
            )))
        }
    };

    result.map_err(|_| {
        if encrypt {
            CryptoError::OperationFailed("AES-GCM encryption failed".into())
        } else {
            CryptoError::OperationFailed("AES-GCM decryption failed (integrity check)".into())
        }
    })
}

pub fn encrypt(params: &AesGcmParams, key: &CryptoKey, data: &[u8]) -> CryptoResult<Vec<u8>> {
    require_usage(key, KeyUsage::Encrypt)?;
    aes_gcm(key, params, data, true)
}

pub fn decrypt(params: &AesGcmParams, key: &CryptoKey, data: &[u8]) -> CryptoResult<Vec<u8>> {
    require_usage(key, KeyUsage::Decrypt)?;
    aes_gcm(key, params, data, false)
}

// =============================================================================
// Signatures
// =============================================================================

fn hmac_tag(hash: HashAlgorithm, key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
    macro_rules! tag {
        ($digest:ty) => {{
            let mut mac = <Hmac<$digest> as Mac>::new_from_slice(key)
                .map_err(|e| CryptoError::InvalidKeyData(e.to_string()))?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }};
    }
    Ok(match hash {
        HashAlgorithm::Sha1 => tag!(Sha1),
        HashAlgorithm::Sha256 => tag!(Sha256),
        HashAlgorithm::Sha384 => tag!(Sha384),
        HashAlgorithm::Sha512 => tag!(Sha512),
    })
}

fn hmac_verify(hash: HashAlgorithm, key: &[u8], data: &[u8], signature: &[u8]) -> CryptoResult<bool> {
    macro_rules! verify {
        ($digest:ty) => {{
            let mut mac = <Hmac<$digest> as Mac>::new_from_slice(key)
                .map_err(|e| CryptoError::InvalidKeyData(e.to_string()))?;
            mac.update(data);
            mac.verify_slice(signature).is_ok()
        }};
    }
    Ok(match hash {
        HashAlgorithm::Sha1 => verify!(Sha1),
        HashAlgorithm::Sha256 => verify!(Sha256),
        HashAlgorithm::Sha384 => verify!(Sha384),
        HashAlgorithm::Sha512 => verify!(Sha512),
    })
}

/// ECDSA on P-256 is only paired with SHA-256.
fn check_ecdsa_hash(hash: Option<HashAlgorithm>) -> CryptoResult<()> {
    match hash {
        Some(HashAlgorithm::Sha256) => Ok(()),
        Some(other) => Err(CryptoError::UnsupportedAlgorithm(format!(
            "ECDSA P-256 with {other}"
        ))),
        None => Err(CryptoError::InvalidParameters("ECDSA requires a hash".into())),
    }
}

/// Sign `data`. `hash` is the signature hash (ECDSA only).
pub fn sign(
    algorithm: AlgorithmName,
    hash: Option<HashAlgorithm>,
    key: &CryptoKey,
    data: &[u8],
) -> CryptoResult<Vec<u8>> {
    if key.algorithm().name != algorithm {
        return Err(CryptoError::InvalidParameters(format!(
            "{algorithm} signature with a {} key",
            key.algorithm().name
        )));
    }
    require_usage(key, KeyUsage::Sign)?;
    match (&key.material, algorithm) {
        (KeyMaterial::Secret(raw), AlgorithmName::Hmac) => {
            let hash = key
                .algorithm()
                .hash
                .ok_or_else(|| CryptoError::InvalidKeyData("HMAC key without hash".into()))?;
            hmac_tag(hash, raw, data)
        }
        (KeyMaterial::EcPrivate(secret), AlgorithmName::Ecdsa) => {
            check_ecdsa_hash(hash)?;
            let signing = p256::ecdsa::SigningKey::from(secret);
            let signature: p256::ecdsa::Signature = signing.sign(data);
            Ok(signature.to_bytes().to_vec())
        }
        (KeyMaterial::Ed25519Private(signing), AlgorithmName::Ed25519) => {
            Ok(signing.sign(data).to_bytes().to_vec())
        }
        _ => Err(CryptoError::InvalidParameters(format!(
            "cannot sign with a {} {} key",
            key.kind(),
            algorithm
        ))),
    }
}

/// Verify `signature` over `data`. Malformed signatures verify as `false`.
pub fn verify(
    algorithm: AlgorithmName,
    hash: Option<HashAlgorithm>,
    key: &CryptoKey,
    signature: &[u8],
    data: &[u8],
) -> CryptoResult<bool> {
    if key.algorithm().name != algorithm {
        return Err(CryptoError::InvalidParameters(format!(
            "{algorithm} verification with a {} key",
            key.algorithm().name
        )));
    }
    require_usage(key, KeyUsage::Verify)?;
    match (&key.material, algorithm) {
        (KeyMaterial::Secret(raw), AlgorithmName::Hmac) => {
            let hash = key
                .algorithm()
                .hash
                .ok_or_else(|| CryptoError::InvalidKeyData("HMAC key without hash".into()))?;
            hmac_verify(hash, raw, data, signature)
        }
        (KeyMaterial::EcPublic(public), AlgorithmName::Ecdsa) => {
            check_ecdsa_hash(hash)?;
            let Ok(signature) = p256::ecdsa::Signature::from_slice(signature) else {
                return Ok(false);
            };
            let verifying = p256::ecdsa::VerifyingKey::from(public);
            Ok(verifying.verify(data, &signature).is_ok())
        }
        (KeyMaterial::Ed25519Public(verifying), AlgorithmName::Ed25519) => {
            let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
                return Ok(false);
            };
            Ok(verifying.verify(data, &signature).is_ok())
        }
        _ => Err(CryptoError::InvalidParameters(format!(
            "cannot verify with a {} {} key",
            key.kind(),
            algorithm
        ))),
    }
}

// =============================================================================
// Derivation
// =============================================================================

/// Derive `length` bits from `base`. ECDH yields the full shared secret when
/// `length` is `None`; HKDF requires a length.
pub fn derive_bits(
    params: &DeriveParams,
    base: &CryptoKey,
    length: Option<u32>,
) -> CryptoResult<Vec<u8>> {
    require_usage(base, KeyUsage::DeriveBits)?;
    derive_raw(params, base, length)
}

fn derive_raw(params: &DeriveParams, base: &CryptoKey, length: Option<u32>) -> CryptoResult<Vec<u8>> {
    if base.algorithm().name != params.algorithm() {
        return Err(CryptoError::InvalidParameters(format!(
            "{} derivation with a {} key",
            params.algorithm(),
            base.algorithm().name
        )));
    }
    if let Some(bits) = length {
        if bits % 8 != 0 {
            return Err(CryptoError::InvalidParameters(format!(
                "derived length must be a multiple of 8, got {bits}"
            )));
        }
    }

    match (params, &base.material) {
        (DeriveParams::Ecdh { public }, KeyMaterial::EcPrivate(secret)) => {
            let KeyMaterial::EcPublic(peer) = &public.material else {
                return Err(CryptoError::InvalidParameters(
                    "ECDH 'public' must be a P-256 public key".into(),
                ));
            };
            if public.algorithm().name != AlgorithmName::Ecdh {
                return Err(CryptoError::InvalidParameters(
                    "ECDH 'public' must be an ECDH key".into(),
                ));
            }
            let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
            let raw = shared.raw_secret_bytes();
            let bytes = match length {
                None => raw.len(),
                Some(bits) => (bits / 8) as usize,
            };
            if bytes > raw.len() {
                return Err(CryptoError::OperationFailed(format!(
                    "ECDH can derive at most {} bits",
                    raw.len() * 8
                )));
            }
            Ok(raw[..bytes].to_vec())
        }
        (DeriveParams::Hkdf { hash, salt, info }, KeyMaterial::Secret(ikm)) => {
            let bits = length.ok_or_else(|| {
                CryptoError::InvalidParameters("HKDF deriveBits requires a length".into())
            })?;
            let max_bits = 255 * hash.output_len() * 8;
            if bits as usize > max_bits {
                return Err(CryptoError::InvalidParameters(format!(
                    "HKDF with {hash} can derive at most {max_bits} bits, got {bits}"
                )));
            }
            let mut okm = vec![0u8; (bits / 8) as usize];
            let expanded = match hash {
                HashAlgorithm::Sha256 => Hkdf::<Sha256>::new(Some(salt), ikm).expand(info, &mut okm),
                HashAlgorithm::Sha384 => Hkdf::<Sha384>::new(Some(salt), ikm).expand(info, &mut okm),
                HashAlgorithm::Sha512 => Hkdf::<Sha512>::new(Some(salt), ikm).expand(info, &mut okm),
                HashAlgorithm::Sha1 => Hkdf::<Sha1>::new(Some(salt), ikm).expand(info, &mut okm),
            };
            expanded.map_err(|_| {
                CryptoError::OperationFailed(format!("HKDF cannot produce {bits} bits"))
            })?;
            Ok(okm)
        }
        _ => Err(CryptoError::InvalidParameters(format!(
            "cannot derive from a {} {} key",
            base.kind(),
            base.algorithm().name
        ))),
    }
}

/// Derive a new secret key of type `derived`.
pub fn derive_key(
    params: &DeriveParams,
    base: &CryptoKey,
    derived: &KeyAlgorithm,
    extractable: bool,
    usages: KeyUsages,
) -> CryptoResult<CryptoKey> {
    require_usage(base, KeyUsage::DeriveKey)?;
    let bits = match derived.name {
        AlgorithmName::AesGcm | AlgorithmName::Hmac => derived.length.ok_or_else(|| {
            CryptoError::InvalidParameters(format!("{} requires a length", derived.name))
        })?,
        other => {
            return Err(CryptoError::UnsupportedAlgorithm(format!(
                "cannot derive a {other} key"
            )))
        }
    };
    let raw = Zeroizing::new(derive_raw(params, base, Some(bits))?);
    import_key(KeyFormat::Raw, &raw, derived, extractable, usages)
}

// =============================================================================
// Wrapping
// =============================================================================

/// Export `key` in `format` and encrypt it under `wrapping` with AES-GCM.
pub fn wrap_key(
    format: KeyFormat,
    key: &CryptoKey,
    wrapping: &CryptoKey,
    params: &AesGcmParams,
) -> CryptoResult<Vec<u8>> {
    require_usage(wrapping, KeyUsage::WrapKey)?;
    let exported = Zeroizing::new(export_key(format, key)?);
    aes_gcm(wrapping, params, &exported, true)
}

/// Decrypt `wrapped` under `unwrapping` and import the result.
#[allow(clippy::too_many_arguments)]
pub fn unwrap_key(
    format: KeyFormat,
    wrapped: &[u8],
    unwrapping: &CryptoKey,
    params: &AesGcmParams,
    algorithm: &KeyAlgorithm,
    extractable: bool,
    usages: KeyUsages,
) -> CryptoResult<CryptoKey> {
    require_usage(unwrapping, KeyUsage::UnwrapKey)?;
    let raw = Zeroizing::new(aes_gcm(unwrapping, params, wrapped, false)?);
    import_key(format, &raw, algorithm, extractable, usages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NamedCurve;
    use std::sync::Arc;

    fn usages(list: &[KeyUsage]) -> KeyUsages {
        KeyUsages::new(list.to_vec())
    }

    fn gcm(iv: u8) -> AesGcmParams {
        AesGcmParams {
            iv: vec![iv; AES_GCM_IV_LEN],
            additional_data: Vec::new(),
            tag_length: AES_GCM_TAG_BITS,
        }
    }

    fn single(generated: GeneratedKey) -> CryptoKey {
        match generated {
            GeneratedKey::Single(key) => key,
            GeneratedKey::Pair { .. } => panic!("expected a single key"),
        }
    }

    fn pair(generated: GeneratedKey) -> (CryptoKey, CryptoKey) {
        match generated {
            GeneratedKey::Pair { public, private } => (public, private),
            GeneratedKey::Single(_) => panic!("expected a key pair"),
        }
    }

    #[test]
    fn test_aes_gcm_roundtrip() {
        let key = single(
            generate_key(
                &KeyAlgorithm::aes_gcm(256),
                true,
                usages(&[KeyUsage::Encrypt, KeyUsage::Decrypt]),
            )
            .unwrap(),
        );
        let ciphertext = encrypt(&gcm(1), &key, b"hello").unwrap();
        assert_eq!(ciphertext.len(), 5 + 16);
        assert_eq!(decrypt(&gcm(1), &key, &ciphertext).unwrap(), b"hello");
    }

    #[test]
    fn test_aes_gcm_detects_tampering() {
        let key = single(
            generate_key(
                &KeyAlgorithm::aes_gcm(128),
                false,
                usages(&[KeyUsage::Encrypt, KeyUsage::Decrypt]),
            )
            .unwrap(),
        );
        let mut ciphertext = encrypt(&gcm(2), &key, b"payload").unwrap();
        ciphertext[0] ^= 0xff;
        assert!(matches!(
            decrypt(&gcm(2), &key, &ciphertext),
            Err(CryptoError::OperationFailed(_))
        ));
    }

    #[test]
    fn test_encrypt_requires_usage() {
        let key = single(
            generate_key(&KeyAlgorithm::aes_gcm(128), true, usages(&[KeyUsage::Decrypt])).unwrap(),
        );
        assert!(encrypt(&gcm(0), &key, b"x").is_err());
    }

    #[test]
    fn test_hmac_sign_verify() {
        let key = single(
            generate_key(
                &KeyAlgorithm::hmac(HashAlgorithm::Sha256, 512),
                false,
                usages(&[KeyUsage::Sign, KeyUsage::Verify]),
            )
            .unwrap(),
        );
        let tag = sign(AlgorithmName::Hmac, None, &key, b"data").unwrap();
        assert_eq!(tag.len(), 32);
        assert!(verify(AlgorithmName::Hmac, None, &key, &tag, b"data").unwrap());
        assert!(!verify(AlgorithmName::Hmac, None, &key, &tag, b"other").unwrap());
    }

    #[test]
    fn test_ecdsa_pair_and_sign_verify() {
        let (public, private) = pair(
            generate_key(
                &KeyAlgorithm::ec(AlgorithmName::Ecdsa, NamedCurve::P256),
                false,
                usages(&[KeyUsage::Sign, KeyUsage::Verify]),
            )
            .unwrap(),
        );
        assert!(public.extractable());
        assert!(!private.extractable());
        assert!(private.usages().contains(KeyUsage::Sign));
        assert!(!private.usages().contains(KeyUsage::Verify));

        let signature = sign(AlgorithmName::Ecdsa, Some(HashAlgorithm::Sha256), &private, b"msg").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify(AlgorithmName::Ecdsa, Some(HashAlgorithm::Sha256), &public, &signature, b"msg").unwrap());
        assert!(!verify(AlgorithmName::Ecdsa, Some(HashAlgorithm::Sha256), &public, &[0u8; 3], b"msg").unwrap());
    }

    #[test]
    fn test_ed25519_sign_verify() {
        let (public, private) = pair(
            generate_key(
                &KeyAlgorithm::ed25519(),
                true,
                usages(&[KeyUsage::Sign, KeyUsage::Verify]),
            )
            .unwrap(),
        );
        let signature = sign(AlgorithmName::Ed25519, None, &private, b"msg").unwrap();
        assert!(verify(AlgorithmName::Ed25519, None, &public, &signature, b"msg").unwrap());
    }

    #[test]
    fn test_export_requires_extractable() {
        let key = single(
            generate_key(&KeyAlgorithm::aes_gcm(128), false, usages(&[KeyUsage::Encrypt])).unwrap(),
        );
        assert_eq!(export_key(KeyFormat::Raw, &key), Err(CryptoError::NotExtractable));
    }

    #[test]
    fn test_pkcs8_roundtrip_keeps_metadata() {
        let alg = KeyAlgorithm::ec(AlgorithmName::Ecdsa, NamedCurve::P256);
        let (_, private) = pair(generate_key(&alg, true, usages(&[KeyUsage::Sign])).unwrap());
        let der = export_key(KeyFormat::Pkcs8, &private).unwrap();
        let imported = import_key(KeyFormat::Pkcs8, &der, &alg, true, usages(&[KeyUsage::Sign])).unwrap();
        assert_eq!(imported.algorithm(), private.algorithm());
        assert_eq!(imported.usages(), private.usages());
        assert_eq!(imported.fingerprint(), private.fingerprint());
    }

    #[test]
    fn test_ecdh_agreement() {
        let alg = KeyAlgorithm::ec(AlgorithmName::Ecdh, NamedCurve::P256);
        let (a_pub, a_priv) = pair(generate_key(&alg, false, usages(&[KeyUsage::DeriveBits])).unwrap());
        let (b_pub, b_priv) = pair(generate_key(&alg, false, usages(&[KeyUsage::DeriveBits])).unwrap());

        let ab = derive_bits(&DeriveParams::Ecdh { public: Arc::new(b_pub) }, &a_priv, Some(256)).unwrap();
        let ba = derive_bits(&DeriveParams::Ecdh { public: Arc::new(a_pub) }, &b_priv, None).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 32);
    }

    #[test]
    fn test_hkdf_derive_key() {
        let base = import_key(
            KeyFormat::Raw,
            b"input keying material",
            &KeyAlgorithm::hkdf(),
            false,
            usages(&[KeyUsage::DeriveKey, KeyUsage::DeriveBits]),
        )
        .unwrap();
        let params = DeriveParams::Hkdf {
            hash: HashAlgorithm::Sha256,
            salt: b"salt".to_vec(),
            info: b"info".to_vec(),
        };
        let bits = derive_bits(&params, &base, Some(128)).unwrap();
        assert_eq!(bits.len(), 16);

        let derived = derive_key(
            &params,
            &base,
            &KeyAlgorithm::aes_gcm(128),
            true,
            usages(&[KeyUsage::Encrypt]),
        )
        .unwrap();
        assert_eq!(export_key(KeyFormat::Raw, &derived).unwrap(), bits);
    }

    #[test]
    fn test_hkdf_rejects_oversized_length_up_front() {
        let base = import_key(
            KeyFormat::Raw,
            b"ikm",
            &KeyAlgorithm::hkdf(),
            false,
            usages(&[KeyUsage::DeriveBits]),
        )
        .unwrap();
        let params = DeriveParams::Hkdf {
            hash: HashAlgorithm::Sha256,
            salt: Vec::new(),
            info: Vec::new(),
        };
        let max = 255 * 32 * 8;
        assert_eq!(derive_bits(&params, &base, Some(max)).unwrap().len(), 255 * 32);
        assert!(matches!(
            derive_bits(&params, &base, Some(u32::MAX - 7)),
            Err(CryptoError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_wrap_unwrap() {
        let wrapping = single(
            generate_key(
                &KeyAlgorithm::aes_gcm(256),
                false,
                usages(&[KeyUsage::WrapKey, KeyUsage::UnwrapKey]),
            )
            .unwrap(),
        );
        let target = single(
            generate_key(&KeyAlgorithm::aes_gcm(128), true, usages(&[KeyUsage::Encrypt])).unwrap(),
        );
        let wrapped = wrap_key(KeyFormat::Raw, &target, &wrapping, &gcm(5)).unwrap();
        let unwrapped = unwrap_key(
            KeyFormat::Raw,
            &wrapped,
            &wrapping,
            &gcm(5),
            &KeyAlgorithm::aes_gcm(128),
            true,
            usages(&[KeyUsage::Encrypt]),
        )
        .unwrap();
        assert_eq!(unwrapped.fingerprint(), target.fingerprint());
    }
}
