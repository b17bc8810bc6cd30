//! Per-action parameter and result schemas
//!
//! Field names follow the WebCrypto dictionaries (camelCase). Binary fields
//! are MessagePack `bin`. Handles may be sent as a bare id string or as the
//! handle map previously returned by the server.

use serde::{Deserialize, Serialize};

use crate::crypto::engine::AES_GCM_TAG_BITS;
use crate::crypto::{
    AesGcmParams, AlgorithmName, CryptoError, CryptoResult, HashAlgorithm, KeyAlgorithm, KeyUsage,
    KeyUsages,
};
use crate::registry::KeyHandle;

// =============================================================================
// Shared pieces
// =============================================================================

/// A reference to a registered handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HandleRef {
    Id(String),
    Handle { id: String },
}

impl HandleRef {
    pub fn id(&self) -> &str {
        match self {
            HandleRef::Id(id) | HandleRef::Handle { id } => id,
        }
    }
}

/// A hash named by string or `{name}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HashRef {
    Name(String),
    Object { name: String },
}

impl HashRef {
    pub fn name(&self) -> &str {
        match self {
            HashRef::Name(name) | HashRef::Object { name } => name,
        }
    }

    pub fn resolve(&self) -> CryptoResult<HashAlgorithm> {
        self.name().parse()
    }
}

/// Algorithm dictionary fields, all optional except `name`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmObject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_curve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<HashRef>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub iv: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub additional_data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_length: Option<u32>,
    /// ECDH peer public key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<HandleRef>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub salt: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub info: Option<Vec<u8>>,
}

/// An algorithm identifier: bare name or dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlgorithmParams {
    Name(String),
    Object(AlgorithmObject),
}

impl AlgorithmParams {
    pub fn named(name: &str) -> Self {
        AlgorithmParams::Name(name.to_string())
    }

    pub fn name(&self) -> &str {
        match self {
            AlgorithmParams::Name(name) => name,
            AlgorithmParams::Object(object) => &object.name,
        }
    }

    /// The dictionary form; a bare name becomes `{name}`.
    pub fn object(&self) -> AlgorithmObject {
        match self {
            AlgorithmParams::Name(name) => AlgorithmObject {
                name: name.clone(),
                ..Default::default()
            },
            AlgorithmParams::Object(object) => object.clone(),
        }
    }

    pub fn hash(&self) -> CryptoResult<Option<HashAlgorithm>> {
        match self {
            AlgorithmParams::Name(_) => Ok(None),
            AlgorithmParams::Object(object) => object.hash.as_ref().map(HashRef::resolve).transpose(),
        }
    }

    /// Normalize to a key algorithm descriptor (generate/import/derive).
    pub fn key_algorithm(&self) -> CryptoResult<KeyAlgorithm> {
        let object = self.object();
        KeyAlgorithm::normalize(
            &object.name,
            object.length,
            object.named_curve.as_deref(),
            object.hash.as_ref().map(HashRef::name),
        )
    }

    /// Normalize for import and unwrap, where the key data fixes the AES
    /// length.
    pub fn import_algorithm(&self) -> CryptoResult<KeyAlgorithm> {
        let object = self.object();
        let name: AlgorithmName = object.name.parse()?;
        if name == AlgorithmName::AesGcm && object.length.is_none() {
            return Ok(KeyAlgorithm {
                name,
                length: None,
                named_curve: None,
                hash: None,
            });
        }
        self.key_algorithm()
    }

    /// AES-GCM encryption parameters.
    pub fn aes_gcm(&self) -> CryptoResult<AesGcmParams> {
        let object = self.object();
        let iv = object
            .iv
            .ok_or_else(|| CryptoError::InvalidParameters("AES-GCM requires an iv".into()))?;
        Ok(AesGcmParams {
            iv,
            additional_data: object.additional_data.unwrap_or_default(),
            tag_length: object.tag_length.unwrap_or(AES_GCM_TAG_BITS),
        })
    }
}

// =============================================================================
// crypto/subtle
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestParams {
    pub algorithm: AlgorithmParams,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateKeyParams {
    pub algorithm: AlgorithmParams,
    #[serde(default)]
    pub extractable: bool,
    #[serde(default)]
    pub key_usages: Vec<KeyUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportKeyParams {
    pub format: String,
    #[serde(with = "serde_bytes")]
    pub key_data: Vec<u8>,
    pub algorithm: AlgorithmParams,
    #[serde(default)]
    pub extractable: bool,
    #[serde(default)]
    pub key_usages: Vec<KeyUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportKeyParams {
    pub format: String,
    pub key: HandleRef,
}

/// encrypt, decrypt and sign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherParams {
    pub algorithm: AlgorithmParams,
    pub key: HandleRef,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyParams {
    pub algorithm: AlgorithmParams,
    pub key: HandleRef,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeriveBitsParams {
    pub algorithm: AlgorithmParams,
    pub base_key: HandleRef,
    #[serde(default)]
    pub length: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeriveKeyParams {
    pub algorithm: AlgorithmParams,
    pub base_key: HandleRef,
    pub derived_key_type: AlgorithmParams,
    #[serde(default)]
    pub extractable: bool,
    #[serde(default)]
    pub key_usages: Vec<KeyUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapKeyParams {
    pub format: String,
    pub key: HandleRef,
    pub wrapping_key: HandleRef,
    pub wrap_algorithm: AlgorithmParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnwrapKeyParams {
    pub format: String,
    #[serde(with = "serde_bytes")]
    pub wrapped_key: Vec<u8>,
    pub unwrapping_key: HandleRef,
    pub unwrap_algorithm: AlgorithmParams,
    pub unwrapped_key_algorithm: AlgorithmParams,
    #[serde(default)]
    pub extractable: bool,
    #[serde(default)]
    pub key_usages: Vec<KeyUsage>,
}

/// Result of generateKey for asymmetric families
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairResult {
    pub public_key: KeyHandle,
    pub private_key: KeyHandle,
}

/// Result of generateKey: the shape follows the algorithm family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerateKeyResult {
    Pair(KeyPairResult),
    Single(KeyHandle),
}

// =============================================================================
// crypto/keyStorage, crypto/certStorage
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyGetItemParams {
    pub key: String,
    /// Overrides applied to the restored key
    #[serde(default)]
    pub algorithm: Option<AlgorithmParams>,
    #[serde(default)]
    pub extractable: Option<bool>,
    #[serde(default)]
    pub key_usages: Option<Vec<KeyUsage>>,
}

impl KeyGetItemParams {
    pub fn usages(&self) -> Option<KeyUsages> {
        self.key_usages.clone().map(KeyUsages::new)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertGetItemParams {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetItemParams {
    pub item: HandleRef,
    /// Human-readable name some providers attach to the stored item
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItemParams {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOfParams {
    pub item: HandleRef,
}

// =============================================================================
// crypto/cert
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertImportParams {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertExportParams {
    pub cert: HandleRef,
    #[serde(default = "default_cert_format")]
    pub format: String,
}

fn default_cert_format() -> String {
    "raw".to_string()
}

// =============================================================================
// provider, server
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginParams {
    pub pin: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseParams {
    #[serde(default)]
    pub handles: Vec<HandleRef>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_params, encode_data};
    use rmpv::Value;

    fn encode(value: Value) -> Vec<u8> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &value).unwrap();
        buf
    }

    #[test]
    fn test_algorithm_accepts_name_or_object() {
        let by_name: DigestParams = decode_params(&encode(Value::Map(vec![
            (Value::String("algorithm".into()), Value::String("SHA-256".into())),
            (Value::String("data".into()), Value::Binary(b"abc".to_vec())),
        ])))
        .unwrap();
        assert_eq!(by_name.algorithm.name(), "SHA-256");
        assert_eq!(by_name.data, b"abc");

        let by_object: DigestParams = decode_params(&encode(Value::Map(vec![
            (
                Value::String("algorithm".into()),
                Value::Map(vec![(Value::String("name".into()), Value::String("SHA-1".into()))]),
            ),
            (Value::String("data".into()), Value::Binary(vec![])),
        ])))
        .unwrap();
        assert_eq!(by_object.algorithm.name(), "SHA-1");
    }

    #[test]
    fn test_aes_gcm_params_from_dictionary() {
        let params = CipherParams {
            algorithm: AlgorithmParams::Object(AlgorithmObject {
                name: "AES-GCM".into(),
                iv: Some(vec![1; 12]),
                additional_data: Some(b"aad".to_vec()),
                ..Default::default()
            }),
            key: HandleRef::Id("h".into()),
            data: b"hello".to_vec(),
        };
        let decoded: CipherParams = decode_params(&encode_data(&params).unwrap()).unwrap();
        let gcm = decoded.algorithm.aes_gcm().unwrap();
        assert_eq!(gcm.iv, vec![1; 12]);
        assert_eq!(gcm.additional_data, b"aad");
        assert_eq!(gcm.tag_length, 128);
    }

    #[test]
    fn test_handle_ref_accepts_handle_map() {
        let params: ExportKeyParams = decode_params(&encode(Value::Map(vec![
            (Value::String("format".into()), Value::String("raw".into())),
            (
                Value::String("key".into()),
                Value::Map(vec![
                    (Value::String("id".into()), Value::String("abc-1".into())),
                    (Value::String("type".into()), Value::String("secret".into())),
                ]),
            ),
        ])))
        .unwrap();
        assert_eq!(params.key.id(), "abc-1");
    }

    #[test]
    fn test_missing_required_field_fails() {
        let result: Result<CipherParams, _> = decode_params(&encode(Value::Map(vec![(
            Value::String("key".into()),
            Value::String("h".into()),
        )])));
        assert!(result.is_err());
    }

    #[test]
    fn test_hmac_key_algorithm_hash_object() {
        let alg = AlgorithmParams::Object(AlgorithmObject {
            name: "HMAC".into(),
            hash: Some(HashRef::Object {
                name: "SHA-256".into(),
            }),
            ..Default::default()
        });
        let key_alg = alg.key_algorithm().unwrap();
        assert_eq!(key_alg.hash, Some(HashAlgorithm::Sha256));
        assert_eq!(key_alg.length, Some(512));
    }

    #[test]
    fn test_import_algorithm_leaves_aes_length_to_key_data() {
        let alg = AlgorithmParams::named("AES-GCM");
        assert!(alg.key_algorithm().is_err());
        let import = alg.import_algorithm().unwrap();
        assert_eq!(import.name, AlgorithmName::AesGcm);
        assert_eq!(import.length, None);
    }
}
