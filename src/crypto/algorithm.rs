//! Algorithm descriptors, key usages and per-operation parameters

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{CryptoError, CryptoResult};

/// Largest HMAC key a client may ask for
pub const MAX_HMAC_KEY_BITS: u32 = 8192;

// =============================================================================
// Names
// =============================================================================

/// Key algorithm families supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmName {
    #[serde(rename = "AES-GCM")]
    AesGcm,
    #[serde(rename = "HMAC")]
    Hmac,
    #[serde(rename = "ECDSA")]
    Ecdsa,
    #[serde(rename = "ECDH")]
    Ecdh,
    #[serde(rename = "Ed25519")]
    Ed25519,
    #[serde(rename = "HKDF")]
    Hkdf,
}

impl AlgorithmName {
    /// Every supported algorithm, in capability-descriptor order
    pub const ALL: [AlgorithmName; 6] = [
        AlgorithmName::AesGcm,
        AlgorithmName::Hmac,
        AlgorithmName::Ecdsa,
        AlgorithmName::Ecdh,
        AlgorithmName::Ed25519,
        AlgorithmName::Hkdf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmName::AesGcm => "AES-GCM",
            AlgorithmName::Hmac => "HMAC",
            AlgorithmName::Ecdsa => "ECDSA",
            AlgorithmName::Ecdh => "ECDH",
            AlgorithmName::Ed25519 => "Ed25519",
            AlgorithmName::Hkdf => "HKDF",
        }
    }

    /// Asymmetric families generate key pairs, symmetric ones a single key.
    pub fn is_asymmetric(&self) -> bool {
        matches!(
            self,
            AlgorithmName::Ecdsa | AlgorithmName::Ecdh | AlgorithmName::Ed25519
        )
    }

    /// Usages a key of this algorithm and type may carry.
    pub fn permitted_usages(&self, kind: KeyType) -> &'static [KeyUsage] {
        use KeyUsage::*;
        match (self, kind) {
            (AlgorithmName::AesGcm, KeyType::Secret) => &[Encrypt, Decrypt, WrapKey, UnwrapKey],
            (AlgorithmName::Hmac, KeyType::Secret) => &[Sign, Verify],
            (AlgorithmName::Hkdf, KeyType::Secret) => &[DeriveKey, DeriveBits],
            (AlgorithmName::Ecdsa, KeyType::Private) => &[Sign],
            (AlgorithmName::Ecdsa, KeyType::Public) => &[Verify],
            (AlgorithmName::Ecdh, KeyType::Private) => &[DeriveKey, DeriveBits],
            (AlgorithmName::Ecdh, KeyType::Public) => &[],
            (AlgorithmName::Ed25519, KeyType::Private) => &[Sign],
            (AlgorithmName::Ed25519, KeyType::Public) => &[Verify],
            _ => &[],
        }
    }
}

impl fmt::Display for AlgorithmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmName {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        AlgorithmName::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CryptoError::UnsupportedAlgorithm(s.to_string()))
    }
}

/// Digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA-1")]
    Sha1,
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Digest output length in bytes
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Internal block size in bits (default HMAC key length)
    pub fn block_bits(&self) -> u32 {
        match self {
            HashAlgorithm::Sha1 | HashAlgorithm::Sha256 => 512,
            HashAlgorithm::Sha384 | HashAlgorithm::Sha512 => 1024,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SHA-1" => Ok(HashAlgorithm::Sha1),
            "SHA-256" => Ok(HashAlgorithm::Sha256),
            "SHA-384" => Ok(HashAlgorithm::Sha384),
            "SHA-512" => Ok(HashAlgorithm::Sha512),
            _ => Err(CryptoError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Elliptic curves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedCurve {
    #[serde(rename = "P-256")]
    P256,
}

impl FromStr for NamedCurve {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        if s.eq_ignore_ascii_case("P-256") {
            Ok(NamedCurve::P256)
        } else {
            Err(CryptoError::UnsupportedAlgorithm(format!("curve {s}")))
        }
    }
}

// =============================================================================
// Key metadata
// =============================================================================

/// Key type as exposed on handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Secret,
    Public,
    Private,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Secret => "secret",
            KeyType::Public => "public",
            KeyType::Private => "private",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations a key may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyUsage {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    DeriveKey,
    DeriveBits,
    WrapKey,
    UnwrapKey,
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyUsage::Encrypt => "encrypt",
            KeyUsage::Decrypt => "decrypt",
            KeyUsage::Sign => "sign",
            KeyUsage::Verify => "verify",
            KeyUsage::DeriveKey => "deriveKey",
            KeyUsage::DeriveBits => "deriveBits",
            KeyUsage::WrapKey => "wrapKey",
            KeyUsage::UnwrapKey => "unwrapKey",
        };
        f.write_str(s)
    }
}

/// Normalized (sorted, de-duplicated) usage set
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<KeyUsage>", into = "Vec<KeyUsage>")]
pub struct KeyUsages(Vec<KeyUsage>);

impl KeyUsages {
    pub fn new(mut usages: Vec<KeyUsage>) -> Self {
        usages.sort();
        usages.dedup();
        Self(usages)
    }

    pub fn contains(&self, usage: KeyUsage) -> bool {
        self.0.contains(&usage)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_subset_of(&self, other: &[KeyUsage]) -> bool {
        self.0.iter().all(|u| other.contains(u))
    }

    /// Keep only the usages also present in `allowed`.
    pub fn intersect(&self, allowed: &[KeyUsage]) -> Self {
        Self(self.0.iter().copied().filter(|u| allowed.contains(u)).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyUsage> {
        self.0.iter()
    }
}

impl From<Vec<KeyUsage>> for KeyUsages {
    fn from(usages: Vec<KeyUsage>) -> Self {
        Self::new(usages)
    }
}

impl From<KeyUsages> for Vec<KeyUsage> {
    fn from(usages: KeyUsages) -> Self {
        usages.0
    }
}

/// Algorithm descriptor carried by every key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyAlgorithm {
    pub name: AlgorithmName,

    /// Key length in bits (AES, HMAC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,

    /// Curve (ECDSA, ECDH)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_curve: Option<NamedCurve>,

    /// Inner hash (HMAC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<HashAlgorithm>,
}

impl KeyAlgorithm {
    pub fn aes_gcm(length: u32) -> Self {
        Self {
            name: AlgorithmName::AesGcm,
            length: Some(length),
            named_curve: None,
            hash: None,
        }
    }

    pub fn hmac(hash: HashAlgorithm, length: u32) -> Self {
        Self {
            name: AlgorithmName::Hmac,
            length: Some(length),
            named_curve: None,
            hash: Some(hash),
        }
    }

    pub fn ec(name: AlgorithmName, curve: NamedCurve) -> Self {
        Self {
            name,
            length: None,
            named_curve: Some(curve),
            hash: None,
        }
    }

    pub fn ed25519() -> Self {
        Self {
            name: AlgorithmName::Ed25519,
            length: None,
            named_curve: None,
            hash: None,
        }
    }

    pub fn hkdf() -> Self {
        Self {
            name: AlgorithmName::Hkdf,
            length: None,
            named_curve: None,
            hash: None,
        }
    }

    /// Build a descriptor from loosely-typed request fields, filling the
    /// defaults each family defines and rejecting combinations it cannot
    /// honor.
    pub fn normalize(
        name: &str,
        length: Option<u32>,
        named_curve: Option<&str>,
        hash: Option<&str>,
    ) -> CryptoResult<Self> {
        let name: AlgorithmName = name.parse()?;
        match name {
            AlgorithmName::AesGcm => match length {
                Some(len @ (128 | 256)) => Ok(Self::aes_gcm(len)),
                Some(other) => Err(CryptoError::InvalidParameters(format!(
                    "AES-GCM length must be 128 or 256, got {other}"
                ))),
                None => Err(CryptoError::InvalidParameters(
                    "AES-GCM requires a length".into(),
                )),
            },
            AlgorithmName::Hmac => {
                let hash: HashAlgorithm = hash
                    .ok_or_else(|| CryptoError::InvalidParameters("HMAC requires a hash".into()))?
                    .parse()?;
                let length = length.unwrap_or_else(|| hash.block_bits());
                if length == 0 || length > MAX_HMAC_KEY_BITS {
                    return Err(CryptoError::InvalidParameters(format!(
                        "HMAC length must be between 1 and {MAX_HMAC_KEY_BITS}, got {length}"
                    )));
                }
                Ok(Self::hmac(hash, length))
            }
            AlgorithmName::Ecdsa | AlgorithmName::Ecdh => {
                let curve: NamedCurve = named_curve
                    .ok_or_else(|| {
                        CryptoError::InvalidParameters(format!("{name} requires a namedCurve"))
                    })?
                    .parse()?;
                Ok(Self::ec(name, curve))
            }
            AlgorithmName::Ed25519 => Ok(Self::ed25519()),
            AlgorithmName::Hkdf => Ok(Self::hkdf()),
        }
    }
}

/// Check requested usages against what the algorithm permits for `kind`.
///
/// Secret and private keys must carry at least one usage.
pub fn validate_usages(
    algorithm: AlgorithmName,
    kind: KeyType,
    usages: &KeyUsages,
) -> CryptoResult<()> {
    let permitted = algorithm.permitted_usages(kind);
    if let Some(bad) = usages.iter().find(|u| !permitted.contains(u)) {
        return Err(CryptoError::InvalidParameters(format!(
            "usage '{bad}' is not valid for a {kind} {algorithm} key"
        )));
    }
    if usages.is_empty() && kind != KeyType::Public {
        return Err(CryptoError::InvalidParameters(format!(
            "a {kind} {algorithm} key needs at least one usage"
        )));
    }
    Ok(())
}

/// Usages permitted on either half of a key pair
pub fn pair_usages(algorithm: AlgorithmName) -> Vec<KeyUsage> {
    let mut all = algorithm.permitted_usages(KeyType::Private).to_vec();
    all.extend_from_slice(algorithm.permitted_usages(KeyType::Public));
    all
}

// =============================================================================
// Formats and operation parameters
// =============================================================================

/// Key serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    Raw,
    Spki,
    Pkcs8,
}

impl FromStr for KeyFormat {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(KeyFormat::Raw),
            "spki" => Ok(KeyFormat::Spki),
            "pkcs8" => Ok(KeyFormat::Pkcs8),
            _ => Err(CryptoError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyFormat::Raw => "raw",
            KeyFormat::Spki => "spki",
            KeyFormat::Pkcs8 => "pkcs8",
        };
        f.write_str(s)
    }
}

/// AES-GCM encryption parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesGcmParams {
    pub iv: Vec<u8>,
    pub additional_data: Vec<u8>,
    /// Authentication tag length in bits
    pub tag_length: u32,
}

/// Key derivation parameters
#[derive(Debug, Clone)]
pub enum DeriveParams {
    /// ECDH with the peer's public key
    Ecdh {
        public: std::sync::Arc<super::CryptoKey>,
    },
    Hkdf {
        hash: HashAlgorithm,
        salt: Vec<u8>,
        info: Vec<u8>,
    },
}

impl DeriveParams {
    pub fn algorithm(&self) -> AlgorithmName {
        match self {
            DeriveParams::Ecdh { .. } => AlgorithmName::Ecdh,
            DeriveParams::Hkdf { .. } => AlgorithmName::Hkdf,
        }
    }
}
