//! Native cryptographic backend
//!
//! The software engine every provider computes with. It knows nothing about
//! handles, sessions or the wire: it takes live keys and typed parameters and
//! returns live keys or bytes.
//!
//! # Algorithms
//!
//! - **Digest**: SHA-1, SHA-256, SHA-384, SHA-512
//! - **AES-GCM**: 128/256-bit keys, also used for key wrapping
//! - **HMAC**: SHA-1/256/384/512
//! - **ECDSA / ECDH**: P-256
//! - **Ed25519**: signatures
//! - **HKDF**: SHA-256/384/512 key derivation

pub mod algorithm;
pub mod cert;
pub mod digest;
pub mod engine;
pub mod key;
pub mod seal;

use thiserror::Error;

pub use algorithm::{
    pair_usages, validate_usages, AesGcmParams, AlgorithmName, DeriveParams, HashAlgorithm, KeyAlgorithm,
    KeyFormat, KeyType, KeyUsage, KeyUsages, NamedCurve,
};
pub use cert::{Certificate, CertificateFormat, CertificateType};
pub use digest::{digest, local_digest};
pub use key::{CryptoKey, GeneratedKey};

/// Errors raised by the native backend.
///
/// These are wrapped as `ProviderOperationFailed` at the service boundary
/// with the message preserved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Unsupported key format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid key data: {0}")]
    InvalidKeyData(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Key is not extractable")]
    NotExtractable,

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

pub type CryptoResult<T> = std::result::Result<T, CryptoError>;
