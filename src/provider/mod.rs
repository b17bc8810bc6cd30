//! Cryptographic providers
//!
//! A [`Provider`] wraps one native backend behind a single operation surface:
//! the subtle operations, key storage and certificate storage. The backend is
//! a closed set of variants; only this module and the backend files branch
//! on it. Callers see a [`ProviderInfo`] capability descriptor and the
//! methods below.
//!
//! All operations take owned inputs so token-backed providers can move the
//! work onto the blocking pool.

pub mod directory;
pub mod hybrid;
pub mod software;
pub mod store;
pub mod token;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::crypto::{
    self, engine, AesGcmParams, AlgorithmName, Certificate, CryptoError, CryptoKey, CryptoResult,
    DeriveParams, GeneratedKey, HashAlgorithm, KeyAlgorithm, KeyFormat, KeyUsages,
};
use crate::types::KeywardError;

pub use directory::ProviderDirectory;
pub use hybrid::HybridBackend;
pub use software::SoftwareBackend;
pub use store::{ItemMetadata, ItemStore};
pub use token::{TokenBackend, TokenSlot};

/// Capability descriptor exposed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    pub is_removable: bool,
    pub is_hardware: bool,
    /// Sessions must log in before using this provider
    pub requires_login: bool,
    pub supported_algorithms: Vec<String>,
}

/// Provider-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<KeywardError> for ProviderError {
    fn from(e: KeywardError) -> Self {
        ProviderError::Storage(e.to_string())
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Session data handed to storage operations. The provider decides what, if
/// anything, it records from it.
#[derive(Debug, Clone, Default)]
pub struct StorageContext {
    pub origin: String,
    /// Client-supplied label passed through from `setItem`
    pub label: Option<String>,
}

/// Metadata overrides for a key restored from storage
#[derive(Debug, Clone, Default)]
pub struct KeyOverrides {
    pub algorithm: Option<KeyAlgorithm>,
    pub extractable: Option<bool>,
    pub usages: Option<KeyUsages>,
}

/// Backend variants
pub enum Backend {
    Software(SoftwareBackend),
    HardwareToken(TokenBackend),
    Hybrid(HybridBackend),
}

/// A registered provider
pub struct Provider {
    info: ProviderInfo,
    backend: Backend,
}

impl Provider {
    pub fn software(backend: SoftwareBackend) -> Self {
        Self {
            info: SoftwareBackend::info(),
            backend: Backend::Software(backend),
        }
    }

    pub fn token(backend: TokenBackend) -> Self {
        Self {
            info: backend.info(),
            backend: Backend::HardwareToken(backend),
        }
    }

    pub fn hybrid(backend: HybridBackend) -> Self {
        Self {
            info: HybridBackend::info(),
            backend: Backend::Hybrid(backend),
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &ProviderInfo {
        &self.info
    }

    fn store(&self) -> &ItemStore {
        match &self.backend {
            Backend::Software(b) => &b.store,
            Backend::HardwareToken(b) => &b.store,
            Backend::Hybrid(b) => &b.store,
        }
    }

    fn metadata(&self, context: &StorageContext) -> ItemMetadata {
        match &self.backend {
            Backend::Software(b) => b.metadata(context),
            Backend::HardwareToken(b) => b.metadata(context),
            Backend::Hybrid(b) => b.metadata(context),
        }
    }

    /// Policy applied to every key this provider creates.
    fn created(&self, key: CryptoKey) -> CryptoKey {
        match &self.backend {
            Backend::HardwareToken(_) => TokenBackend::enforce_policy(key),
            Backend::Software(_) | Backend::Hybrid(_) => key,
        }
    }

    fn check_supported(&self, algorithm: AlgorithmName) -> ProviderResult<()> {
        if self
            .info
            .supported_algorithms
            .iter()
            .any(|a| a == algorithm.as_str())
        {
            Ok(())
        } else {
            Err(CryptoError::UnsupportedAlgorithm(format!(
                "{algorithm} is not supported by provider '{}'",
                self.info.id
            ))
            .into())
        }
    }

    /// Run a native operation. Token operations go to the blocking pool.
    async fn compute<T, F>(&self, op: F) -> ProviderResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> CryptoResult<T> + Send + 'static,
    {
        match &self.backend {
            Backend::HardwareToken(_) => tokio::task::spawn_blocking(op)
                .await
                .map_err(|e| ProviderError::Internal(format!("token operation aborted: {e}")))?
                .map_err(ProviderError::from),
            Backend::Software(_) | Backend::Hybrid(_) => op().map_err(ProviderError::from),
        }
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Verify a login PIN. Providers without login accept any PIN.
    pub fn login(&self, pin: &str) -> ProviderResult<()> {
        match &self.backend {
            Backend::HardwareToken(token) => {
                if token.check_pin(pin) {
                    Ok(())
                } else {
                    Err(ProviderError::NotAuthenticated(format!(
                        "incorrect PIN for provider '{}'",
                        self.info.id
                    )))
                }
            }
            Backend::Software(_) | Backend::Hybrid(_) => Ok(()),
        }
    }

    // =========================================================================
    // Subtle operations
    // =========================================================================

    pub async fn digest(&self, algorithm: HashAlgorithm, data: Vec<u8>) -> ProviderResult<Vec<u8>> {
        self.compute(move || Ok(crypto::digest(algorithm, &data))).await
    }

    pub async fn generate_key(
        &self,
        algorithm: KeyAlgorithm,
        extractable: bool,
        usages: KeyUsages,
    ) -> ProviderResult<GeneratedKey> {
        self.check_supported(algorithm.name)?;
        let generated = self
            .compute(move || engine::generate_key(&algorithm, extractable, usages))
            .await?;
        debug!(provider = %self.info.id, "Generated key");
        Ok(match generated {
            GeneratedKey::Single(key) => GeneratedKey::Single(self.created(key)),
            GeneratedKey::Pair { public, private } => GeneratedKey::Pair {
                public,
                private: self.created(private),
            },
        })
    }

    pub async fn import_key(
        &self,
        format: KeyFormat,
        data: Vec<u8>,
        algorithm: KeyAlgorithm,
        extractable: bool,
        usages: KeyUsages,
    ) -> ProviderResult<CryptoKey> {
        self.check_supported(algorithm.name)?;
        let key = self
            .compute(move || engine::import_key(format, &data, &algorithm, extractable, usages))
            .await?;
        Ok(self.created(key))
    }

    pub async fn export_key(&self, format: KeyFormat, key: Arc<CryptoKey>) -> ProviderResult<Vec<u8>> {
        self.compute(move || engine::export_key(format, &key)).await
    }

    pub async fn encrypt(
        &self,
        params: AesGcmParams,
        key: Arc<CryptoKey>,
        data: Vec<u8>,
    ) -> ProviderResult<Vec<u8>> {
        self.check_supported(key.algorithm().name)?;
        self.compute(move || engine::encrypt(&params, &key, &data)).await
    }

    pub async fn decrypt(
        &self,
        params: AesGcmParams,
        key: Arc<CryptoKey>,
        data: Vec<u8>,
    ) -> ProviderResult<Vec<u8>> {
        self.check_supported(key.algorithm().name)?;
        self.compute(move || engine::decrypt(&params, &key, &data)).await
    }

    pub async fn sign(
        &self,
        algorithm: AlgorithmName,
        hash: Option<HashAlgorithm>,
        key: Arc<CryptoKey>,
        data: Vec<u8>,
    ) -> ProviderResult<Vec<u8>> {
        self.check_supported(algorithm)?;
        self.compute(move || engine::sign(algorithm, hash, &key, &data)).await
    }

    pub async fn verify(
        &self,
        algorithm: AlgorithmName,
        hash: Option<HashAlgorithm>,
        key: Arc<CryptoKey>,
        signature: Vec<u8>,
        data: Vec<u8>,
    ) -> ProviderResult<bool> {
        self.check_supported(algorithm)?;
        self.compute(move || engine::verify(algorithm, hash, &key, &signature, &data))
            .await
    }

    pub async fn derive_bits(
        &self,
        params: DeriveParams,
        base: Arc<CryptoKey>,
        length: Option<u32>,
    ) -> ProviderResult<Vec<u8>> {
        self.check_supported(params.algorithm())?;
        self.compute(move || engine::derive_bits(&params, &base, length)).await
    }

    pub async fn derive_key(
        &self,
        params: DeriveParams,
        base: Arc<CryptoKey>,
        derived: KeyAlgorithm,
        extractable: bool,
        usages: KeyUsages,
    ) -> ProviderResult<CryptoKey> {
        self.check_supported(params.algorithm())?;
        self.check_supported(derived.name)?;
        let key = self
            .compute(move || engine::derive_key(&params, &base, &derived, extractable, usages))
            .await?;
        Ok(self.created(key))
    }

    pub async fn wrap_key(
        &self,
        format: KeyFormat,
        key: Arc<CryptoKey>,
        wrapping: Arc<CryptoKey>,
        params: AesGcmParams,
    ) -> ProviderResult<Vec<u8>> {
        self.check_supported(wrapping.algorithm().name)?;
        self.compute(move || engine::wrap_key(format, &key, &wrapping, &params))
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn unwrap_key(
        &self,
        format: KeyFormat,
        wrapped: Vec<u8>,
        unwrapping: Arc<CryptoKey>,
        params: AesGcmParams,
        algorithm: KeyAlgorithm,
        extractable: bool,
        usages: KeyUsages,
    ) -> ProviderResult<CryptoKey> {
        self.check_supported(unwrapping.algorithm().name)?;
        self.check_supported(algorithm.name)?;
        let key = self
            .compute(move || {
                engine::unwrap_key(
                    format,
                    &wrapped,
                    &unwrapping,
                    &params,
                    &algorithm,
                    extractable,
                    usages,
                )
            })
            .await?;
        Ok(self.created(key))
    }

    // =========================================================================
    // Key storage
    // =========================================================================

    /// Restore a stored key, applying overrides. `extractable` can only be
    /// narrowed, never widened past what was stored.
    pub fn key_storage_get(
        &self,
        storage_key: &str,
        overrides: KeyOverrides,
    ) -> ProviderResult<Option<CryptoKey>> {
        let Some(stored) = self.store().get_key(storage_key)? else {
            return Ok(None);
        };
        let algorithm = overrides
            .algorithm
            .unwrap_or_else(|| stored.algorithm().clone());
        let extractable = stored.extractable() && overrides.extractable.unwrap_or(true);
        let usages = overrides.usages.unwrap_or_else(|| stored.usages().clone());
        crypto::validate_usages(algorithm.name, stored.kind(), &usages)?;
        let key = stored.with_metadata(algorithm, extractable, usages)?;
        Ok(Some(key))
    }

    pub async fn key_storage_set(
        &self,
        key: Arc<CryptoKey>,
        context: StorageContext,
    ) -> ProviderResult<String> {
        let metadata = self.metadata(&context);
        Ok(self.store().set_key(&key, metadata).await?)
    }

    pub async fn key_storage_remove(&self, storage_key: &str) -> ProviderResult<()> {
        Ok(self.store().remove_key(storage_key).await?)
    }

    pub fn key_storage_keys(&self) -> Vec<String> {
        self.store().key_names()
    }

    pub fn key_storage_index_of(&self, key: &CryptoKey) -> Option<String> {
        self.store().index_of_key(key)
    }

    pub async fn key_storage_clear(&self) -> ProviderResult<()> {
        Ok(self.store().clear_keys().await?)
    }

    pub fn key_storage_metadata(&self, storage_key: &str) -> Option<ItemMetadata> {
        self.store().key_metadata(storage_key)
    }

    // =========================================================================
    // Certificate storage
    // =========================================================================

    pub fn cert_storage_get(&self, storage_key: &str) -> ProviderResult<Option<Certificate>> {
        Ok(self.store().get_certificate(storage_key)?)
    }

    pub async fn cert_storage_set(
        &self,
        certificate: Arc<Certificate>,
        context: StorageContext,
    ) -> ProviderResult<String> {
        let metadata = self.metadata(&context);
        Ok(self.store().set_certificate(&certificate, metadata).await?)
    }

    pub async fn cert_storage_remove(&self, storage_key: &str) -> ProviderResult<()> {
        Ok(self.store().remove_certificate(storage_key).await?)
    }

    pub fn cert_storage_keys(&self) -> Vec<String> {
        self.store().certificate_names()
    }

    pub fn cert_storage_index_of(&self, certificate: &Certificate) -> Option<String> {
        self.store().index_of_certificate(certificate)
    }

    pub async fn cert_storage_clear(&self) -> ProviderResult<()> {
        Ok(self.store().clear_certificates().await?)
    }

    pub fn cert_storage_metadata(&self, storage_key: &str) -> Option<ItemMetadata> {
        self.store().certificate_metadata(storage_key)
    }
}
