//! Action services
//!
//! A [`Service`] owns a fixed set of action codes and turns one decoded
//! action into result bytes. The [`ServiceSet`] is the single top-level
//! router: every action code is claimed by exactly one service, checked when
//! the set is built.
//!
//! Handlers see an [`ActionContext`]: the nested parameter document, the
//! already-resolved provider, the handle registry and the session. They never
//! branch on the provider variant.

pub mod cert_storage;
pub mod key_storage;
pub mod provider;
pub mod server;
pub mod subtle;

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_bytes::ByteBuf;
use thiserror::Error;

use crate::crypto::{Certificate, CryptoError, CryptoKey, KeyUsage};
use crate::logging::UsageLogger;
use crate::protocol::params::HandleRef;
use crate::protocol::{self, ActionCode, ErrorCode, WireError};
use crate::provider::{Provider, ProviderDirectory, ProviderError};
use crate::registry::{
    CertHandle, HandleRegistry, KeyHandle, RegistryError, ResolvedCertificate, ResolvedKey,
};
use crate::session::SessionState;
use crate::types::{KeywardError, Result};

pub use cert_storage::CertStorageService;
pub use key_storage::KeyStorageService;
pub use provider::ProviderService;
pub use server::ServerService;
pub use subtle::SubtleService;

/// Request-level failure, one variant per wire error code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("{0}")]
    ActionNotImplemented(String),

    #[error("{0}")]
    ProviderNotFound(String),

    #[error("{0}")]
    BadParameters(String),

    #[error("{0}")]
    HandleNotFound(String),

    #[error("{0}")]
    NotAuthenticated(String),

    /// Usage or extractability violation
    #[error("{0}")]
    InvalidAccess(String),

    /// Native failure, message preserved
    #[error("{0}")]
    ProviderOperationFailed(String),

    #[error("{0}")]
    Internal(String),
}

impl ActionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ActionError::ActionNotImplemented(_) => ErrorCode::ActionNotImplemented,
            ActionError::ProviderNotFound(_) => ErrorCode::ProviderNotFound,
            ActionError::BadParameters(_) => ErrorCode::BadParameters,
            ActionError::HandleNotFound(_) => ErrorCode::HandleNotFound,
            ActionError::NotAuthenticated(_) => ErrorCode::NotAuthenticated,
            ActionError::InvalidAccess(_) => ErrorCode::InvalidAccess,
            ActionError::ProviderOperationFailed(_) => ErrorCode::ProviderOperationFailed,
            ActionError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn to_wire(&self) -> WireError {
        WireError {
            code: self.code(),
            message: self.to_string(),
        }
    }

    /// Request-side validation failure of a crypto parameter.
    pub fn bad(e: CryptoError) -> Self {
        ActionError::BadParameters(e.to_string())
    }

    pub fn not_implemented(code: ActionCode) -> Self {
        ActionError::ActionNotImplemented(format!("Action '{code}' is not implemented"))
    }
}

impl From<CryptoError> for ActionError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::NotExtractable => ActionError::InvalidAccess(e.to_string()),
            other => ActionError::ProviderOperationFailed(other.to_string()),
        }
    }
}

impl From<ProviderError> for ActionError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Crypto(crypto) => crypto.into(),
            ProviderError::NotAuthenticated(msg) => ActionError::NotAuthenticated(msg),
            ProviderError::Storage(msg) => ActionError::ProviderOperationFailed(msg),
            ProviderError::Internal(msg) => ActionError::Internal(msg),
        }
    }
}

impl From<RegistryError> for ActionError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(_) => ActionError::HandleNotFound(e.to_string()),
            RegistryError::WrongKind { .. } => ActionError::BadParameters(e.to_string()),
            RegistryError::Full(_) => ActionError::Internal(e.to_string()),
        }
    }
}

impl From<rmp_serde::decode::Error> for ActionError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ActionError::BadParameters(format!("Invalid parameters: {e}"))
    }
}

impl From<rmp_serde::encode::Error> for ActionError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ActionError::Internal(format!("Failed to encode result: {e}"))
    }
}

pub type ActionResult = std::result::Result<Vec<u8>, ActionError>;

/// Everything a handler needs for one action
#[derive(Clone)]
pub struct ActionContext {
    pub code: ActionCode,
    /// Nested parameter document
    pub data: Vec<u8>,
    /// Resolved target provider (`None` only for provider-less actions)
    pub provider: Option<Arc<Provider>>,
    pub registry: Arc<HandleRegistry>,
    pub directory: Arc<ProviderDirectory>,
    pub session: Arc<SessionState>,
    pub usage: UsageLogger,
}

impl ActionContext {
    /// Decode the parameter document for this action.
    pub fn params<T: DeserializeOwned>(&self) -> std::result::Result<T, ActionError> {
        Ok(protocol::decode_params(&self.data)?)
    }

    pub fn provider(&self) -> std::result::Result<&Arc<Provider>, ActionError> {
        self.provider.as_ref().ok_or_else(|| {
            ActionError::ProviderNotFound(format!("Action '{}' requires a provider", self.code))
        })
    }

    /// Resolve a key handle owned by the target provider.
    pub fn key(&self, handle: &HandleRef) -> std::result::Result<ResolvedKey, ActionError> {
        let resolved = self.registry.get_key(handle.id())?;
        let provider = self.provider()?;
        if resolved.handle.provider_id != provider.id() {
            return Err(ActionError::BadParameters(format!(
                "Key {} belongs to provider '{}', not '{}'",
                resolved.handle.id,
                resolved.handle.provider_id,
                provider.id()
            )));
        }
        Ok(resolved)
    }

    /// Resolve a key handle owned by the target provider and check it permits
    /// `usage`.
    pub fn key_for(
        &self,
        handle: &HandleRef,
        usage: KeyUsage,
    ) -> std::result::Result<ResolvedKey, ActionError> {
        let resolved = self.key(handle)?;
        if !resolved.handle.usages.contains(usage) {
            return Err(ActionError::InvalidAccess(format!(
                "Key {} does not permit '{usage}'",
                resolved.handle.id
            )));
        }
        Ok(resolved)
    }

    /// Register a key for the target provider, owned by this session.
    pub fn register_key(&self, key: CryptoKey) -> std::result::Result<KeyHandle, ActionError> {
        let handle = self.registry.add_key(key, self.provider()?.id())?;
        self.own(&handle.id)?;
        Ok(handle)
    }

    pub fn register_key_pair(
        &self,
        public: CryptoKey,
        private: CryptoKey,
    ) -> std::result::Result<(KeyHandle, KeyHandle), ActionError> {
        let (public, private) = self
            .registry
            .add_key_pair(public, private, self.provider()?.id())?;
        let owned = self.own(&public.id);
        self.own(&private.id)?;
        owned?;
        Ok((public, private))
    }

    pub fn register_certificate(
        &self,
        certificate: Certificate,
    ) -> std::result::Result<CertHandle, ActionError> {
        let handle = self
            .registry
            .add_certificate(certificate, self.provider()?.id())?;
        self.own(&handle.id)?;
        Ok(handle)
    }

    /// Tie a fresh handle to the session; a closed session gets nothing.
    fn own(&self, handle_id: &str) -> std::result::Result<(), ActionError> {
        if self.session.track(handle_id) {
            return Ok(());
        }
        self.session.untrack(handle_id);
        self.registry.remove(handle_id);
        Err(ActionError::Internal("Session closed".into()))
    }

    /// Resolve a certificate handle owned by the target provider.
    pub fn certificate(
        &self,
        handle: &HandleRef,
    ) -> std::result::Result<ResolvedCertificate, ActionError> {
        let resolved = self.registry.get_certificate(handle.id())?;
        let provider = self.provider()?;
        if resolved.handle.provider_id != provider.id() {
            return Err(ActionError::BadParameters(format!(
                "Certificate {} belongs to provider '{}', not '{}'",
                resolved.handle.id,
                resolved.handle.provider_id,
                provider.id()
            )));
        }
        Ok(resolved)
    }
}

/// Encode a result value.
pub fn reply<T: Serialize + ?Sized>(value: &T) -> ActionResult {
    Ok(protocol::encode_data(value)?)
}

/// Encode a raw byte result as MessagePack `bin`.
pub fn reply_bytes(bytes: Vec<u8>) -> ActionResult {
    reply(&ByteBuf::from(bytes))
}

/// Encode an empty (nil) result.
pub fn reply_void() -> ActionResult {
    reply(&())
}

/// Handler for a fixed set of action codes
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    /// Action codes this service owns
    fn codes(&self) -> &'static [ActionCode];

    async fn handle(&self, ctx: ActionContext) -> ActionResult;
}

/// Action code → owning service
pub struct ServiceSet {
    routes: HashMap<ActionCode, Arc<dyn Service>>,
}

impl ServiceSet {
    /// Build a router. Two services claiming one code is a configuration
    /// error.
    pub fn new(services: Vec<Arc<dyn Service>>) -> Result<Self> {
        let mut routes: HashMap<ActionCode, Arc<dyn Service>> = HashMap::new();
        for service in services {
            for code in service.codes() {
                if let Some(existing) = routes.insert(*code, service.clone()) {
                    return Err(KeywardError::Config(format!(
                        "action '{code}' claimed by both '{}' and '{}'",
                        existing.name(),
                        service.name()
                    )));
                }
            }
        }
        Ok(Self { routes })
    }

    /// All built-in services. Fails unless every action code is claimed.
    pub fn standard() -> Result<Self> {
        let set = Self::new(vec![
            Arc::new(SubtleService),
            Arc::new(KeyStorageService),
            Arc::new(CertStorageService),
            Arc::new(ProviderService),
            Arc::new(ServerService),
        ])?;
        let unclaimed = set.unclaimed();
        if !unclaimed.is_empty() {
            let names: Vec<_> = unclaimed.iter().map(ActionCode::as_str).collect();
            return Err(KeywardError::Config(format!(
                "actions without a service: {}",
                names.join(", ")
            )));
        }
        Ok(set)
    }

    pub fn route(&self, code: ActionCode) -> Option<Arc<dyn Service>> {
        self.routes.get(&code).cloned()
    }

    /// Action codes no service claims
    pub fn unclaimed(&self) -> Vec<ActionCode> {
        ActionCode::ALL
            .into_iter()
            .filter(|code| !self.routes.contains_key(code))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::provider::{
        HybridBackend, ItemStore, SoftwareBackend, TokenBackend, TokenSlot,
    };

    pub const TEST_PIN: &str = "1234";

    pub fn directory() -> Arc<ProviderDirectory> {
        let token = TokenBackend::new(
            TokenSlot {
                label: "Test Token".into(),
                serial: "0001".into(),
                reader: "Virtual Reader".into(),
            },
            TEST_PIN,
        );
        Arc::new(
            ProviderDirectory::new(vec![
                Provider::software(SoftwareBackend::new(ItemStore::memory())),
                Provider::token(token),
                Provider::hybrid(HybridBackend::new(ItemStore::memory())),
            ])
            .unwrap(),
        )
    }

    /// Shared fixture for handler tests
    pub struct Fixture {
        pub directory: Arc<ProviderDirectory>,
        pub registry: Arc<HandleRegistry>,
        pub session: Arc<SessionState>,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                directory: directory(),
                registry: Arc::new(HandleRegistry::new(1000)),
                session: Arc::new(SessionState::new("https://app.example".into())),
            }
        }

        pub fn ctx<T: Serialize>(&self, code: ActionCode, provider: &str, params: &T) -> ActionContext {
            ActionContext {
                code,
                data: protocol::encode_data(params).unwrap(),
                provider: self.directory.resolve(provider),
                registry: self.registry.clone(),
                directory: self.directory.clone(),
                session: self.session.clone(),
                usage: UsageLogger::new("test".into()),
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
        rmp_serde::from_slice(bytes).unwrap()
    }
}
