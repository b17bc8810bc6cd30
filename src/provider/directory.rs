//! Provider directory
//!
//! Providers are registered once at startup and never removed or replaced.
//! The directory only resolves ids; access policy is the session's concern.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::{
    HybridBackend, ItemStore, Provider, ProviderInfo, SoftwareBackend, TokenBackend, TokenSlot,
};
use crate::config::Args;
use crate::types::{KeywardError, Result};

/// Registered providers, in registration order
pub struct ProviderDirectory {
    providers: Vec<Arc<Provider>>,
    by_id: HashMap<String, Arc<Provider>>,
}

impl ProviderDirectory {
    /// Build a directory from a fixed provider list. Duplicate ids are a
    /// configuration error.
    pub fn new(providers: Vec<Provider>) -> Result<Self> {
        let mut by_id = HashMap::new();
        let mut ordered = Vec::with_capacity(providers.len());
        for provider in providers {
            let provider = Arc::new(provider);
            if by_id
                .insert(provider.id().to_string(), provider.clone())
                .is_some()
            {
                return Err(KeywardError::Config(format!(
                    "provider '{}' registered twice",
                    provider.id()
                )));
            }
            ordered.push(provider);
        }
        Ok(Self {
            providers: ordered,
            by_id,
        })
    }

    /// Build the providers enabled in `args`, opening sealed storage where
    /// configured.
    pub async fn from_args(args: &Args) -> Result<Self> {
        let persistent = match (&args.storage_dir, &args.storage_passphrase) {
            (Some(dir), Some(passphrase)) => Some((dir.as_path(), passphrase.as_str())),
            _ => None,
        };
        let open_store = |id: &'static str| async move {
            match persistent {
                Some((dir, passphrase)) => ItemStore::persistent(dir, id, passphrase).await,
                None => Ok(ItemStore::memory()),
            }
        };

        let mut providers = Vec::new();
        if args.software_provider {
            let store = open_store(super::software::SOFTWARE_PROVIDER_ID).await?;
            providers.push(Provider::software(SoftwareBackend::new(store)));
        }
        if args.token_provider {
            let pin = args.token_pin.as_deref().ok_or_else(|| {
                KeywardError::Config("token provider enabled without a PIN".into())
            })?;
            let slot = TokenSlot {
                label: args.token_label.clone(),
                serial: args.token_serial.clone(),
                reader: args.token_reader.clone(),
            };
            providers.push(Provider::token(TokenBackend::new(slot, pin)));
        }
        if args.hybrid_provider {
            let store = open_store(super::hybrid::HYBRID_PROVIDER_ID).await?;
            providers.push(Provider::hybrid(HybridBackend::new(store)));
        }

        let directory = Self::new(providers)?;
        for provider in &directory.providers {
            let info = provider.info();
            info!(
                provider = %info.id,
                name = %info.display_name,
                hardware = info.is_hardware,
                login = info.requires_login,
                "Registered provider"
            );
        }
        Ok(directory)
    }

    /// Resolve a provider id.
    pub fn resolve(&self, provider_id: &str) -> Option<Arc<Provider>> {
        self.by_id.get(provider_id).cloned()
    }

    /// Capability descriptors of every provider.
    pub fn list(&self) -> Vec<ProviderInfo> {
        self.providers.iter().map(|p| p.info().clone()).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_args() {
        let mut args = Args::software_only();
        args.token_provider = true;
        args.token_pin = Some("1234".into());
        args.hybrid_provider = true;

        let directory = ProviderDirectory::from_args(&args).await.unwrap();
        assert_eq!(directory.ids(), vec!["software", "token", "hybrid"]);
        assert!(directory.resolve("token").unwrap().info().requires_login);
        assert!(directory.resolve("missing").is_none());
        assert_eq!(directory.list().len(), 3);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = ProviderDirectory::new(vec![
            Provider::software(SoftwareBackend::new(ItemStore::memory())),
            Provider::software(SoftwareBackend::new(ItemStore::memory())),
        ]);
        assert!(matches!(result, Err(KeywardError::Config(_))));
    }
}
