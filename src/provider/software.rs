//! Software provider
//!
//! Keys live in process memory; storage is in-memory or a sealed file.

use super::store::{ItemMetadata, ItemStore};
use super::{ProviderInfo, StorageContext};
use crate::crypto::AlgorithmName;

/// Identifier the software provider registers under
pub const SOFTWARE_PROVIDER_ID: &str = "software";

pub struct SoftwareBackend {
    pub(super) store: ItemStore,
}

impl SoftwareBackend {
    pub fn new(store: ItemStore) -> Self {
        Self { store }
    }

    pub fn info() -> ProviderInfo {
        ProviderInfo {
            id: SOFTWARE_PROVIDER_ID.to_string(),
            display_name: "Keyward Software".to_string(),
            reader_name: None,
            serial_number: None,
            is_removable: false,
            is_hardware: false,
            requires_login: false,
            supported_algorithms: AlgorithmName::ALL.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Stored items keep the client label only.
    pub(super) fn metadata(&self, context: &StorageContext) -> ItemMetadata {
        ItemMetadata {
            label: context.label.clone(),
            description: None,
        }
    }
}
