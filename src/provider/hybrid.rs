//! Hybrid provider
//!
//! Computes in software like the software provider, but every stored item is
//! tagged with a description naming the client origin, the text a token
//! prompt would show.

use super::store::{ItemMetadata, ItemStore};
use super::{ProviderInfo, StorageContext};
use crate::crypto::AlgorithmName;

/// Identifier the hybrid provider registers under
pub const HYBRID_PROVIDER_ID: &str = "hybrid";

pub struct HybridBackend {
    pub(super) store: ItemStore,
}

impl HybridBackend {
    pub fn new(store: ItemStore) -> Self {
        Self { store }
    }

    pub fn info() -> ProviderInfo {
        ProviderInfo {
            id: HYBRID_PROVIDER_ID.to_string(),
            display_name: "Keyward Hybrid".to_string(),
            reader_name: None,
            serial_number: None,
            is_removable: false,
            is_hardware: false,
            requires_login: false,
            supported_algorithms: AlgorithmName::ALL.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub(super) fn metadata(&self, context: &StorageContext) -> ItemMetadata {
        ItemMetadata {
            label: context.label.clone(),
            description: Some(describe(&context.origin, context.label.as_deref())),
        }
    }
}

/// Description shown for an item stored by `origin`.
pub fn describe(origin: &str, label: Option<&str>) -> String {
    match label {
        Some(label) if !label.trim().is_empty() => format!("{} (stored by {origin})", label.trim()),
        _ => format!("Stored by {origin}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        assert_eq!(
            describe("https://app.example", Some("Signing key")),
            "Signing key (stored by https://app.example)"
        );
        assert_eq!(describe("https://app.example", Some("  ")), "Stored by https://app.example");
        assert_eq!(describe("unknown", None), "Stored by unknown");
    }
}
