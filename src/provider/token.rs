//! Hardware token provider
//!
//! A PIN-protected token slot. Keys created on the token never leave it:
//! private and secret keys are forced non-extractable, compute runs on the
//! blocking pool the way a token round trip would, and storage is
//! token-resident for the lifetime of the slot.

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::store::{ItemMetadata, ItemStore};
use super::{ProviderInfo, StorageContext};
use crate::crypto::{AlgorithmName, CryptoKey, KeyType};

/// Identifier the token provider registers under
pub const TOKEN_PROVIDER_ID: &str = "token";

/// Token slot identity
#[derive(Debug, Clone)]
pub struct TokenSlot {
    pub label: String,
    pub serial: String,
    pub reader: String,
}

pub struct TokenBackend {
    pub(super) store: ItemStore,
    pin: Zeroizing<String>,
    slot: TokenSlot,
}

impl TokenBackend {
    pub fn new(slot: TokenSlot, pin: &str) -> Self {
        Self {
            store: ItemStore::memory(),
            pin: Zeroizing::new(pin.to_string()),
            slot,
        }
    }

    pub fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: TOKEN_PROVIDER_ID.to_string(),
            display_name: self.slot.label.clone(),
            reader_name: Some(self.slot.reader.clone()),
            serial_number: Some(self.slot.serial.clone()),
            is_removable: true,
            is_hardware: true,
            requires_login: true,
            // HKDF is not offered by the token.
            supported_algorithms: AlgorithmName::ALL
                .iter()
                .filter(|a| **a != AlgorithmName::Hkdf)
                .map(|a| a.to_string())
                .collect(),
        }
    }

    /// Compare a candidate PIN in constant time.
    pub fn check_pin(&self, candidate: &str) -> bool {
        let expected = self.pin.as_bytes();
        let candidate = candidate.as_bytes();
        expected.len() == candidate.len() && bool::from(expected.ct_eq(candidate))
    }

    /// Apply the token's extraction policy to a key created on the token.
    pub fn enforce_policy(key: CryptoKey) -> CryptoKey {
        if key.kind() == KeyType::Public {
            key
        } else {
            key.into_non_extractable()
        }
    }

    pub(super) fn metadata(&self, context: &StorageContext) -> ItemMetadata {
        ItemMetadata {
            label: context.label.clone(),
            description: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{engine, GeneratedKey, KeyAlgorithm, KeyUsage, KeyUsages};

    fn slot() -> TokenSlot {
        TokenSlot {
            label: "Test Token".into(),
            serial: "42".into(),
            reader: "Reader 0".into(),
        }
    }

    #[test]
    fn test_check_pin() {
        let token = TokenBackend::new(slot(), "123456");
        assert!(token.check_pin("123456"));
        assert!(!token.check_pin("123457"));
        assert!(!token.check_pin("12345"));
        assert!(!token.check_pin(""));
    }

    #[test]
    fn test_policy_forces_non_extractable() {
        let GeneratedKey::Single(key) = engine::generate_key(
            &KeyAlgorithm::aes_gcm(256),
            true,
            KeyUsages::new(vec![KeyUsage::Encrypt]),
        )
        .unwrap() else {
            panic!("expected a single key");
        };
        assert!(!TokenBackend::enforce_policy(key).extractable());
    }

    #[test]
    fn test_info_flags() {
        let info = TokenBackend::new(slot(), "1").info();
        assert!(info.is_hardware);
        assert!(info.requires_login);
        assert_eq!(info.serial_number.as_deref(), Some("42"));
        assert!(!info.supported_algorithms.contains(&"HKDF".to_string()));
    }
}
