//! Provider-scoped key and certificate storage
//!
//! Items are indexed by a content-derived storage key
//! (`<kind>-<fingerprint prefix>`), so storing the same key twice yields the
//! same storage key and `index_of` is a lookup rather than a scan.
//!
//! When persistence is configured the whole store is sealed into one JSON
//! file under the storage directory and rewritten after every mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::crypto::seal::{SealedBox, Sealer};
use crate::crypto::{
    Certificate, CertificateType, CryptoKey, KeyAlgorithm, KeyFormat, KeyType, KeyUsages,
};
use crate::types::{KeywardError, Result};

/// Fingerprint hex characters used in storage keys
const STORAGE_KEY_FINGERPRINT_LEN: usize = 16;

/// Key as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKey {
    #[serde(rename = "type")]
    pub kind: KeyType,
    pub algorithm: KeyAlgorithm,
    pub extractable: bool,
    pub usages: KeyUsages,
    /// Base64 of the native storage format (raw, spki or pkcs8)
    pub material: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Certificate as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCertificate {
    #[serde(rename = "type")]
    pub kind: CertificateType,
    /// Base64 DER
    pub der: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Human-readable metadata attached to a stored item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMetadata {
    pub label: Option<String>,
    pub description: Option<String>,
}

/// Serialized form of the whole store
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    keys: BTreeMap<String, StoredKey>,
    #[serde(default)]
    certificates: BTreeMap<String, StoredCertificate>,
}

struct Persistence {
    path: PathBuf,
    sealer: Sealer,
    /// Serializes snapshot + write so the file always holds the latest state
    write_lock: Mutex<()>,
}

/// Storage key for a key object
pub fn key_storage_key(key: &CryptoKey) -> String {
    let fingerprint = key.fingerprint();
    format!("{}-{}", key.kind(), &fingerprint[..STORAGE_KEY_FINGERPRINT_LEN])
}

/// Storage key for a certificate
pub fn cert_storage_key(certificate: &Certificate) -> String {
    let fingerprint = certificate.fingerprint();
    format!(
        "{}-{}",
        certificate.kind(),
        &fingerprint[..STORAGE_KEY_FINGERPRINT_LEN]
    )
}

/// Key and certificate storage for one provider
pub struct ItemStore {
    keys: DashMap<String, StoredKey>,
    certificates: DashMap<String, StoredCertificate>,
    persistence: Option<Persistence>,
}

impl ItemStore {
    /// In-memory store
    pub fn memory() -> Self {
        Self {
            keys: DashMap::new(),
            certificates: DashMap::new(),
            persistence: None,
        }
    }

    /// Store sealed into `<dir>/<provider_id>.sealed.json`, loading any
    /// existing contents.
    pub async fn persistent(dir: &Path, provider_id: &str, passphrase: &str) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{provider_id}.sealed.json"));

        let passphrase_owned = passphrase.to_string();
        let (sealer, document) = if tokio::fs::try_exists(&path).await? {
            let raw = tokio::fs::read(&path).await?;
            let sealed: SealedBox = serde_json::from_slice(&raw)?;
            // Argon2id derivation blocks; run it on the blocking pool.
            tokio::task::spawn_blocking(move || -> Result<(Sealer, StoreDocument)> {
                let sealer = Sealer::for_box(&passphrase_owned, &sealed)?;
                let plaintext = sealer.open(&sealed)?;
                let document: StoreDocument = serde_json::from_slice(&plaintext)?;
                Ok((sealer, document))
            })
            .await
            .map_err(|e| KeywardError::Internal(format!("storage load task failed: {e}")))??
        } else {
            let sealer = tokio::task::spawn_blocking(move || Sealer::new(&passphrase_owned))
                .await
                .map_err(|e| KeywardError::Internal(format!("storage init task failed: {e}")))??;
            (sealer, StoreDocument::default())
        };

        info!(
            path = %path.display(),
            keys = document.keys.len(),
            certificates = document.certificates.len(),
            "Opened sealed provider storage"
        );

        Ok(Self {
            keys: document.keys.into_iter().collect(),
            certificates: document.certificates.into_iter().collect(),
            persistence: Some(Persistence {
                path,
                sealer,
                write_lock: Mutex::new(()),
            }),
        })
    }

    async fn flush(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let _guard = persistence.write_lock.lock().await;

        let document = StoreDocument {
            keys: self
                .keys
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            certificates: self
                .certificates
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(&document)?);
        let sealed = persistence.sealer.seal(&plaintext)?;

        let tmp = persistence.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&sealed)?).await?;
        tokio::fs::rename(&tmp, &persistence.path).await?;
        debug!(path = %persistence.path.display(), "Flushed provider storage");
        Ok(())
    }

    // =========================================================================
    // Keys
    // =========================================================================

    /// Restore a stored key.
    pub fn get_key(&self, storage_key: &str) -> Result<Option<CryptoKey>> {
        let Some(stored) = self.keys.get(storage_key).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let material = BASE64
            .decode(&stored.material)
            .map_err(|e| KeywardError::Storage(format!("stored key {storage_key}: {e}")))?;
        let format = match stored.kind {
            KeyType::Secret => KeyFormat::Raw,
            KeyType::Public => KeyFormat::Spki,
            KeyType::Private => KeyFormat::Pkcs8,
        };
        let key = CryptoKey::deserialize_material(
            format,
            &material,
            &stored.algorithm,
            stored.extractable,
            stored.usages.clone(),
        )
        .map_err(|e| KeywardError::Storage(format!("stored key {storage_key}: {e}")))?;
        Ok(Some(key))
    }

    pub fn key_metadata(&self, storage_key: &str) -> Option<ItemMetadata> {
        self.keys.get(storage_key).map(|e| ItemMetadata {
            label: e.label.clone(),
            description: e.description.clone(),
        })
    }

    /// Store a key; returns its storage key. Storing the same key again
    /// replaces its metadata.
    pub async fn set_key(&self, key: &CryptoKey, metadata: ItemMetadata) -> Result<String> {
        let material = key
            .serialize_material(key.storage_format())
            .map_err(|e| KeywardError::Storage(format!("cannot serialize key: {e}")))?;
        let storage_key = key_storage_key(key);
        self.keys.insert(
            storage_key.clone(),
            StoredKey {
                kind: key.kind(),
                algorithm: key.algorithm().clone(),
                extractable: key.extractable(),
                usages: key.usages().clone(),
                material: BASE64.encode(&material),
                label: metadata.label,
                description: metadata.description,
                created_at: Utc::now(),
            },
        );
        self.flush().await?;
        Ok(storage_key)
    }

    /// Remove a key. Unknown storage keys are ignored.
    pub async fn remove_key(&self, storage_key: &str) -> Result<()> {
        if self.keys.remove(storage_key).is_some() {
            self.flush().await?;
        }
        Ok(())
    }

    pub fn key_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.keys.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn index_of_key(&self, key: &CryptoKey) -> Option<String> {
        let storage_key = key_storage_key(key);
        self.keys.contains_key(&storage_key).then_some(storage_key)
    }

    pub async fn clear_keys(&self) -> Result<()> {
        self.keys.clear();
        self.flush().await
    }

    // =========================================================================
    // Certificates
    // =========================================================================

    pub fn get_certificate(&self, storage_key: &str) -> Result<Option<Certificate>> {
        let Some(stored) = self.certificates.get(storage_key).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let der = BASE64
            .decode(&stored.der)
            .map_err(|e| KeywardError::Storage(format!("stored certificate {storage_key}: {e}")))?;
        let certificate = Certificate::new(stored.kind, der, stored.label)
            .map_err(|e| KeywardError::Storage(format!("stored certificate {storage_key}: {e}")))?;
        Ok(Some(certificate))
    }

    pub fn certificate_metadata(&self, storage_key: &str) -> Option<ItemMetadata> {
        self.certificates.get(storage_key).map(|e| ItemMetadata {
            label: e.label.clone(),
            description: e.description.clone(),
        })
    }

    pub async fn set_certificate(
        &self,
        certificate: &Certificate,
        metadata: ItemMetadata,
    ) -> Result<String> {
        let storage_key = cert_storage_key(certificate);
        self.certificates.insert(
            storage_key.clone(),
            StoredCertificate {
                kind: certificate.kind(),
                der: BASE64.encode(certificate.der()),
                label: metadata.label.or_else(|| certificate.label().map(str::to_string)),
                description: metadata.description,
                created_at: Utc::now(),
            },
        );
        self.flush().await?;
        Ok(storage_key)
    }

    pub async fn remove_certificate(&self, storage_key: &str) -> Result<()> {
        if self.certificates.remove(storage_key).is_some() {
            self.flush().await?;
        }
        Ok(())
    }

    pub fn certificate_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.certificates.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn index_of_certificate(&self, certificate: &Certificate) -> Option<String> {
        let storage_key = cert_storage_key(certificate);
        self.certificates
            .contains_key(&storage_key)
            .then_some(storage_key)
    }

    pub async fn clear_certificates(&self) -> Result<()> {
        self.certificates.clear();
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::engine;
    use crate::crypto::{AlgorithmName, GeneratedKey, KeyUsage, NamedCurve};

    fn signing_pair() -> (CryptoKey, CryptoKey) {
        match engine::generate_key(
            &KeyAlgorithm::ec(AlgorithmName::Ecdsa, NamedCurve::P256),
            false,
            KeyUsages::new(vec![KeyUsage::Sign, KeyUsage::Verify]),
        )
        .unwrap()
        {
            GeneratedKey::Pair { public, private } => (public, private),
            GeneratedKey::Single(_) => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_set_get_index_remove() {
        let store = ItemStore::memory();
        let (public, private) = signing_pair();

        let storage_key = store.set_key(&private, ItemMetadata::default()).await.unwrap();
        assert!(storage_key.starts_with("private-"));
        assert_eq!(store.index_of_key(&private), Some(storage_key.clone()));
        assert_eq!(store.index_of_key(&public), None);

        let restored = store.get_key(&storage_key).unwrap().unwrap();
        assert_eq!(restored.fingerprint(), private.fingerprint());
        assert!(!restored.extractable());
        assert_eq!(restored.usages(), private.usages());

        store.remove_key(&storage_key).await.unwrap();
        store.remove_key(&storage_key).await.unwrap();
        assert!(store.get_key(&storage_key).unwrap().is_none());
        assert!(store.key_names().is_empty());
    }

    #[tokio::test]
    async fn test_same_secret_under_two_algorithms_stores_twice() {
        let store = ItemStore::memory();
        let secret = [9u8; 32];
        let aes = CryptoKey::deserialize_material(
            KeyFormat::Raw,
            &secret,
            &KeyAlgorithm::aes_gcm(256),
            true,
            KeyUsages::new(vec![KeyUsage::Encrypt]),
        )
        .unwrap();
        let hmac = CryptoKey::deserialize_material(
            KeyFormat::Raw,
            &secret,
            &KeyAlgorithm::hmac(crate::crypto::HashAlgorithm::Sha256, 256),
            true,
            KeyUsages::new(vec![KeyUsage::Sign]),
        )
        .unwrap();

        let aes_key = store.set_key(&aes, ItemMetadata::default()).await.unwrap();
        let hmac_key = store.set_key(&hmac, ItemMetadata::default()).await.unwrap();
        assert_ne!(aes_key, hmac_key);
        assert_eq!(store.key_names().len(), 2);
        assert_eq!(
            store.get_key(&hmac_key).unwrap().unwrap().algorithm().name,
            AlgorithmName::Hmac
        );
    }

    #[tokio::test]
    async fn test_storage_key_is_content_derived() {
        let store = ItemStore::memory();
        let (_, private) = signing_pair();
        let first = store.set_key(&private, ItemMetadata::default()).await.unwrap();
        let second = store.set_key(&private, ItemMetadata::default()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.key_names().len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_store_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let (_, private) = signing_pair();
        let certificate =
            Certificate::new(CertificateType::X509, vec![0x30, 0x00], Some("ca".into())).unwrap();

        let storage_key = {
            let store = ItemStore::persistent(dir.path(), "software", "pass").await.unwrap();
            store
                .set_certificate(&certificate, ItemMetadata::default())
                .await
                .unwrap();
            store
                .set_key(
                    &private,
                    ItemMetadata {
                        label: Some("signing".into()),
                        description: None,
                    },
                )
                .await
                .unwrap()
        };

        let reopened = ItemStore::persistent(dir.path(), "software", "pass").await.unwrap();
        let restored = reopened.get_key(&storage_key).unwrap().unwrap();
        assert_eq!(restored.fingerprint(), private.fingerprint());
        assert_eq!(
            reopened.key_metadata(&storage_key).unwrap().label.as_deref(),
            Some("signing")
        );
        assert_eq!(reopened.certificate_names().len(), 1);

        assert!(ItemStore::persistent(dir.path(), "software", "wrong").await.is_err());
    }
}
