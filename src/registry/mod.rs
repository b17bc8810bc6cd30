//! Process-wide handle registry
//!
//! Maps opaque handle ids to live key and certificate objects. Ids are a
//! random per-process prefix plus a monotonic counter, so they are unique for
//! the process lifetime and never reused.
//!
//! The wire projection of an object (`KeyHandle` / `CertHandle`) is computed
//! once at insertion and stored with the entry; later reads return that
//! projection unchanged.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{
    Certificate, CertificateType, CryptoKey, KeyAlgorithm, KeyType, KeyUsages,
};

/// Wire projection of a live key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyHandle {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: KeyType,
    pub algorithm: KeyAlgorithm,
    pub extractable: bool,
    pub usages: KeyUsages,
    pub provider_id: String,
}

/// Wire projection of a live certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertHandle {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CertificateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub fingerprint: String,
    pub provider_id: String,
}

/// Live object held server-side
#[derive(Debug, Clone)]
pub enum LiveObject {
    Key(Arc<CryptoKey>),
    Certificate(Arc<Certificate>),
}

/// Kind of object behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Key,
    Certificate,
}

impl LiveObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            LiveObject::Key(_) => ObjectKind::Key,
            LiveObject::Certificate(_) => ObjectKind::Certificate,
        }
    }
}

#[derive(Debug, Clone)]
enum Projection {
    Key(KeyHandle),
    Certificate(CertHandle),
}

#[derive(Debug, Clone)]
struct Entry {
    object: LiveObject,
    provider_id: String,
    projection: Projection,
}

/// A resolved key handle
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub key: Arc<CryptoKey>,
    pub handle: KeyHandle,
}

/// A resolved certificate handle
#[derive(Debug, Clone)]
pub struct ResolvedCertificate {
    pub certificate: Arc<Certificate>,
    pub handle: CertHandle,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Handle not found: {0}")]
    NotFound(String),

    #[error("Handle {id} is not a {expected}")]
    WrongKind { id: String, expected: &'static str },

    #[error("Handle registry is full ({0} live handles)")]
    Full(usize),
}

/// Registry counters
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Total number of handles issued
    pub inserts: AtomicU64,

    /// Total number of successful lookups
    pub hits: AtomicU64,

    /// Total number of lookups for unknown ids
    pub misses: AtomicU64,

    /// Total number of handles removed
    pub removals: AtomicU64,
}

/// Point-in-time copy of [`RegistryStats`]
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatsSnapshot {
    pub live: usize,
    pub inserts: u64,
    pub hits: u64,
    pub misses: u64,
    pub removals: u64,
}

/// Process-wide id → live object map
pub struct HandleRegistry {
    entries: DashMap<String, Entry>,
    prefix: String,
    counter: AtomicU64,
    /// Live entry count, reserved before insertion so capacity holds under
    /// concurrent inserts
    live: AtomicUsize,
    max_handles: usize,
    stats: RegistryStats,
}

impl HandleRegistry {
    pub fn new(max_handles: usize) -> Self {
        let mut prefix = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut prefix);
        Self {
            entries: DashMap::new(),
            prefix: hex::encode(prefix),
            counter: AtomicU64::new(0),
            live: AtomicUsize::new(0),
            max_handles,
            stats: RegistryStats::default(),
        }
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{:x}", self.prefix, n)
    }

    fn reserve(&self) -> Result<(), RegistryError> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.max_handles).then_some(live + 1)
            })
            .map(|_| ())
            .map_err(|_| RegistryError::Full(self.max_handles))
    }

    fn release(&self, count: usize) {
        if count > 0 {
            self.live.fetch_sub(count, Ordering::AcqRel);
            self.stats.removals.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Reserve capacity and allocate the next id.
    fn reserve_id(&self) -> Result<String, RegistryError> {
        self.reserve()?;
        Ok(self.next_id())
    }

    fn commit(&self, id: String, object: LiveObject, provider_id: &str, projection: Projection) {
        self.entries.insert(
            id,
            Entry {
                object,
                provider_id: provider_id.to_string(),
                projection,
            },
        );
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Register a key and return its handle projection.
    pub fn add_key(&self, key: CryptoKey, provider_id: &str) -> Result<KeyHandle, RegistryError> {
        let id = self.reserve_id()?;
        let handle = KeyHandle {
            id: id.clone(),
            kind: key.kind(),
            algorithm: key.algorithm().clone(),
            extractable: key.extractable(),
            usages: key.usages().clone(),
            provider_id: provider_id.to_string(),
        };
        self.commit(
            id,
            LiveObject::Key(Arc::new(key)),
            provider_id,
            Projection::Key(handle.clone()),
        );
        Ok(handle)
    }

    /// Register both halves of a key pair, or neither.
    pub fn add_key_pair(
        &self,
        public: CryptoKey,
        private: CryptoKey,
        provider_id: &str,
    ) -> Result<(KeyHandle, KeyHandle), RegistryError> {
        let public = self.add_key(public, provider_id)?;
        match self.add_key(private, provider_id) {
            Ok(private) => Ok((public, private)),
            Err(e) => {
                self.remove(&public.id);
                Err(e)
            }
        }
    }

    /// Register a certificate and return its handle projection.
    pub fn add_certificate(
        &self,
        certificate: Certificate,
        provider_id: &str,
    ) -> Result<CertHandle, RegistryError> {
        let id = self.reserve_id()?;
        let handle = CertHandle {
            id: id.clone(),
            kind: certificate.kind(),
            label: certificate.label().map(str::to_string),
            fingerprint: certificate.fingerprint(),
            provider_id: provider_id.to_string(),
        };
        self.commit(
            id,
            LiveObject::Certificate(Arc::new(certificate)),
            provider_id,
            Projection::Certificate(handle.clone()),
        );
        Ok(handle)
    }

    /// Look up any live object and its owning provider.
    pub fn get(&self, id: &str) -> Result<(LiveObject, String), RegistryError> {
        match self.entries.get(id) {
            Some(entry) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok((entry.object.clone(), entry.provider_id.clone()))
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Err(RegistryError::NotFound(id.to_string()))
            }
        }
    }

    pub fn get_key(&self, id: &str) -> Result<ResolvedKey, RegistryError> {
        let entry = self.entries.get(id).map(|e| e.value().clone());
        match entry {
            Some(Entry {
                object: LiveObject::Key(key),
                projection: Projection::Key(handle),
                ..
            }) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(ResolvedKey { key, handle })
            }
            Some(_) => Err(RegistryError::WrongKind {
                id: id.to_string(),
                expected: "key",
            }),
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Err(RegistryError::NotFound(id.to_string()))
            }
        }
    }

    pub fn get_certificate(&self, id: &str) -> Result<ResolvedCertificate, RegistryError> {
        let entry = self.entries.get(id).map(|e| e.value().clone());
        match entry {
            Some(Entry {
                object: LiveObject::Certificate(certificate),
                projection: Projection::Certificate(handle),
                ..
            }) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(ResolvedCertificate { certificate, handle })
            }
            Some(_) => Err(RegistryError::WrongKind {
                id: id.to_string(),
                expected: "certificate",
            }),
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Err(RegistryError::NotFound(id.to_string()))
            }
        }
    }

    /// Drop a handle. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) {
        if self.entries.remove(id).is_some() {
            self.release(1);
        }
    }

    /// Drop every handle.
    pub fn clear(&self) {
        let mut removed = 0;
        self.entries.retain(|_, _| {
            removed += 1;
            false
        });
        self.release(removed);
    }

    /// Drop every handle of `kind` owned by `provider_id`.
    pub fn clear_provider(&self, provider_id: &str, kind: ObjectKind) {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.provider_id != provider_id || entry.object.kind() != kind;
            if !keep {
                removed += 1;
            }
            keep
        });
        self.release(removed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            live: self.live.load(Ordering::Acquire),
            inserts: self.stats.inserts.load(Ordering::Relaxed),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            removals: self.stats.removals.load(Ordering::Relaxed),
        }
    }
}
