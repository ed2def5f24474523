//! Two-tier expiring cache for analysis payloads.
//!
//! The memory tier is a moka cache whose per-entry expiry mirrors each entry's
//! TTL; the disk tier is a [`CacheStore`]. Memory is authoritative for the
//! lifetime of the process. Disk is recovery state: it warms memory at
//! startup and answers memory misses, promoting hits back into memory.

use crate::error::{CacheIoError, PipelineError};
use crate::oracle::storage::{CacheStore, StoredRecord};
use crate::types::now_millis;
use moka::future::Cache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Deterministic cache key over content, analysis kind and parameters.
///
/// Parameters are sorted first so their order does not matter; every part is
/// length-prefixed so `("ab", "c")` and `("a", "bc")` never collide.
pub fn fingerprint(content: &str, kind: &str, params: &[(&str, &str)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    let mut feed = |part: &str| {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    };
    feed(kind);
    feed(content);
    for (name, value) in sorted {
        feed(name);
        feed(value);
    }
    hex::encode(hasher.finalize())
}

/// A cached payload with its creation time and TTL.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub payload: V,
    /// Unix milliseconds
    pub created_at: u64,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at) < self.ttl.as_millis() as u64
    }

    fn remaining_at(&self, now_ms: u64) -> Duration {
        let age = Duration::from_millis(now_ms.saturating_sub(self.created_at));
        self.ttl.saturating_sub(age)
    }
}

struct EntryExpiry;

impl<V> Expiry<String, CacheEntry<V>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.remaining_at(now_millis()))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining_at(now_millis()))
    }
}

/// Counts of entries removed by a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub memory_removed: usize,
    pub disk_removed: u64,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub io_errors: u64,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    io_errors: AtomicU64,
}

/// Two-tier TTL cache. Safe to share across worker tasks behind an `Arc`.
pub struct CacheManager<V> {
    memory: Cache<String, CacheEntry<V>>,
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
    counters: Counters,
}

impl<V> CacheManager<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        let memory = Cache::builder().expire_after(EntryExpiry).build();
        Self {
            memory,
            store,
            default_ttl,
            counters: Counters::default(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Warm the memory tier from disk, dropping expired or corrupt records.
    #[instrument(skip(self))]
    pub async fn init(&self) -> usize {
        let records = match self.store.load_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Cache warm-up skipped, disk tier unreadable: {:#}", e);
                return 0;
            }
        };

        let now = now_millis();
        let mut warmed = 0;
        for record in records {
            if !record.is_valid_at(now) {
                self.remove_from_disk(&record.key).await;
                continue;
            }
            match self.decode(&record) {
                Ok(entry) => {
                    self.memory.insert(record.key.clone(), entry).await;
                    warmed += 1;
                }
                Err(e) => {
                    report_unreadable(e);
                    self.remove_from_disk(&record.key).await;
                }
            }
        }

        info!("Warmed memory cache with {} entries from disk", warmed);
        warmed
    }

    /// Look up a payload: memory first, then disk with promotion.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = now_millis();

        if let Some(entry) = self.memory.get(key).await {
            if entry.is_valid_at(now) {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.payload);
            }
            debug!("Memory entry {} is stale, purging", key);
            self.memory.invalidate(key).await;
            self.remove_from_disk(key).await;
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let record = match self.store.load(key).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                let err = CacheIoError {
                    key: key.to_string(),
                    reason: format!("{:#}", e),
                };
                report_unreadable(err);
                self.counters.io_errors.fetch_add(1, Ordering::Relaxed);
                self.remove_from_disk(key).await;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if !record.is_valid_at(now) {
            self.remove_from_disk(key).await;
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match self.decode(&record) {
            Ok(entry) => {
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                Some(self.promote(key, entry).await)
            }
            Err(e) => {
                report_unreadable(e);
                self.counters.io_errors.fetch_add(1, Ordering::Relaxed);
                self.remove_from_disk(key).await;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a payload in both tiers. `None` uses the default TTL.
    #[instrument(skip(self, payload))]
    pub async fn set(&self, key: &str, payload: V, ttl: Option<Duration>) {
        let entry = CacheEntry {
            payload,
            created_at: now_millis(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };

        let record = self.encode(key, &entry);
        self.memory.insert(key.to_string(), entry).await;

        if let Some(record) = record {
            if let Err(e) = self.store.save(&record).await {
                warn!("Cache write for {} failed, memory tier only: {:#}", key, e);
                self.counters.io_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Remove every expired entry from both tiers, plus corrupt disk records.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> CleanupReport {
        let now = now_millis();

        let expired: Vec<Arc<String>> = self
            .memory
            .iter()
            .filter(|(_, entry)| !entry.is_valid_at(now))
            .map(|(key, _)| key)
            .collect();
        for key in &expired {
            self.memory.invalidate(key.as_str()).await;
        }
        self.memory.run_pending_tasks().await;

        let mut disk_removed = match self.store.delete_expired(now).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Disk cache sweep failed: {:#}", e);
                0
            }
        };

        if let Ok(records) = self.store.load_all().await {
            for record in records {
                if let Err(e) = self.decode(&record) {
                    report_unreadable(e);
                    self.remove_from_disk(&record.key).await;
                    disk_removed += 1;
                }
            }
        }

        let report = CleanupReport {
            memory_removed: expired.len(),
            disk_removed,
        };
        if report != CleanupReport::default() {
            info!(
                "Cache cleanup removed {} memory and {} disk entries",
                report.memory_removed, report.disk_removed
            );
        }
        report
    }

    /// Drop everything from both tiers.
    pub async fn clear(&self) {
        self.memory.invalidate_all();
        self.memory.run_pending_tasks().await;
        if let Err(e) = self.store.clear().await {
            warn!("Failed to clear disk cache: {:#}", e);
        }
        info!("Cleared analysis cache");
    }

    /// Write every live memory entry to disk. Called on shutdown.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> usize {
        let now = now_millis();
        let mut flushed = 0;
        for (key, entry) in self.memory.iter() {
            if !entry.is_valid_at(now) {
                continue;
            }
            let Some(record) = self.encode(&key, &entry) else {
                continue;
            };
            match self.store.save(&record).await {
                Ok(()) => flushed += 1,
                Err(e) => warn!("Failed to flush {} to disk: {:#}", key, e),
            }
        }
        info!("Flushed {} cache entries to disk", flushed);
        flushed
    }

    /// Number of entries held in memory, after pending evictions settle.
    pub async fn memory_len(&self) -> u64 {
        self.memory.run_pending_tasks().await;
        self.memory.entry_count()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            io_errors: self.counters.io_errors.load(Ordering::Relaxed),
        }
    }

    /// Move a disk hit into memory unless a concurrent `set` got there first,
    /// returning whichever payload ends up resident.
    async fn promote(&self, key: &str, entry: CacheEntry<V>) -> V {
        let resident = self.memory.entry(key.to_string()).or_insert(entry).await;
        if resident.is_fresh() {
            debug!("Promoted {} from disk to memory", key);
        }
        resident.into_value().payload
    }

    fn encode(&self, key: &str, entry: &CacheEntry<V>) -> Option<StoredRecord> {
        match serde_json::to_string(&entry.payload) {
            Ok(payload) => Some(StoredRecord {
                key: key.to_string(),
                payload,
                created_at: entry.created_at,
                ttl_ms: entry.ttl.as_millis() as u64,
            }),
            Err(e) => {
                warn!("Cache payload for {} not serializable: {}", key, e);
                None
            }
        }
    }

    fn decode(&self, record: &StoredRecord) -> Result<CacheEntry<V>, CacheIoError> {
        let payload = serde_json::from_str(&record.payload).map_err(|e| CacheIoError {
            key: record.key.clone(),
            reason: e.to_string(),
        })?;
        Ok(CacheEntry {
            payload,
            created_at: record.created_at,
            ttl: Duration::from_millis(record.ttl_ms),
        })
    }

    async fn remove_from_disk(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!("Failed to delete disk cache record {}: {:#}", key, e);
        }
    }
}

fn report_unreadable(err: CacheIoError) {
    warn!("{}", PipelineError::from(err));
}
