//! RRSIG Signature Cache
//!
//! Signatures are expensive to compute and the same RRsets are answered over
//! and over, so every signature is cached under the fingerprint of the RRset
//! it covers. Entries are shared by all worker threads; callers always get
//! their own copy because an entry can be evicted right after it was read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use super::dns_types::{current_timestamp, Rrsig};
use super::fingerprint::Fingerprint;
use crate::lock_utils::{read_lock_or_recover, write_lock_or_recover};

/// Remaining validity a cached signature must still have (24 hours)
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(24 * 3600);

/// Default bound on the number of cached signatures
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Lookups that found an entry too close to expiry
    pub stale: u64,
    /// Entries removed by eviction, sweeping or the size bound
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate in percent
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Thread-safe fingerprint -> RRSIG cache
pub struct SignatureCache {
    entries: RwLock<HashMap<Fingerprint, Rrsig>>,
    max_entries: usize,
    refresh_margin: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    evictions: AtomicU64,
}

impl SignatureCache {
    /// Create a cache with the default bound and refresh margin
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_ENTRIES, DEFAULT_REFRESH_MARGIN)
    }

    /// Create a cache holding at most `max_entries` signatures that are
    /// considered stale once less than `refresh_margin` validity is left
    pub fn with_limits(max_entries: usize, refresh_margin: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            refresh_margin: refresh_margin.as_secs(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Whether `sig` can still be served at `now` (Unix seconds)
    pub fn is_fresh(&self, sig: &Rrsig, now: u64) -> bool {
        now >= sig.inception as u64 && now + self.refresh_margin <= sig.expiration as u64
    }

    /// Return a copy of the cached signature, fresh or not
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<Rrsig> {
        let entries = read_lock_or_recover(&self.entries, "signature cache");
        entries.get(fingerprint).cloned()
    }

    /// Return a copy of the cached signature if it is still fresh at `now`.
    ///
    /// A stale entry is evicted so the caller can sign again.
    pub fn get_fresh(&self, fingerprint: &Fingerprint, now: u64) -> Option<Rrsig> {
        let sig = match self.lookup(fingerprint) {
            Some(sig) => sig,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if self.is_fresh(&sig, now) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("DNS signature for {:?} retrieved from cache", fingerprint);
            return Some(sig);
        }

        self.stale.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);

        // Someone may have replaced the entry since we read it
        let mut entries = write_lock_or_recover(&self.entries, "signature cache");
        if entries.get(fingerprint).is_some_and(|current| !self.is_fresh(current, now)) {
            entries.remove(fingerprint);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Evicted stale signature for {:?} (expires {})",
                fingerprint, sig.expiration
            );
        }
        None
    }

    /// Insert a signature unless one is already cached for `fingerprint`.
    ///
    /// Returns whether the signature was inserted. When the cache is full
    /// the entry closest to expiry makes room.
    pub fn store(&self, fingerprint: Fingerprint, sig: Rrsig) -> bool {
        let mut entries = write_lock_or_recover(&self.entries, "signature cache");
        if entries.contains_key(&fingerprint) {
            return false;
        }

        if entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, cached)| cached.expiration)
                .map(|(fp, _)| *fp);
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Signature cache full, dropped {:?}", oldest);
            }
        }

        entries.insert(fingerprint, sig);
        true
    }

    /// Remove the signature cached for `fingerprint`
    pub fn evict(&self, fingerprint: &Fingerprint) -> bool {
        let mut entries = write_lock_or_recover(&self.entries, "signature cache");
        let removed = entries.remove(fingerprint).is_some();
        if removed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Drop every entry that is no longer fresh at `now`; returns how many
    pub fn sweep(&self, now: u64) -> usize {
        let mut entries = write_lock_or_recover(&self.entries, "signature cache");
        let before = entries.len();
        entries.retain(|_, sig| self.is_fresh(sig, now));
        let removed = before - entries.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Number of cached signatures
    pub fn len(&self) -> usize {
        read_lock_or_recover(&self.entries, "signature cache").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Run [`sweep`](Self::sweep) every `every` on the tokio runtime
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(every);
            loop {
                timer.tick().await;
                let removed = self.sweep(current_timestamp());
                if removed > 0 {
                    info!("Swept {} stale signatures from cache", removed);
                }
            }
        })
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::dns_types::DnsRecordType;

    const NOW: u64 = 1_700_000_000;
    const DAY: u64 = 86_400;

    fn sig(inception: u64, expiration: u64) -> Rrsig {
        Rrsig {
            type_covered: DnsRecordType::A,
            algorithm: 15,
            labels: 3,
            original_ttl: 60,
            expiration: expiration as u32,
            inception: inception as u32,
            key_tag: 12345,
            signer_name: "skydns.local.".to_string(),
            signature: vec![1, 2, 3, 4],
        }
    }

    fn fp(name: &str) -> Fingerprint {
        Fingerprint::of_records(name, 1, &[])
    }

    #[test]
    fn test_lookup_returns_equal_copy() {
        let cache = SignatureCache::new();
        let stored = sig(NOW, NOW + 7 * DAY);
        assert!(cache.store(fp("a."), stored.clone()));

        let mut copy = cache.lookup(&fp("a.")).unwrap();
        assert_eq!(copy, stored);

        // Mutating the copy must not touch the cached entry
        copy.signature.clear();
        copy.key_tag = 1;
        assert_eq!(cache.lookup(&fp("a.")).unwrap(), stored);
    }

    #[test]
    fn test_store_never_overwrites() {
        let cache = SignatureCache::new();
        let first = sig(NOW, NOW + 7 * DAY);
        let second = sig(NOW, NOW + 8 * DAY);

        assert!(cache.store(fp("a."), first.clone()));
        assert!(!cache.store(fp("a."), second));
        assert_eq!(cache.lookup(&fp("a.")).unwrap(), first);
    }

    #[test]
    fn test_evict() {
        let cache = SignatureCache::new();
        cache.store(fp("a."), sig(NOW, NOW + 7 * DAY));
        assert!(cache.evict(&fp("a.")));
        assert!(!cache.evict(&fp("a.")));
        assert!(cache.lookup(&fp("a.")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_freshness_requires_24_hours_left() {
        let cache = SignatureCache::new();
        assert!(cache.is_fresh(&sig(NOW - 3600, NOW + DAY), NOW));
        assert!(!cache.is_fresh(&sig(NOW - 3600, NOW + DAY - 1), NOW));
        // Not yet valid
        assert!(!cache.is_fresh(&sig(NOW + 10, NOW + 7 * DAY), NOW));
    }

    #[test]
    fn test_get_fresh_evicts_stale_entry() {
        let cache = SignatureCache::new();
        cache.store(fp("a."), sig(NOW - 7 * DAY, NOW + 3600));

        assert!(cache.get_fresh(&fp("a."), NOW).is_none());
        assert!(cache.lookup(&fp("a.")).is_none());

        let stats = cache.stats();
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn test_get_fresh_counts_hits() {
        let cache = SignatureCache::new();
        cache.store(fp("a."), sig(NOW, NOW + 7 * DAY));

        assert!(cache.get_fresh(&fp("a."), NOW).is_some());
        assert!(cache.get_fresh(&fp("b."), NOW).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_size_bound_drops_closest_to_expiry() {
        let cache = SignatureCache::with_limits(2, DEFAULT_REFRESH_MARGIN);
        cache.store(fp("a."), sig(NOW, NOW + 2 * DAY));
        cache.store(fp("b."), sig(NOW, NOW + 7 * DAY));
        cache.store(fp("c."), sig(NOW, NOW + 7 * DAY));

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&fp("a.")).is_none());
        assert!(cache.lookup(&fp("b.")).is_some());
        assert!(cache.lookup(&fp("c.")).is_some());
    }

    #[test]
    fn test_sweep_removes_only_stale_entries() {
        let cache = SignatureCache::new();
        cache.store(fp("old."), sig(NOW - 7 * DAY, NOW + 3600));
        cache.store(fp("new."), sig(NOW, NOW + 7 * DAY));

        assert_eq!(cache.sweep(NOW), 1);
        assert!(cache.lookup(&fp("old.")).is_none());
        assert!(cache.lookup(&fp("new.")).is_some());
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let mut stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);

        stats.hits = 75;
        stats.misses = 25;
        assert_eq!(stats.hit_rate(), 75.0);
    }

    #[tokio::test]
    async fn test_sweeper_task_runs() {
        let cache = Arc::new(SignatureCache::new());
        // Expired long ago relative to the wall clock
        cache.store(fp("old."), sig(1_000, 2_000));

        let handle = Arc::clone(&cache).spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(cache.is_empty());
    }
}
