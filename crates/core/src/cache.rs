//! Plan Cache (spec.md §4.2): exact-fingerprint and semantic
//! (cosine-similarity) lookup, LRU-by-`last_used_at` eviction, lazy TTL
//! expiry.
//!
//! Grounded on the teacher's `EventBus` (`agent::event_bus`), which
//! reaches for `parking_lot::RwLock`/`Mutex` over `std::sync` for
//! exactly this kind of shared, moderately-contended registry. A
//! pre-built LRU or `moka::future::Cache` doesn't expose the exact mix
//! of policies the spec requires (linear similarity scan for misses,
//! LRU eviction only by `last_used_at`, separate exact vs. semantic hit
//! reporting) without fighting its API, so the cache is hand-rolled
//! around a plain `RwLock<HashMap>`.

use crate::instruction::{Fingerprint, NormalizedInstruction, fingerprint};
use crate::plan::{Embedding, Plan};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A cached plan with the retention bookkeeping from spec.md §3.
#[derive(Debug, Clone)]
pub struct CachedPlan {
    pub fingerprint: Fingerprint,
    pub embedding: Option<Embedding>,
    pub plan: Plan,
    pub inserted_at: Instant,
    pub last_used_at: Instant,
    pub use_count: u64,
}

/// Why a lookup succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOrigin {
    ExactHit,
    SemanticHit,
}

/// `stats()` output (spec §4.2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner {
    entries: HashMap<Fingerprint, CachedPlan>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct PlanCache {
    inner: RwLock<Inner>,
    max_size: usize,
    sim_threshold: f32,
    ttl: Duration,
}

impl PlanCache {
    pub fn new(max_size: usize, sim_threshold: f32, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_size,
            sim_threshold,
            ttl,
        }
    }

    fn is_expired(&self, entry: &CachedPlan, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) > self.ttl
    }

    /// Look up a plan for a normalized instruction. Computes the
    /// fingerprint for an exact check; on miss, falls back to the
    /// caller-supplied embedding for a semantic scan. Entries past
    /// `CACHE_TTL` are treated as absent and lazily dropped (spec §4.2
    /// "Time-based expiry").
    pub fn lookup(
        &self,
        normalized: &NormalizedInstruction,
        embedding: Option<&Embedding>,
    ) -> Option<(Plan, CacheOrigin)> {
        let fp = fingerprint(normalized);
        let now = Instant::now();

        {
            let mut inner = self.inner.write();
            if self.expire_one(&mut inner, fp, now) {
                // fallthrough to miss/semantic path below
            } else if let Some(entry) = inner.entries.get_mut(&fp) {
                entry.last_used_at = now;
                entry.use_count += 1;
                inner.hits += 1;
                return Some((entry.plan.clone(), CacheOrigin::ExactHit));
            }
        }

        let Some(query) = embedding else {
            self.inner.write().misses += 1;
            return None;
        };

        let mut inner = self.inner.write();
        // Drop any other TTL-expired entries encountered during the scan
        // (lazy expiry is opportunistic, not a background sweep).
        let expired: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(_, e)| self.is_expired(e, now))
            .map(|(fp, _)| *fp)
            .collect();
        for fp in expired {
            inner.entries.remove(&fp);
        }

        let best = inner
            .entries
            .values()
            .filter_map(|e| e.embedding.as_ref().map(|emb| (e.fingerprint, emb.cosine_similarity(query))))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((best_fp, sim)) if sim >= self.sim_threshold => {
                let entry = inner.entries.get_mut(&best_fp).expect("entry exists");
                entry.last_used_at = now;
                entry.use_count += 1;
                inner.hits += 1;
                Some((entry.plan.clone(), CacheOrigin::SemanticHit))
            }
            _ => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Returns true if the fingerprint's entry was present but expired
    /// (and has now been removed).
    fn expire_one(&self, inner: &mut Inner, fp: Fingerprint, now: Instant) -> bool {
        if let Some(entry) = inner.entries.get(&fp)
            && self.is_expired(entry, now)
        {
            inner.entries.remove(&fp);
            return true;
        }
        false
    }

    /// Insert a plan for a normalized instruction. Evicts the
    /// least-recently-used entry first if the cache is at capacity.
    /// Embedding failure (spec §4.2 "Failure modes") degrades to
    /// exact-only storage — the caller passes `None`, never a hard
    /// error.
    pub fn insert(&self, normalized: &NormalizedInstruction, embedding: Option<Embedding>, plan: Plan) {
        let fp = fingerprint(normalized);
        let now = Instant::now();
        let mut inner = self.inner.write();

        if !inner.entries.contains_key(&fp) && inner.entries.len() >= self.max_size {
            if let Some(lru_fp) = inner
                .entries
                .values()
                .min_by_key(|e| e.last_used_at)
                .map(|e| e.fingerprint)
            {
                inner.entries.remove(&lru_fp);
                inner.evictions += 1;
            }
        }

        inner.entries.insert(
            fp,
            CachedPlan {
                fingerprint: fp,
                embedding,
                plan,
                inserted_at: now,
                last_used_at: now,
                use_count: 0,
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        CacheStats {
            size: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    pub fn size(&self) -> usize {
        self.inner.read().entries.len()
    }
}
