//! In-memory report cache.
//!
//! Each [`crate::ReportEngine`] owns one [`CacheManager`]; there is no
//! process-wide cache. Entries hold the raw recipe result (before
//! formatting), so one entry serves every output format.
//!
//! # Design
//!
//! - Concurrent map keyed by a structured [`CacheKey`]
//! - Per-entry TTL; `-1` never expires, `0` disables caching
//! - Optional single-flight locking per key via [`Coalescer`]
//! - Materialized views live in their own namespaces of the same map
//!
//! # Key Format
//!
//! ```text
//! {org}:report:{recipe}:{param_hash}      -> recipe result
//! {org}:view:{view_name}:-                -> ViewDescriptor
//! {org}:view_data:{view_name}:-           -> recipe result of last refresh
//! ```
//!
//! The organization id is a field of every key, so entries of two
//! organizations can never collide.

mod coalesce;
mod hash;

pub use coalesce::{Coalescer, InflightGuard};
pub use hash::compute_hash;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

/// Lifetime of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum CacheTtl {
    /// `-1`: kept until invalidated.
    Never,
    /// `0`: not cached at all.
    Disabled,
    /// Expires after this many seconds.
    Seconds(u64),
}

impl CacheTtl {
    pub fn from_secs(secs: i64) -> Option<CacheTtl> {
        match secs {
            -1 => Some(CacheTtl::Never),
            0 => Some(CacheTtl::Disabled),
            n if n > 0 => Some(CacheTtl::Seconds(n as u64)),
            _ => None,
        }
    }

    pub fn as_secs(&self) -> i64 {
        match self {
            CacheTtl::Never => -1,
            CacheTtl::Disabled => 0,
            CacheTtl::Seconds(n) => *n as i64,
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self != CacheTtl::Disabled
    }

    fn duration(&self) -> Option<Duration> {
        match self {
            CacheTtl::Seconds(n) => Some(Duration::from_secs(*n)),
            CacheTtl::Never | CacheTtl::Disabled => None,
        }
    }
}

impl TryFrom<i64> for CacheTtl {
    type Error = String;

    fn try_from(secs: i64) -> Result<Self, Self::Error> {
        CacheTtl::from_secs(secs)
            .ok_or_else(|| format!("invalid cache ttl {}: expected -1, 0, or a positive number of seconds", secs))
    }
}

impl From<CacheTtl> for i64 {
    fn from(ttl: CacheTtl) -> Self {
        ttl.as_secs()
    }
}

impl fmt::Display for CacheTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTtl::Never => f.write_str("never"),
            CacheTtl::Disabled => f.write_str("disabled"),
            CacheTtl::Seconds(n) => write!(f, "{}s", n),
        }
    }
}

/// What a cache entry stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    Report,
    View,
    ViewData,
}

impl CacheNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Report => "report",
            CacheNamespace::View => "view",
            CacheNamespace::ViewData => "view_data",
        }
    }
}

/// Structured cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub organization_id: String,
    pub namespace: CacheNamespace,
    /// Recipe name for reports, view name for views.
    pub name: String,
    /// Hash of the bound parameters; empty for views.
    pub parameter_hash: String,
}

impl CacheKey {
    pub fn report(
        organization_id: impl Into<String>,
        recipe: impl Into<String>,
        parameter_hash: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            namespace: CacheNamespace::Report,
            name: recipe.into(),
            parameter_hash: parameter_hash.into(),
        }
    }

    pub fn view(organization_id: impl Into<String>, view_name: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            namespace: CacheNamespace::View,
            name: view_name.into(),
            parameter_hash: String::new(),
        }
    }

    pub fn view_data(organization_id: impl Into<String>, view_name: impl Into<String>) -> Self {
        Self {
            namespace: CacheNamespace::ViewData,
            ..Self::view(organization_id, view_name)
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hash = if self.parameter_hash.is_empty() {
            "-"
        } else {
            &self.parameter_hash
        };
        write!(
            f,
            "{}:{}:{}:{}",
            self.organization_id,
            self.namespace.as_str(),
            self.name,
            hash
        )
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    created_at: DateTime<Utc>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of entries in the cache, expired ones included until purged.
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because they expired.
    pub evictions: u64,
}

/// Report cache with TTL and single-flight support.
#[derive(Debug)]
pub struct CacheManager {
    entries: DashMap<CacheKey, CacheEntry>,
    default_ttl: CacheTtl,
    coalescer: Coalescer,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheTtl::Seconds(300))
    }
}

impl CacheManager {
    pub fn new(default_ttl: CacheTtl) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            coalescer: Coalescer::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// TTL applied when a recipe does not set one.
    pub fn default_ttl(&self) -> CacheTtl {
        self.default_ttl
    }

    /// Get a live entry. Expired entries are removed and count as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        let found = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.payload.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match found {
            Some(payload) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(payload)
            }
            None => {
                if self
                    .entries
                    .remove_if(key, |_, entry| entry.is_expired(now))
                    .is_some()
                {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// When the live entry under `key` was written.
    pub fn created_at(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.created_at)
    }

    /// Store `payload` under `key`. A disabled TTL stores nothing; a TTL past
    /// the clock's range never expires.
    pub fn insert(&self, key: CacheKey, payload: Value, ttl: CacheTtl) {
        if !ttl.is_enabled() {
            return;
        }
        tracing::debug!(key = %key, ttl = %ttl, "cache write");
        let entry = CacheEntry {
            payload,
            created_at: Utc::now(),
            expires_at: ttl.duration().and_then(|d| Instant::now().checked_add(d)),
        };
        self.entries.insert(key, entry);
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        self.entries.get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Drop report entries whose recipe name matches `pattern` (`*` and `?`
    /// wildcards), optionally restricted to one organization. Views are kept.
    pub fn invalidate_pattern(&self, organization_id: Option<&str>, pattern: &str) -> usize {
        let Some(matcher) = glob_regex(pattern) else {
            tracing::warn!(pattern, "invalid invalidation pattern");
            return 0;
        };
        self.remove_where(|key| {
            key.namespace == CacheNamespace::Report
                && organization_id.is_none_or(|org| key.organization_id == org)
                && matcher.is_match(&key.name)
        })
    }

    /// Drop the report entries of one recipe in every organization.
    pub fn invalidate_recipe(&self, recipe: &str) -> usize {
        self.remove_where(|key| key.namespace == CacheNamespace::Report && key.name == recipe)
    }

    /// Drop every entry, views included, of one organization.
    pub fn clear_organization(&self, organization_id: &str) -> usize {
        self.remove_where(|key| key.organization_id == organization_id)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove expired entries now instead of on next access.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    /// Keys of one organization in one namespace, sorted by name.
    pub fn keys(&self, organization_id: &str, namespace: CacheNamespace) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| e.key().organization_id == organization_id && e.key().namespace == namespace)
            .map(|e| e.key().clone())
            .collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.parameter_hash.cmp(&b.parameter_hash)));
        keys
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Lock `key` for computation; see [`Coalescer`].
    pub async fn lock(&self, key: &CacheKey) -> InflightGuard<'_> {
        self.coalescer.acquire(&key.to_string()).await
    }

    /// Keys currently locked for computation or awaited.
    pub fn lock_count(&self) -> usize {
        self.coalescer.inflight_count()
    }

    fn remove_where(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !predicate(key));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "cache entries invalidated");
        }
        removed
    }
}

fn glob_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{}$", escaped)).ok()
}
