//! In-process stand-in for the shared store.
//!
//! Behaves like a single Redis node (expiry, glob deletion, INFO figures) so
//! single-node deployments and tests can exercise the full two-tier path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use regex::Regex;

use super::{RemoteStore, StoreInfo};
use crate::error::{CacheError, Result};

struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// DashMap-backed [`RemoteStore`].
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    available: AtomicBool,
    connect_attempts: AtomicU64,
    published: Mutex<Vec<(String, String)>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
            connect_attempts: AtomicU64::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Simulate an outage: while unavailable every call fails with a
    /// connection error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Store raw bytes, bypassing serialization.
    pub fn insert_raw(&self, key: impl Into<String>, data: Vec<u8>) {
        self.entries.insert(
            key.into(),
            StoredValue {
                data,
                expires_at: None,
            },
        );
    }

    /// Whether `key` holds a live value.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages published so far, as `(channel, message)`.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CacheError::connection("memory store unavailable"))
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn connect(&self) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        self.check()
    }

    async fn disconnect(&self) {}

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.data.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        self.entries.insert(
            key.to_string(),
            StoredValue {
                data: value.to_vec(),
                expires_at: ttl.map(|ttl| crate::local::deadline(Instant::now(), ttl)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        self.check()?;
        let matcher = glob_to_regex(pattern)
            .map_err(|e| CacheError::connection(format!("invalid pattern {pattern:?}: {e}")))?;
        let now = Instant::now();
        let mut deleted = 0;
        self.entries.retain(|key, entry| {
            if matcher.is_match(key) {
                if !entry.is_expired(now) {
                    deleted += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(deleted)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.check()?;
        self.published
            .lock()
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }

    async fn info(&self) -> Result<StoreInfo> {
        self.check()?;
        let used: usize = self
            .entries
            .iter()
            .map(|entry| entry.key().len() + entry.data.len())
            .sum();
        Ok(StoreInfo {
            used_memory: Some(used as u64),
            connected_clients: Some(1),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Escape `*`, `?`, `[`, `]` and `\` so `literal` matches only itself in a glob.
pub fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Translate a Redis glob (`*`, `?`, `[...]`, `\x`) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                out.push('[');
                let mut first = true;
                for c in chars.by_ref() {
                    match c {
                        ']' => break,
                        '^' if first => out.push('^'),
                        '\\' | '[' | '&' | '~' => {
                            out.push('\\');
                            out.push(c);
                        }
                        _ => out.push(c),
                    }
                    first = false;
                }
                out.push(']');
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    out.push('$');
    Regex::new(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matching() {
        let star = glob_to_regex("user:*").unwrap();
        assert!(star.is_match("user:1"));
        assert!(star.is_match("user:"));
        assert!(!star.is_match("post:user:1"));

        let single = glob_to_regex("k?").unwrap();
        assert!(single.is_match("k1"));
        assert!(!single.is_match("k10"));

        let class = glob_to_regex("h[ae]llo").unwrap();
        assert!(class.is_match("hallo"));
        assert!(class.is_match("hello"));
        assert!(!class.is_match("hillo"));

        let negated = glob_to_regex("h[^e]llo").unwrap();
        assert!(negated.is_match("hallo"));
        assert!(!negated.is_match("hello"));

        let literal = glob_to_regex(r"a.b\*").unwrap();
        assert!(literal.is_match("a.b*"));
        assert!(!literal.is_match("axb*"));
        assert!(!literal.is_match("a.bc"));
    }

    #[test]
    fn test_escaped_literals_match_only_themselves() {
        assert_eq!(escape_glob(r"a[1]*?\"), r"a\[1\]\*\?\\");

        let matcher = glob_to_regex(&format!("{}*", escape_glob("t:a[1]"))).unwrap();
        assert!(matcher.is_match("t:a[1]:x"));
        assert!(!matcher.is_match("t:a1:x"));

        let star = glob_to_regex(&escape_glob("v*")).unwrap();
        assert!(star.is_match("v*"));
        assert!(!star.is_match("v1"));
    }

    #[tokio::test]
    async fn test_expiry() {
        let store = MemoryStore::new();
        store
            .set("k", b"v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_unbounded_ttl_is_clamped() {
        let store = MemoryStore::new();
        store.set("k", b"v", Some(Duration::MAX)).await.unwrap();
        assert!(store.contains("k"));
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(store.connect().await.is_err());
        assert!(store.get("k").await.is_err());
        assert!(store.set("k", b"v", None).await.is_err());
        assert!(store.publish("c", "m").await.is_err());
        assert!(store.published().is_empty());
    }
}
