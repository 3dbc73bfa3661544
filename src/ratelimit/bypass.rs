//! Mutable allowlist of client addresses exempt from rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::error::{FloodgateError, Result};

/// One exempted address and when it was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BypassEntry {
    /// The exempted address, in canonical textual form.
    pub ip: IpAddr,
    /// When the exemption was created.
    pub added_at: DateTime<Utc>,
}

/// Concurrency-safe store of IPs bypassing rate limits.
///
/// The request path calls `is_bypassed` before touching any limiter; the
/// administrative interface mutates the set concurrently. Both sides share
/// one lock, so an edit is visible to the very next membership check.
pub struct BypassStore {
    entries: RwLock<HashMap<IpAddr, DateTime<Utc>>>,
}

impl BypassStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store seeded with `initial` addresses.
    ///
    /// Entries that fail to parse are skipped with a warning rather than
    /// failing startup, matching how boot-time allowlists are usually
    /// maintained by hand.
    pub fn with_initial<I, S>(initial: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = Self::new();
        {
            let mut entries = store.entries.write();
            let now = Utc::now();
            for value in initial {
                match normalize(value.as_ref()) {
                    Ok(ip) => {
                        entries.entry(ip).or_insert(now);
                    }
                    Err(_) => {
                        warn!(value = %value.as_ref(), "Skipping invalid bypass entry");
                    }
                }
            }
        }
        store
    }

    /// Add `ip` to the bypass set and return the normalised address.
    ///
    /// Adding an address that is already present is a no-op that keeps the
    /// original added-at time.
    pub fn add(&self, ip: &str) -> Result<IpAddr> {
        let normalized = normalize(ip)?;
        self.entries
            .write()
            .entry(normalized)
            .or_insert_with(Utc::now);
        Ok(normalized)
    }

    /// Remove `ip` from the bypass set, returning whether it was present.
    pub fn remove(&self, ip: &str) -> Result<bool> {
        let normalized = normalize(ip)?;
        Ok(self.entries.write().remove(&normalized).is_some())
    }

    /// Whether `ip` is configured to bypass limits. `None` never is.
    pub fn is_bypassed(&self, ip: Option<IpAddr>) -> bool {
        match ip {
            Some(ip) => self.entries.read().contains_key(&ip),
            None => false,
        }
    }

    /// Snapshot of all entries, sorted by address.
    pub fn list(&self) -> Vec<BypassEntry> {
        let mut entries: Vec<BypassEntry> = self
            .entries
            .read()
            .iter()
            .map(|(ip, added_at)| BypassEntry {
                ip: *ip,
                added_at: *added_at,
            })
            .collect();
        entries.sort_by_key(|e| e.ip);
        entries
    }

    /// Number of bypass entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for BypassStore {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(value: &str) -> Result<IpAddr> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FloodgateError::Config(
            "IP address must be provided".to_string(),
        ));
    }
    trimmed
        .parse::<IpAddr>()
        .map_err(|_| FloodgateError::Config(format!("'{trimmed}' is not a valid IP address")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_check() {
        let store = BypassStore::new();
        let ip = store.add("203.0.113.5").unwrap();

        assert!(store.is_bypassed(Some(ip)));
        assert!(!store.is_bypassed(Some("203.0.113.6".parse().unwrap())));
        assert!(!store.is_bypassed(None));
    }

    #[test]
    fn test_add_normalizes_input() {
        let store = BypassStore::new();

        let ip = store.add("  2001:0db8::0001  ").unwrap();
        assert_eq!(ip.to_string(), "2001:db8::1");
        assert!(store.is_bypassed(Some("2001:db8::1".parse().unwrap())));
    }

    #[test]
    fn test_add_rejects_invalid_input() {
        let store = BypassStore::new();
        assert!(store.add("").is_err());
        assert!(store.add("not-an-ip").is_err());
        assert!(store.add("256.0.0.1").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicate_add_is_idempotent() {
        let store = BypassStore::new();
        store.add("203.0.113.5").unwrap();
        let first_added_at = store.list()[0].added_at;

        store.add("203.0.113.5").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.list()[0].added_at, first_added_at);
    }

    #[test]
    fn test_remove_reports_presence() {
        let store = BypassStore::new();
        store.add("203.0.113.5").unwrap();

        assert!(store.remove("203.0.113.5").unwrap());
        assert!(!store.remove("203.0.113.5").unwrap());
        assert!(!store.is_bypassed(Some("203.0.113.5".parse().unwrap())));
    }

    #[test]
    fn test_list_is_sorted() {
        let store = BypassStore::new();
        store.add("203.0.113.9").unwrap();
        store.add("10.0.0.1").unwrap();
        store.add("192.168.1.4").unwrap();

        let listed: Vec<String> = store.list().iter().map(|e| e.ip.to_string()).collect();
        assert_eq!(listed, vec!["10.0.0.1", "192.168.1.4", "203.0.113.9"]);
    }

    #[test]
    fn test_with_initial_skips_invalid_entries() {
        let store = BypassStore::with_initial(["203.0.113.5", "bogus", "10.0.0.1"]);
        assert_eq!(store.len(), 2);
        assert!(store.is_bypassed(Some("203.0.113.5".parse().unwrap())));
    }
}
