//! In-memory, namespaced key-value cache registered as a singleton service.
//!
//! Initialization creates the `default` namespace; disposal drops every
//! namespace. Entries may carry a time-to-live and read as absent once it
//! has passed. Expired entries are evicted when read and swept from their
//! namespace on every write. A time-to-live too large to represent never
//! expires.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::CacheError;
use crate::registry::Lifecycle;
use crate::service::{Component, Dependencies, Dispose, Initialize, Service};

/// Namespace created by the initialization hook.
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug, Default)]
pub struct CacheService {
    namespaces: DashMap<String, HashMap<String, CacheEntry>>,
}

impl CacheService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_namespace(&self, namespace: &str) -> Result<(), CacheError> {
        match self.namespaces.entry(namespace.to_string()) {
            Entry::Occupied(_) => Err(CacheError::NamespaceExists {
                namespace: namespace.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(HashMap::new());
                debug!(namespace, "cache namespace created");
                Ok(())
            }
        }
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }

    /// Store `value` under `key`, replacing any previous entry.
    ///
    /// Expired entries of the namespace are dropped first.
    pub fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut entries = self.namespace_mut(namespace)?;
        let now = Instant::now();

        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let swept = before - entries.len();
        if swept > 0 {
            trace!(namespace, swept, "expired cache entries swept");
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            },
        );
        trace!(
            namespace,
            key,
            ttl_ms = ttl.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
            "cache set"
        );
        Ok(())
    }

    /// Live value under `key`. Expired entries are evicted on read.
    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.namespace_mut(namespace)?;
        let now = Instant::now();

        let found = entries
            .get(key)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()));

        match found {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                entries.remove(key);
                trace!(namespace, key, "cache entry expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Remove `key`. Returns whether a live entry was removed.
    pub fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.namespace_mut(namespace)?;
        Ok(entries
            .remove(key)
            .is_some_and(|entry| entry.is_live(Instant::now())))
    }

    /// Empty one namespace, keeping it registered.
    pub fn clear(&self, namespace: &str) -> Result<(), CacheError> {
        self.namespace_mut(namespace)?.clear();
        debug!(namespace, "cache namespace cleared");
        Ok(())
    }

    fn namespace_mut(
        &self,
        namespace: &str,
    ) -> Result<RefMut<'_, String, HashMap<String, CacheEntry>>, CacheError> {
        self.namespaces
            .get_mut(namespace)
            .ok_or_else(|| CacheError::NamespaceNotFound {
                namespace: namespace.to_string(),
            })
    }
}

#[async_trait]
impl Initialize for CacheService {
    async fn init(&self) -> Result<()> {
        if !self.has_namespace(DEFAULT_NAMESPACE) {
            self.create_namespace(DEFAULT_NAMESPACE)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Dispose for CacheService {
    async fn dispose(&self) -> Result<()> {
        let namespaces = self.namespaces.len();
        self.namespaces.clear();
        debug!(namespaces, "cache disposed");
        Ok(())
    }
}

impl Component for CacheService {
    fn as_initialize(&self) -> Option<&dyn Initialize> {
        Some(self)
    }

    fn as_dispose(&self) -> Option<&dyn Dispose> {
        Some(self)
    }
}

impl Service for CacheService {
    fn name() -> &'static str {
        "CacheService"
    }

    fn lifecycle() -> Lifecycle {
        Lifecycle::Singleton
    }

    fn construct(_deps: &mut Dependencies) -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceContainer;
    use serde_json::json;

    #[tokio::test]
    async fn test_init_creates_default_namespace() {
        let container = ServiceContainer::new();
        container.register::<CacheService>();

        let cache = container.resolve_as::<CacheService>(None).await.unwrap();
        assert!(cache.has_namespace(DEFAULT_NAMESPACE));
    }

    #[test]
    fn test_set_get_delete() {
        let cache = CacheService::new();
        cache.create_namespace("users").unwrap();

        cache.set("users", "42", json!({"name": "Ada"}), None).unwrap();
        assert_eq!(cache.get("users", "42").unwrap(), Some(json!({"name": "Ada"})));

        assert!(cache.delete("users", "42").unwrap());
        assert_eq!(cache.get("users", "42").unwrap(), None);
        assert!(!cache.delete("users", "42").unwrap());
    }

    #[test]
    fn test_missing_namespace() {
        let cache = CacheService::new();
        assert_eq!(
            cache.get("nope", "k"),
            Err(CacheError::NamespaceNotFound {
                namespace: "nope".into()
            })
        );
        assert!(cache.set("nope", "k", json!(1), None).is_err());
    }

    #[test]
    fn test_duplicate_namespace() {
        let cache = CacheService::new();
        cache.create_namespace("jobs").unwrap();
        assert_eq!(
            cache.create_namespace("jobs"),
            Err(CacheError::NamespaceExists {
                namespace: "jobs".into()
            })
        );
    }

    #[tokio::test]
    async fn test_expired_entries_read_as_absent() {
        let cache = CacheService::new();
        cache.create_namespace("tokens").unwrap();
        cache
            .set("tokens", "t", json!("abc"), Some(Duration::from_millis(20)))
            .unwrap();
        cache
            .set("tokens", "forever", json!("xyz"), None)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(cache.get("tokens", "t").unwrap(), None);
        assert_eq!(cache.get("tokens", "forever").unwrap(), Some(json!("xyz")));
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        let cache = CacheService::new();
        cache.create_namespace("n").unwrap();

        cache.set("n", "k", json!(1), Some(Duration::MAX)).unwrap();
        assert_eq!(cache.get("n", "k").unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_write_sweeps_expired_entries_never_read() {
        let cache = CacheService::new();
        cache.create_namespace("tokens").unwrap();
        for key in ["a", "b", "c"] {
            cache
                .set("tokens", key, json!(key), Some(Duration::from_millis(20)))
                .unwrap();
        }
        cache.set("tokens", "kept", json!(true), None).unwrap();
        assert_eq!(cache.namespaces.get("tokens").unwrap().len(), 4);

        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.set("tokens", "fresh", json!(1), None).unwrap();

        let stored = cache.namespaces.get("tokens").unwrap();
        let mut keys: Vec<&str> = stored.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["fresh", "kept"]);
    }

    #[tokio::test]
    async fn test_clear_and_dispose() {
        let cache = CacheService::new();
        cache.init().await.unwrap();
        cache.set(DEFAULT_NAMESPACE, "a", json!(1), None).unwrap();

        cache.clear(DEFAULT_NAMESPACE).unwrap();
        assert_eq!(cache.get(DEFAULT_NAMESPACE, "a").unwrap(), None);
        assert!(cache.has_namespace(DEFAULT_NAMESPACE));

        cache.dispose().await.unwrap();
        assert!(!cache.has_namespace(DEFAULT_NAMESPACE));
    }
}
