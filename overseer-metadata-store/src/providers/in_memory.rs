use crate::{
    errors::{MetadataError, Result},
    lock::MetaLock,
    store::{MetaOptions, MetadataStore},
    watch::{WatchEvent, WatchStream},
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

// Capacity of the broadcast channel backing watch streams. A consumer that
// falls more than this many events behind receives a WatchError and should
// resynchronize from the store.
const WATCH_CHANNEL_CAPACITY: usize = 256;

// How often expired TTL entries are swept out.
const TTL_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    expires_at: Option<Instant>,
}

/// In-memory implementation of [`MetadataStore`] for tests and single-host setups.
///
/// Watch semantics mirror the etcd backend: every put and delete under a
/// watched prefix produces an event, including deletes caused by TTL expiry.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, StoredEntry>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    events: broadcast::Sender<WatchEvent>,
}

impl MemoryStore {
    pub async fn new() -> Result<Self> {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        let store = MemoryStore {
            inner: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            events,
        };

        store.spawn_ttl_sweeper();
        Ok(store)
    }

    // Background task expiring TTL entries. Holds only weak references so the
    // task ends once the last store handle is dropped.
    fn spawn_ttl_sweeper(&self) {
        let inner: Weak<DashMap<String, StoredEntry>> = Arc::downgrade(&self.inner);
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TTL_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };

                let now = Instant::now();
                let expired: Vec<String> = inner
                    .iter()
                    .filter(|entry| matches!(entry.expires_at, Some(at) if at <= now))
                    .map(|entry| entry.key().clone())
                    .collect();

                for key in expired {
                    if inner.remove(&key).is_some() {
                        let _ = events.send(WatchEvent::Delete {
                            key: key.into_bytes(),
                            mod_revision: None,
                            version: None,
                        });
                    }
                }
            }
        });
    }

    fn validate_path(path: &str) -> Result<()> {
        if !path.starts_with('/') || path.len() < 2 {
            return Err(MetadataError::InvalidArguments(format!(
                "path must be absolute and non-empty: {}",
                path
            )));
        }
        Ok(())
    }

    fn notify_put(&self, key: &str, value: &Value) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        // Send fails only when no watcher is subscribed.
        let _ = self.events.send(WatchEvent::Put {
            key: key.as_bytes().to_vec(),
            value: payload,
            mod_revision: None,
            version: None,
        });
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, key: &str, _get_options: MetaOptions) -> Result<Option<Value>> {
        Self::validate_path(key)?;

        match self.inner.get(key) {
            Some(entry) => {
                // The sweeper may lag behind the wall clock.
                if matches!(entry.expires_at, Some(at) if at <= Instant::now()) {
                    return Ok(None);
                }
                Ok(Some(entry.value.clone()))
            }
            None => Ok(None),
        }
    }

    // Returns full paths to match etcd behavior.
    async fn get_childrens(&self, path: &str) -> Result<Vec<String>> {
        Self::validate_path(path)?;

        let mut children = Vec::new();
        for entry in self.inner.iter() {
            let key = entry.key();
            if key.starts_with(path)
                && key.len() > path.len()
                && (path.ends_with('/') || key.as_bytes()[path.len()] == b'/')
            {
                children.push(key.clone());
            }
        }
        Ok(children)
    }

    async fn put(&self, key: &str, value: Value, _put_options: MetaOptions) -> Result<()> {
        Self::validate_path(key)?;

        self.inner.insert(
            key.to_owned(),
            StoredEntry {
                value: value.clone(),
                expires_at: None,
            },
        );
        self.notify_put(key, &value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Self::validate_path(key)?;

        if self.inner.remove(key).is_some() {
            let _ = self.events.send(WatchEvent::Delete {
                key: key.as_bytes().to_vec(),
                mod_revision: None,
                version: None,
            });
        }
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream> {
        Self::validate_path(prefix)?;

        let prefix = prefix.as_bytes().to_vec();
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |item| {
            let result = match item {
                Ok(event) if event.key().starts_with(&prefix) => Some(Ok(event)),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(missed)) => Some(Err(
                    MetadataError::WatchError(format!("watch stream lagged by {} events", missed)),
                )),
            };
            futures::future::ready(result)
        });

        Ok(WatchStream::new(stream))
    }

    async fn put_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        Self::validate_path(key)?;

        self.inner.insert(
            key.to_owned(),
            StoredEntry {
                value: value.clone(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        self.notify_put(key, &value)
    }

    async fn lock(&self, path: &str) -> Result<MetaLock> {
        Self::validate_path(path)?;

        // Clone the Arc out before awaiting so no map shard stays locked.
        let mutex = self
            .locks
            .entry(path.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;
        Ok(MetaLock::Memory(guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    /// Tests basic CRUD operations: put, get, and delete
    /// Purpose: Validates core store functionality with valid paths
    /// Expected: Successful storage, retrieval, and removal of key-value pairs
    #[tokio::test]
    async fn test_put_get_delete() -> Result<()> {
        let store = MemoryStore::new().await?;

        let value: Value = serde_json::json!({"command": "sleep 100", "numprocs": 2});
        let path = "/cluster/conf/base";

        store.put(path, value.clone(), MetaOptions::None).await?;

        let retrieved = store.get(path, MetaOptions::None).await?;
        assert_eq!(retrieved, Some(value));

        store.delete(path).await?;

        let result = store.get(path, MetaOptions::None).await;
        assert!(matches!(result, Ok(None)));

        Ok(())
    }

    /// Tests retrieval of non-existent keys
    /// Purpose: Ensures proper None return for missing keys
    /// Expected: Returns Ok(None) without errors for unknown keys
    #[tokio::test]
    async fn test_get_nonexistent_key() -> Result<()> {
        let store = MemoryStore::new().await?;

        let result = store.get("/cluster/nodes/unknown/sync", MetaOptions::None).await?;
        assert_eq!(result, None);

        Ok(())
    }

    /// Tests error handling for invalid path formats
    /// Purpose: Validates path validation and error reporting
    /// Expected: Returns error for relative or empty paths
    #[tokio::test]
    async fn test_put_invalid_path() -> Result<()> {
        let store = MemoryStore::new().await?;
        let value = Value::String("anything".to_string());

        let result = store.put("not-absolute", value.clone(), MetaOptions::None).await;
        assert!(result.is_err());

        let result = store.put("/", value, MetaOptions::None).await;
        assert!(result.is_err());

        Ok(())
    }

    /// Tests child path discovery functionality
    /// Purpose: Validates hierarchical path traversal and filtering
    /// Expected: Returns all child paths under given prefix, excludes unrelated paths
    #[tokio::test]
    async fn test_get_childrens() -> Result<()> {
        let store = MemoryStore::new().await?;

        store
            .put("/cluster/register/1001", Value::Null, MetaOptions::None)
            .await?;
        store
            .put("/cluster/register/1002", Value::Null, MetaOptions::None)
            .await?;
        store
            .put("/cluster/nodes/1001/sync", Value::Null, MetaOptions::None)
            .await?;
        // Shares the string prefix but not the path boundary.
        store
            .put("/cluster/registered", Value::Null, MetaOptions::None)
            .await?;

        let paths = store.get_childrens("/cluster/register").await?;
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&"/cluster/register/1001".to_string()));
        assert!(paths.contains(&"/cluster/register/1002".to_string()));

        let paths = store.get_childrens("/non/existent/path").await?;
        assert!(paths.is_empty());

        Ok(())
    }

    /// Tests watch event delivery for puts and deletes under a prefix
    /// Purpose: Validates that watchers observe mutations in order and that
    ///          keys outside the prefix are filtered out
    /// Expected: One Put and one Delete event for the watched key only
    #[tokio::test]
    async fn test_watch_prefix_filtering() -> Result<()> {
        let store = MemoryStore::new().await?;
        let mut stream = store.watch("/cluster/conf").await?;

        store
            .put(
                "/cluster/conf/state",
                Value::String("conf-body".to_string()),
                MetaOptions::None,
            )
            .await?;
        store
            .put("/cluster/register/1001", Value::Null, MetaOptions::None)
            .await?;
        store.delete("/cluster/conf/state").await?;

        let event = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("watch event")
            .expect("stream open")?;
        assert!(matches!(event, WatchEvent::Put { ref key, .. } if key == b"/cluster/conf/state"));

        let event = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("watch event")
            .expect("stream open")?;
        assert!(
            matches!(event, WatchEvent::Delete { ref key, .. } if key == b"/cluster/conf/state")
        );

        Ok(())
    }

    /// Tests TTL expiry of registration entries
    /// Purpose: Validates that entries put with a TTL disappear and emit a
    ///          Delete event once the TTL elapses without renewal
    /// Expected: Key is gone after expiry and the watcher sees Put then Delete
    #[tokio::test]
    async fn test_put_with_ttl_expires() -> Result<()> {
        let store = MemoryStore::new().await?;
        let mut stream = store.watch("/cluster/register").await?;

        store
            .put_with_ttl(
                "/cluster/register/1001",
                Value::Null,
                Duration::from_millis(100),
            )
            .await?;

        let event = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("watch event")
            .expect("stream open")?;
        assert!(matches!(event, WatchEvent::Put { .. }));

        let event = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("watch event")
            .expect("stream open")?;
        assert!(
            matches!(event, WatchEvent::Delete { ref key, .. } if key == b"/cluster/register/1001")
        );

        let result = store.get("/cluster/register/1001", MetaOptions::None).await?;
        assert_eq!(result, None);

        Ok(())
    }

    /// Tests mutual exclusion of per-path locks
    /// Purpose: Validates that a second lock on the same path blocks until the
    ///          first is released, while a different path stays independent
    /// Expected: Contended acquisition times out, then succeeds after release
    #[tokio::test]
    async fn test_lock_mutual_exclusion() -> Result<()> {
        let store = MemoryStore::new().await?;

        let guard = store.lock("/cluster/nodes/1001/current").await?;

        // Same path is held.
        let contended = timeout(
            Duration::from_millis(100),
            store.lock("/cluster/nodes/1001/current"),
        )
        .await;
        assert!(contended.is_err());

        // A different path is not.
        let other = timeout(
            Duration::from_millis(100),
            store.lock("/cluster/nodes/1002/current"),
        )
        .await
        .expect("independent path")?;
        other.release().await?;

        guard.release().await?;
        let reacquired = timeout(
            Duration::from_millis(100),
            store.lock("/cluster/nodes/1001/current"),
        )
        .await
        .expect("released path")?;
        reacquired.release().await?;

        Ok(())
    }
}
