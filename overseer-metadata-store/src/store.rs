use crate::errors::Result;
use crate::lock::MetaLock;
use crate::watch::WatchStream;

use async_trait::async_trait;
use etcd_client::GetOptions as EtcdGetOptions;
use serde_json::Value;
use std::time::Duration;

/// Options forwarded to backend-specific read/write calls.
pub enum MetaOptions {
    None,
    EtcdGet(EtcdGetOptions),
}

/// Watchable hierarchical key-value store used for all cluster coordination.
///
/// Implementations must deliver watch events at-least-once; consumers are expected
/// to reconcile idempotently on re-delivery.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Read the value stored at `key`. Returns `Ok(None)` when the key is absent.
    async fn get(&self, key: &str, get_options: MetaOptions) -> Result<Option<Value>>;

    /// Return the full paths of all keys below `path`.
    async fn get_childrens(&self, path: &str) -> Result<Vec<String>>;

    /// Store `value` at `key`, creating or replacing it.
    async fn put(&self, key: &str, value: Value, put_options: MetaOptions) -> Result<()>;

    /// Remove the key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Stream of Put/Delete events for all keys under `prefix`.
    async fn watch(&self, prefix: &str) -> Result<WatchStream>;

    /// Store `value` at `key` with an expiry. The entry disappears (with a Delete
    /// watch event) unless re-put before the TTL elapses. This is the membership
    /// registration primitive: workers renew their entry on an interval.
    async fn put_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Acquire a named mutual-exclusion lock scoped to `path`. The lock is held
    /// until the returned guard is released.
    async fn lock(&self, path: &str) -> Result<MetaLock>;
}
