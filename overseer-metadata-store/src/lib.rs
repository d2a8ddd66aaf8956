mod errors;
pub use errors::MetadataError;
pub(crate) use errors::Result;

mod store;
pub use store::MetaOptions;
pub use store::MetadataStore;

mod lock;
pub use lock::MetaLock;

mod watch;
pub use watch::{WatchEvent, WatchStream};

mod providers;
pub use providers::{etcd::EtcdStore, in_memory::MemoryStore};

use async_trait::async_trait;
pub use etcd_client::GetOptions as EtcdGetOptions;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum MetadataStorage {
    Etcd(EtcdStore),
    InMemory(MemoryStore), // InMemory is used for testing and single-host setups
}

#[async_trait]
impl MetadataStore for MetadataStorage {
    async fn get(&self, key: &str, get_options: MetaOptions) -> Result<Option<Value>> {
        match self {
            MetadataStorage::Etcd(store) => store.get(key, get_options).await,
            MetadataStorage::InMemory(store) => store.get(key, get_options).await,
        }
    }

    async fn get_childrens(&self, path: &str) -> Result<Vec<String>> {
        match self {
            MetadataStorage::Etcd(store) => store.get_childrens(path).await,
            MetadataStorage::InMemory(store) => store.get_childrens(path).await,
        }
    }

    async fn put(&self, key: &str, value: Value, put_options: MetaOptions) -> Result<()> {
        match self {
            MetadataStorage::Etcd(store) => store.put(key, value, put_options).await,
            MetadataStorage::InMemory(store) => store.put(key, value, put_options).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            MetadataStorage::Etcd(store) => store.delete(key).await,
            MetadataStorage::InMemory(store) => store.delete(key).await,
        }
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream> {
        match self {
            MetadataStorage::Etcd(store) => store.watch(prefix).await,
            MetadataStorage::InMemory(store) => store.watch(prefix).await,
        }
    }

    async fn put_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        match self {
            MetadataStorage::Etcd(store) => store.put_with_ttl(key, value, ttl).await,
            MetadataStorage::InMemory(store) => store.put_with_ttl(key, value, ttl).await,
        }
    }

    async fn lock(&self, path: &str) -> Result<MetaLock> {
        match self {
            MetadataStorage::Etcd(store) => store.lock(path).await,
            MetadataStorage::InMemory(store) => store.lock(path).await,
        }
    }
}
