use crate::{
    errors::{MetadataError, Result},
    lock::MetaLock,
    store::{MetaOptions, MetadataStore},
    watch::WatchStream,
};

use async_trait::async_trait;
use etcd_client::{Client, GetOptions, LockOptions, PutOptions, WatchOptions};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

// TTL of the lease backing a lock key, so an abandoned lock eventually expires.
const LOCK_LEASE_TTL_SECS: i64 = 15;

/// Etcd-backed implementation of [`MetadataStore`], the production backend.
///
/// The client is cheap to clone; every operation clones it because the etcd
/// API takes `&mut self`.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdStore").finish()
    }
}

impl EtcdStore {
    pub async fn new(etcd_addr: String) -> Result<Self> {
        let client = Client::connect([etcd_addr.as_str()], None)
            .await
            .map_err(|err| MetadataError::Connection(err.to_string()))?;

        Ok(EtcdStore { client })
    }
}

#[async_trait]
impl MetadataStore for EtcdStore {
    async fn get(&self, key: &str, get_options: MetaOptions) -> Result<Option<Value>> {
        let mut client = self.client.clone();

        let options = match get_options {
            MetaOptions::EtcdGet(opts) => Some(opts),
            MetaOptions::None => None,
        };

        let response = client.get(key, options).await?;

        match response.kvs() {
            [] => Ok(None),
            [kv] => {
                let value: Value = serde_json::from_slice(kv.value())?;
                Ok(Some(value))
            }
            kvs => {
                // Prefix read, return a map of full key to value.
                let mut map = serde_json::Map::new();
                for kv in kvs {
                    let value: Value = serde_json::from_slice(kv.value())?;
                    map.insert(kv.key_str()?.to_owned(), value);
                }
                Ok(Some(Value::Object(map)))
            }
        }
    }

    async fn get_childrens(&self, path: &str) -> Result<Vec<String>> {
        let mut client = self.client.clone();

        let options = GetOptions::new().with_prefix().with_keys_only();
        let response = client.get(path, Some(options)).await?;

        let mut children = Vec::new();
        for kv in response.kvs() {
            let key = kv.key_str()?;
            if key.len() > path.len() {
                children.push(key.to_owned());
            }
        }
        Ok(children)
    }

    async fn put(&self, key: &str, value: Value, _put_options: MetaOptions) -> Result<()> {
        let mut client = self.client.clone();

        let payload = serde_json::to_vec(&value)?;
        client.put(key, payload, None).await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client.clone();
        client.delete(key, None).await?;
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream> {
        let mut client = self.client.clone();

        let options = WatchOptions::new().with_prefix();
        let (watcher, stream) = client.watch(prefix, Some(options)).await?;

        Ok(WatchStream::from_etcd(watcher, stream))
    }

    async fn put_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let mut client = self.client.clone();

        let lease = client.lease_grant(ttl.as_secs() as i64, None).await?;
        let payload = serde_json::to_vec(&value)?;
        let options = PutOptions::new().with_lease(lease.id());
        client.put(key, payload, Some(options)).await?;

        Ok(())
    }

    async fn lock(&self, path: &str) -> Result<MetaLock> {
        let mut client = self.client.clone();

        let lease = client.lease_grant(LOCK_LEASE_TTL_SECS, None).await?;
        let options = LockOptions::new().with_lease(lease.id());
        let response = client.lock(path, Some(options)).await?;

        Ok(MetaLock::Etcd {
            client: self.client.clone(),
            key: response.key().to_vec(),
        })
    }
}
