use anyhow::Result;
use serde::{Deserialize, Serialize};

/// configuration settings loaded from the config file
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LoadConfiguration {
    /// Overseer cluster name
    pub(crate) cluster_name: String,
    /// Metadata store configuration
    pub(crate) meta_store: MetaStoreConfig,
    /// Reabsorb a departed node's assignment instead of waiting for the next
    /// plain rebalance (if None, defaults to true)
    pub(crate) auto_redistribute: Option<bool>,
    /// Endpoint for node-drop notifications
    pub(crate) webhook_url: Option<String>,
}

/// Metadata store configuration
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MetaStoreConfig {
    /// Hostname or IP address of metadata store (etcd)
    pub(crate) host: String,
    /// Port for metadata store
    pub(crate) port: usize,
    /// Use the in-memory provider instead of etcd (single-host setups)
    pub(crate) in_memory: Option<bool>,
}

/// configuration settings for the overseer master service
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ServiceConfiguration {
    /// Overseer cluster name
    pub(crate) cluster_name: String,
    /// Metadata Persistent Store (etcd) address
    pub(crate) meta_store_addr: String,
    /// Use the in-memory store provider
    pub(crate) meta_store_in_memory: bool,
    /// Reabsorb a departed node's assignment on node loss
    pub(crate) auto_redistribute: bool,
    /// Endpoint for node-drop notifications
    pub(crate) webhook_url: Option<String>,
}

/// Implementing the TryFrom trait to transform LoadConfiguration into ServiceConfiguration
impl TryFrom<LoadConfiguration> for ServiceConfiguration {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        let meta_store_addr = format!("{}:{}", config.meta_store.host, config.meta_store.port);

        Ok(ServiceConfiguration {
            cluster_name: config.cluster_name,
            meta_store_addr,
            meta_store_in_memory: config.meta_store.in_memory.unwrap_or(false),
            auto_redistribute: config.auto_redistribute.unwrap_or(true),
            webhook_url: config.webhook_url,
        })
    }
}
