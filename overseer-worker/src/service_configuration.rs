use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_REGISTRATION_TTL_SECS: u64 = 30;
const DEFAULT_HEALTH_POLL_SECS: u64 = 10;

/// configuration settings loaded from the config file
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LoadConfiguration {
    /// Overseer cluster name
    pub(crate) cluster_name: String,
    /// Metadata store configuration
    pub(crate) meta_store: MetaStoreConfig,
    /// Local process-supervisor configuration
    pub(crate) supervisor: SupervisorConfig,
    /// Membership entry TTL in seconds (if None, defaults to 30)
    pub(crate) registration_ttl_seconds: Option<u64>,
    /// Endpoint for supervisor-down/recovery notifications
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

/// Local process-supervisor configuration
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SupervisorConfig {
    /// Include file the assigned programs are written to
    pub(crate) include_file: PathBuf,
    /// supervisorctl server URL, when not the local default
    pub(crate) server_url: Option<String>,
    /// Health poll interval in seconds (if None, defaults to 10)
    pub(crate) health_poll_seconds: Option<u64>,
}

/// configuration settings for the overseer worker service
#[derive(Debug)]
pub(crate) struct ServiceConfiguration {
    /// Overseer cluster name
    pub(crate) cluster_name: String,
    /// Metadata Persistent Store (etcd) address
    pub(crate) meta_store_addr: String,
    /// Use the in-memory store provider
    pub(crate) meta_store_in_memory: bool,
    /// Include file the assigned programs are written to
    pub(crate) include_file: PathBuf,
    /// supervisorctl server URL
    pub(crate) supervisor_url: Option<String>,
    /// Membership entry TTL
    pub(crate) registration_ttl: Duration,
    /// Supervisor health poll interval
    pub(crate) health_poll: Duration,
    /// Endpoint for supervisor-down/recovery notifications
    pub(crate) webhook_url: Option<String>,
}

/// Implementing the TryFrom trait to transform LoadConfiguration into ServiceConfiguration
impl TryFrom<LoadConfiguration> for ServiceConfiguration {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        let meta_store_addr = format!("{}:{}", config.meta_store.host, config.meta_store.port);
        let registration_ttl = Duration::from_secs(
            config
                .registration_ttl_seconds
                .unwrap_or(DEFAULT_REGISTRATION_TTL_SECS),
        );
        let health_poll = Duration::from_secs(
            config
                .supervisor
                .health_poll_seconds
                .unwrap_or(DEFAULT_HEALTH_POLL_SECS),
        );

        Ok(ServiceConfiguration {
            cluster_name: config.cluster_name,
            meta_store_addr,
            meta_store_in_memory: config.meta_store.in_memory.unwrap_or(false),
            include_file: config.supervisor.include_file,
            supervisor_url: config.supervisor.server_url,
            registration_ttl,
            health_poll,
            webhook_url: config.webhook_url,
        })
    }
}
