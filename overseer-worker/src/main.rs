mod args_parse;
mod register;
mod resources;
mod service_configuration;
mod supervisor;
mod sync_client;

use std::{fs::read_to_string, path::Path, sync::Arc};

use crate::{
    args_parse::Args,
    service_configuration::{LoadConfiguration, ServiceConfiguration},
    supervisor::SupervisorCtl,
    sync_client::SyncClient,
};

use anyhow::Result;
use overseer_core::WebhookNotifier;
use overseer_metadata_store::{EtcdStore, MemoryStore, MetadataStorage};
use rand::Rng;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse()?;

    // Load the configuration from the specified YAML file
    let config_content = read_to_string(Path::new(&args.config_file))?;
    let load_config: LoadConfiguration = serde_yaml::from_str(&config_content)?;
    let mut service_config: ServiceConfiguration = load_config.try_into()?;

    if let Some(meta_store_addr) = args.meta_store_addr {
        service_config.meta_store_addr = meta_store_addr;
    }
    if let Some(webhook_url) = args.webhook_url {
        service_config.webhook_url = Some(webhook_url);
    }

    // Nodes carry no state worth pinning an identity to, a random id is fine.
    let node_id = args
        .node_id
        .unwrap_or_else(|| rand::rng().random::<u64>().to_string());

    let meta_store = if service_config.meta_store_in_memory {
        info!("Initializing in-memory metadata store");
        MetadataStorage::InMemory(MemoryStore::new().await?)
    } else {
        info!(
            addr = %service_config.meta_store_addr,
            "Initializing ETCD as metadata persistent store"
        );
        MetadataStorage::Etcd(EtcdStore::new(service_config.meta_store_addr.clone()).await?)
    };

    let supervisor = Arc::new(SupervisorCtl::new(service_config.supervisor_url.clone()));
    let notifier = WebhookNotifier::new(service_config.webhook_url.clone())?;

    let client = SyncClient::new(
        meta_store,
        node_id.clone(),
        service_config.include_file.clone(),
        supervisor,
        notifier,
        service_config.registration_ttl,
        service_config.health_poll,
    );

    info!(
        cluster = %service_config.cluster_name,
        node = %node_id,
        "starting overseer worker"
    );
    client.start().await
}
