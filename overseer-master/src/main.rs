mod args_parse;
mod controller;
mod distributor;
mod master_service;
mod node;
mod resources;
mod service_configuration;

use std::{fs::read_to_string, path::Path};

use crate::{
    args_parse::Args,
    master_service::MasterService,
    service_configuration::{LoadConfiguration, ServiceConfiguration},
};

use anyhow::Result;
use overseer_core::WebhookNotifier;
use overseer_metadata_store::{EtcdStore, MemoryStore, MetadataStorage};
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

    let notifier = WebhookNotifier::new(service_config.webhook_url.clone())?;
    let (service, _handle) = MasterService::new(
        meta_store,
        service_config.auto_redistribute,
        notifier,
    );

    info!(cluster = %service_config.cluster_name, "starting overseer master");
    service.start().await
}
