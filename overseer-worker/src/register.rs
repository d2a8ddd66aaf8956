use crate::resources::{join_path, BASE_REGISTER_PATH};

use anyhow::Result;
use overseer_metadata_store::{MetadataStorage, MetadataStore};
use tokio::time::{sleep, Duration};
use tracing::{error, info};

/// Register this node under the membership prefix with a TTL and spawn the
/// background renewal task. A renewal failure ends the task; the entry then
/// expires and the master drops the node.
pub(crate) async fn register_node(
    store: MetadataStorage,
    node_id: &str,
    ttl: Duration,
) -> Result<()> {
    let path = join_path(BASE_REGISTER_PATH, node_id);
    let payload = serde_json::json!({ "node_id": node_id });

    store.put_with_ttl(&path, payload.clone(), ttl).await?;
    info!(node = %node_id, "node registered in the cluster");

    let node_id_owned = node_id.to_string();
    let renew_interval = ttl / 3;
    tokio::spawn(async move {
        loop {
            sleep(renew_interval).await;
            match store.put_with_ttl(&path, payload.clone(), ttl).await {
                Ok(_) => {}
                Err(err) => {
                    error!(
                        node = %node_id_owned,
                        error = %err,
                        "failed to renew node registration"
                    );
                    break;
                }
            }
        }
    });

    Ok(())
}
