use crate::errors::Result;

use etcd_client::Client;
use tokio::sync::OwnedMutexGuard;

/// Guard for a per-path mutual-exclusion lock.
///
/// Dropping the guard without calling [`MetaLock::release`] is tolerated: the
/// in-memory variant unlocks on drop, the etcd variant relies on the lease TTL
/// attached to the lock key to expire it.
pub enum MetaLock {
    Memory(OwnedMutexGuard<()>),
    Etcd { client: Client, key: Vec<u8> },
}

impl MetaLock {
    /// Explicitly release the lock, surfacing backend errors.
    pub async fn release(self) -> Result<()> {
        match self {
            MetaLock::Memory(guard) => {
                drop(guard);
                Ok(())
            }
            MetaLock::Etcd { mut client, key } => {
                client.unlock(key).await?;
                Ok(())
            }
        }
    }
}
