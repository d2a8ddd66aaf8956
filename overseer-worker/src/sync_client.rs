use crate::register::register_node;
use crate::resources::{node_current_path, node_sync_path};
use crate::supervisor::ProcessSupervisor;

use anyhow::{Context, Result};
use futures::StreamExt;
use overseer_core::{parse_conf, render_supervisor_conf, NotifyEvent, WebhookNotifier};
use overseer_metadata_store::{MetaOptions, MetadataStorage, MetadataStore, WatchEvent};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "sync_client_test.rs"]
mod sync_client_test;

/// Keeps this node's local supervisor state synchronized with the assignment
/// the master writes to the node's sync path. One event-processing task:
/// assignment changes and the supervisor health poll share the same loop, so
/// a slow reload delays subsequent events instead of overlapping them.
pub(crate) struct SyncClient {
    meta_store: MetadataStorage,
    node_id: String,
    include_file: PathBuf,
    supervisor: Arc<dyn ProcessSupervisor>,
    notifier: WebhookNotifier,
    registration_ttl: Duration,
    health_interval: Duration,
    supervisor_healthy: bool,
}

impl SyncClient {
    pub(crate) fn new(
        meta_store: MetadataStorage,
        node_id: String,
        include_file: PathBuf,
        supervisor: Arc<dyn ProcessSupervisor>,
        notifier: WebhookNotifier,
        registration_ttl: Duration,
        health_interval: Duration,
    ) -> Self {
        SyncClient {
            meta_store,
            node_id,
            include_file,
            supervisor,
            notifier,
            registration_ttl,
            health_interval,
            supervisor_healthy: true,
        }
    }

    /// Register, then process assignment events and health ticks until the
    /// watch stream closes.
    pub(crate) async fn start(mut self) -> Result<()> {
        register_node(
            self.meta_store.clone(),
            &self.node_id,
            self.registration_ttl,
        )
        .await?;

        let sync_path = node_sync_path(&self.node_id);
        let mut events = self.meta_store.watch(&sync_path).await?;

        // Apply whatever assignment is already in place from a previous run.
        if let Some(Value::String(text)) = self.meta_store.get(&sync_path, MetaOptions::None).await?
        {
            if let Err(err) = self.apply_assignment(&text).await {
                error!(error = %err, "failed to apply initial assignment");
            }
        }

        let mut health = tokio::time::interval(self.health_interval);
        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(Ok(WatchEvent::Put { value, .. })) => {
                        match serde_json::from_slice::<Value>(&value) {
                            Ok(Value::String(text)) => {
                                if let Err(err) = self.apply_assignment(&text).await {
                                    error!(error = %err, "failed to apply assignment");
                                }
                            }
                            _ => warn!("assignment document is not a text conf, ignoring"),
                        }
                    }
                    Some(Ok(WatchEvent::Delete { .. })) => {
                        // Assignment withdrawn: run with an empty program set.
                        if let Err(err) = self.apply_assignment("").await {
                            error!(error = %err, "failed to clear assignment");
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "watch stream error");
                    }
                    None => {
                        warn!("assignment watch closed, stopping sync client");
                        break;
                    }
                },
                _ = health.tick() => self.check_supervisor().await,
            }
        }
        Ok(())
    }

    /// Apply one assignment conf: under the store lock on the current path,
    /// write the supervisor-facing rendition to the include file, ask the
    /// supervisor to reload, and ack the applied conf. A reload failure is
    /// surfaced after the ack; the config stays written, so retrying the
    /// reload alone is safe.
    async fn apply_assignment(&mut self, text: &str) -> Result<()> {
        let catalog = parse_conf(text).context("assignment conf failed to parse")?;
        let assignment: BTreeMap<String, u32> = catalog
            .iter()
            .map(|(name, def)| (name.clone(), def.numprocs))
            .collect();
        let rendered = render_supervisor_conf(&assignment, &catalog)?;

        let current_path = node_current_path(&self.node_id);
        let lock = self.meta_store.lock(&current_path).await?;

        tokio::fs::write(&self.include_file, rendered)
            .await
            .with_context(|| format!("writing include file {}", self.include_file.display()))?;
        let reload_result = self.supervisor.reload().await;

        self.meta_store
            .put(
                &current_path,
                Value::String(text.to_owned()),
                MetaOptions::None,
            )
            .await?;
        lock.release().await?;

        info!(
            node = %self.node_id,
            programs = assignment.len(),
            "applied assignment"
        );
        reload_result
    }

    /// Health poll tick. The probe is capped at the poll interval so a hung
    /// supervisor cannot stall the event loop past the next tick.
    async fn check_supervisor(&mut self) {
        let healthy = timeout(self.health_interval, self.supervisor.is_healthy())
            .await
            .unwrap_or(false);
        if healthy == self.supervisor_healthy {
            return;
        }
        self.supervisor_healthy = healthy;

        if healthy {
            info!(node = %self.node_id, "supervisor recovered");
            self.notifier
                .notify(NotifyEvent::SupervisorRecovered {
                    node: self.node_id.clone(),
                })
                .await;
        } else {
            warn!(node = %self.node_id, "supervisor is down");
            self.notifier
                .notify(NotifyEvent::SupervisorDown {
                    node: self.node_id.clone(),
                })
                .await;
        }
    }
}
