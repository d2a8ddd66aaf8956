use crate::controller::{MasterCommand, MasterHandle, ProcessPlacements};
use crate::distributor::Distributor;
use crate::resources::{node_sync_path, BASE_CONF_PATH, BASE_REGISTER_PATH, STATE_CONF_PATH};

use anyhow::{anyhow, Result};
use futures::StreamExt;
use overseer_core::{parse_conf, serialize_conf, Catalog, NotifyEvent, WebhookNotifier};
use overseer_metadata_store::{
    MetaOptions, MetadataStore, MetadataStorage, WatchEvent, WatchStream,
};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "master_service_test.rs"]
mod master_service_test;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// The reconciliation loop. Watches the active conf and the membership
/// register, drives the [`Distributor`], and flushes dirty nodes to their sync
/// paths. All state mutation happens on this single task; controller commands
/// enter through the mpsc channel held by [`MasterHandle`].
pub(crate) struct MasterService {
    meta_store: MetadataStorage,
    catalog: Catalog,
    distributor: Distributor,
    auto_redistribute: bool,
    notifier: WebhookNotifier,
    commands: Option<mpsc::Receiver<MasterCommand>>,
}

impl MasterService {
    pub(crate) fn new(
        meta_store: MetadataStorage,
        auto_redistribute: bool,
        notifier: WebhookNotifier,
    ) -> (Self, MasterHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let service = MasterService {
            meta_store,
            catalog: Catalog::new(),
            distributor: Distributor::new(),
            auto_redistribute,
            notifier,
            commands: Some(rx),
        };
        (service, MasterHandle::new(tx))
    }

    /// Bootstrap from the store, then process watch events and controller
    /// commands until the command channel closes.
    pub(crate) async fn start(mut self) -> Result<()> {
        let mut commands = self
            .commands
            .take()
            .ok_or_else(|| anyhow!("master service already started"))?;
        let mut events = self.bootstrap().await?;

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        if let Err(err) = self.handle_watch_event(event).await {
                            // Abort this pass; the store re-delivers on resync.
                            error!(error = %err, "reconciliation pass failed");
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "watch stream error");
                    }
                    None => {
                        warn!("watch streams closed, stopping master loop");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        info!("command channel closed, stopping master loop");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    /// Set up the combined watch stream, then load the active conf and
    /// current membership and place the full catalog. Watching before reading
    /// means a write landing in between arrives twice, never not at all; the
    /// handlers converge on re-delivery.
    async fn bootstrap(&mut self) -> Result<WatchStream> {
        let mut streams = Vec::new();
        for prefix in [STATE_CONF_PATH, BASE_REGISTER_PATH] {
            streams.push(self.meta_store.watch(prefix).await?);
        }

        if let Some(text) = read_conf_text(&self.meta_store, STATE_CONF_PATH).await? {
            match parse_conf(&text) {
                Ok(catalog) => self.catalog = catalog,
                Err(err) => warn!(error = %err, "ignoring unparseable active conf"),
            }
        }

        let register_prefix = format!("{}/", BASE_REGISTER_PATH);
        for child in self.meta_store.get_childrens(BASE_REGISTER_PATH).await? {
            if let Some(name) = child.strip_prefix(&register_prefix) {
                self.distributor.add_node(name);
                info!(node = %name, "discovered registered node");
            }
        }
        self.rebalance_and_flush().await?;

        Ok(WatchStream::new(futures::stream::select_all(streams)))
    }

    async fn handle_watch_event(&mut self, event: WatchEvent) -> Result<()> {
        let key = String::from_utf8_lossy(event.key()).into_owned();

        if key == STATE_CONF_PATH {
            let new_catalog = match &event {
                WatchEvent::Put { value, .. } => {
                    let value: Value = serde_json::from_slice(value)?;
                    let Some(text) = value.as_str() else {
                        warn!("active conf is not a text document, ignoring");
                        return Ok(());
                    };
                    match parse_conf(text) {
                        Ok(catalog) => catalog,
                        Err(err) => {
                            warn!(error = %err, "ignoring unparseable active conf");
                            return Ok(());
                        }
                    }
                }
                WatchEvent::Delete { .. } => Catalog::new(),
            };
            return self.apply_catalog(new_catalog).await;
        }

        if let Some(name) = key.strip_prefix(&format!("{}/", BASE_REGISTER_PATH)) {
            let name = name.to_owned();
            return match event {
                WatchEvent::Put { .. } => self.node_joined(&name).await,
                WatchEvent::Delete { .. } => self.node_dropped(&name).await,
            };
        }

        Ok(())
    }

    /// Apply a new active catalog: removals detach programs from every node,
    /// additions place them fresh, then a rebalance evens things out. A
    /// re-delivered event produces an empty delta and converges to a no-op.
    async fn apply_catalog(&mut self, new_catalog: Catalog) -> Result<()> {
        let delta = Catalog::delta(&self.catalog, &new_catalog);
        if !delta.added.is_empty() || !delta.removed.is_empty() {
            info!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                "applying catalog change"
            );
        }

        for name in &delta.removed {
            self.distributor.remove_program(name);
            self.catalog.remove(name);
        }
        for name in &delta.added {
            if let Some(def) = new_catalog.get(name) {
                self.catalog.upsert(name.clone(), def.clone());
                self.distributor.add_program(name, &self.catalog);
            }
        }

        self.rebalance_and_flush().await
    }

    async fn node_joined(&mut self, name: &str) -> Result<()> {
        // TTL renewals re-deliver Put events for known nodes.
        if !self.distributor.add_node(name) {
            return Ok(());
        }
        info!(node = %name, "node joined");
        self.rebalance_and_flush().await
    }

    async fn node_dropped(&mut self, name: &str) -> Result<()> {
        let Some(node) = self.distributor.remove_node(name) else {
            return Ok(());
        };
        info!(node = %name, programs = node.assignment.len(), "node dropped");
        self.meta_store.delete(&node_sync_path(name)).await?;
        self.notifier
            .notify(NotifyEvent::NodeDropped {
                node: name.to_owned(),
            })
            .await;

        // With the policy off the shortfall stays unplaced until the next
        // membership or conf event reconciles it.
        if self.auto_redistribute && !self.distributor.nodes().is_empty() {
            return self.rebalance_and_flush().await;
        }
        Ok(())
    }

    /// Re-place any declared instances not live on a node (a departed node's
    /// load, or a catalog loaded before the first node registered), rebalance,
    /// and flush.
    async fn rebalance_and_flush(&mut self) -> Result<()> {
        if !self.distributor.nodes().is_empty() {
            let missing = self.declared_shortfall();
            if !missing.is_empty() {
                self.distributor.reabsorb(missing, &self.catalog)?;
            }
            self.distributor.distribute(&self.catalog)?;
        }
        self.flush_dirty().await
    }

    /// Per-program gap between the catalog's declared counts and the live
    /// instances across all nodes.
    fn declared_shortfall(&self) -> BTreeMap<String, u32> {
        let mut live: BTreeMap<&str, u32> = BTreeMap::new();
        for node in self.distributor.nodes() {
            for (name, count) in &node.assignment {
                *live.entry(name.as_str()).or_insert(0) += count;
            }
        }

        let mut missing = BTreeMap::new();
        for (name, def) in self.catalog.iter() {
            let have = live.get(name.as_str()).copied().unwrap_or(0);
            if def.numprocs > have {
                missing.insert(name.clone(), def.numprocs - have);
            }
        }
        missing
    }

    /// Write every dirty node's store-facing conf to its sync path. The dirty
    /// flag clears only after a successful write, so an aborted pass retries
    /// on the next flush.
    async fn flush_dirty(&mut self) -> Result<()> {
        let dirty: Vec<(String, BTreeMap<String, u32>)> = self
            .distributor
            .nodes()
            .iter()
            .filter(|node| node.dirty)
            .map(|node| (node.name.clone(), node.assignment.clone()))
            .collect();

        for (name, assignment) in dirty {
            let text = conf_for_assignment(&assignment, &self.catalog);
            self.meta_store
                .put(&node_sync_path(&name), Value::String(text), MetaOptions::None)
                .await?;
            if let Some(node) = self.distributor.nodes_mut().find(|node| node.name == name) {
                node.dirty = false;
            }
            info!(node = %name, programs = assignment.len(), "flushed assignment");
        }
        Ok(())
    }

    async fn handle_command(&mut self, command: MasterCommand) {
        // A dropped reply receiver just means the caller went away.
        match command {
            MasterCommand::UpdateConf { text, reply } => {
                let _ = reply.send(self.update_conf(text).await);
            }
            MasterCommand::StartProgram { name, reply } => {
                let _ = reply.send(self.start_program(&name).await);
            }
            MasterCommand::StopProgram { name, reply } => {
                let _ = reply.send(self.stop_program(&name).await);
            }
            MasterCommand::RestartProgram { name, reply } => {
                let _ = reply.send(self.restart_program(&name).await);
            }
            MasterCommand::IncreaseProcs { name, count, reply } => {
                let _ = reply.send(self.scale_procs(&name, count as i64).await);
            }
            MasterCommand::DecreaseProcs { name, count, reply } => {
                let _ = reply.send(self.scale_procs(&name, -(count as i64)).await);
            }
            MasterCommand::ListProcesses { reply } => {
                let _ = reply.send(Ok(self.list_processes()));
            }
        }
    }

    /// Validate and publish a new active conf, folding its definitions into
    /// the base conf. The catalog change itself is applied when the state
    /// watch fires, keeping one code path for local and external writers.
    async fn update_conf(&mut self, text: String) -> Result<bool> {
        let new_catalog = match parse_conf(&text) {
            Ok(catalog) => catalog,
            Err(err) => {
                warn!(error = %err, "rejected conf update");
                return Ok(false);
            }
        };

        let mut base = self.read_base_catalog().await?;
        base.merge(&new_catalog);
        self.meta_store
            .put(
                BASE_CONF_PATH,
                Value::String(serialize_conf(&base)),
                MetaOptions::None,
            )
            .await?;
        self.meta_store
            .put(STATE_CONF_PATH, Value::String(text), MetaOptions::None)
            .await?;
        Ok(true)
    }

    /// Resurrect a program from the base conf into the active set.
    async fn start_program(&mut self, name: &str) -> Result<bool> {
        if self.catalog.contains(name) {
            return Ok(false);
        }
        let base = self.read_base_catalog().await?;
        let Some(def) = base.get(name) else {
            return Ok(false);
        };

        let mut new_state = self.catalog.clone();
        new_state.upsert(name, def.clone());
        self.write_state(&new_state).await?;
        Ok(true)
    }

    async fn stop_program(&mut self, name: &str) -> Result<bool> {
        if !self.catalog.contains(name) {
            return Ok(false);
        }
        let mut new_state = self.catalog.clone();
        new_state.remove(name);
        self.write_state(&new_state).await?;
        Ok(true)
    }

    /// Stop then start: two state writes, so the watch handler tears the
    /// program down and places it fresh.
    async fn restart_program(&mut self, name: &str) -> Result<bool> {
        let Some(def) = self.catalog.get(name).cloned() else {
            return Ok(false);
        };
        let mut without = self.catalog.clone();
        without.remove(name);
        self.write_state(&without).await?;

        let mut with = without;
        with.upsert(name, def);
        self.write_state(&with).await?;
        Ok(true)
    }

    /// Manual scaling. Applies the distributor op, updates the declared count,
    /// republishes the active conf and flushes immediately so workers see the
    /// change without waiting for the watch round trip.
    async fn scale_procs(&mut self, name: &str, delta: i64) -> Result<bool> {
        let Some(mut def) = self.catalog.get(name).cloned() else {
            return Ok(false);
        };
        if delta == 0 {
            return Ok(false);
        }

        if delta > 0 {
            if !self
                .distributor
                .increase_procs(name, delta as u32, &self.catalog)
            {
                return Ok(false);
            }
            def.numprocs += delta as u32;
        } else {
            self.distributor.decrease_procs(name, (-delta) as u32);
            def.numprocs = def.numprocs.saturating_sub((-delta) as u32);
        }
        self.catalog.upsert(name, def);

        let state = self.catalog.clone();
        self.write_state(&state).await?;
        self.flush_dirty().await?;
        Ok(true)
    }

    fn list_processes(&self) -> ProcessPlacements {
        let mut placements: ProcessPlacements = BTreeMap::new();
        for node in self.distributor.nodes() {
            for (program, count) in &node.assignment {
                placements
                    .entry(program.clone())
                    .or_default()
                    .insert(node.name.clone(), *count);
            }
        }
        placements
    }

    async fn write_state(&self, catalog: &Catalog) -> Result<()> {
        self.meta_store
            .put(
                STATE_CONF_PATH,
                Value::String(serialize_conf(catalog)),
                MetaOptions::None,
            )
            .await?;
        Ok(())
    }

    async fn read_base_catalog(&self) -> Result<Catalog> {
        let Some(text) = read_conf_text(&self.meta_store, BASE_CONF_PATH).await? else {
            return Ok(Catalog::new());
        };
        match parse_conf(&text) {
            Ok(catalog) => Ok(catalog),
            Err(err) => {
                warn!(error = %err, "base conf is unparseable, treating as empty");
                Ok(Catalog::new())
            }
        }
    }
}

async fn read_conf_text(meta_store: &MetadataStorage, path: &str) -> Result<Option<String>> {
    let value = meta_store.get(path, MetaOptions::None).await?;
    Ok(value.and_then(|v| v.as_str().map(str::to_owned)))
}

/// Store-facing conf for one node: catalog definitions with `numprocs`
/// replaced by the live per-node counts, reserved keys kept.
fn conf_for_assignment(assignment: &BTreeMap<String, u32>, catalog: &Catalog) -> String {
    let mut subset = Catalog::new();
    for (name, count) in assignment {
        if let Some(def) = catalog.get(name) {
            let mut def = def.clone();
            def.numprocs = *count;
            subset.upsert(name.clone(), def);
        }
    }
    serialize_conf(&subset)
}
