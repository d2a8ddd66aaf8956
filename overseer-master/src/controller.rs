use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};

/// Program name to per-node live instance counts.
pub(crate) type ProcessPlacements = BTreeMap<String, BTreeMap<String, u32>>;

/// Commands entering the master loop from the controller front-ends. Every
/// command carries a oneshot reply so mutation stays inside the single event
/// loop.
#[derive(Debug)]
pub(crate) enum MasterCommand {
    UpdateConf {
        text: String,
        reply: oneshot::Sender<Result<bool>>,
    },
    StartProgram {
        name: String,
        reply: oneshot::Sender<Result<bool>>,
    },
    StopProgram {
        name: String,
        reply: oneshot::Sender<Result<bool>>,
    },
    RestartProgram {
        name: String,
        reply: oneshot::Sender<Result<bool>>,
    },
    IncreaseProcs {
        name: String,
        count: u32,
        reply: oneshot::Sender<Result<bool>>,
    },
    DecreaseProcs {
        name: String,
        count: u32,
        reply: oneshot::Sender<Result<bool>>,
    },
    ListProcesses {
        reply: oneshot::Sender<Result<ProcessPlacements>>,
    },
}

/// Cloneable sender half used by command transports. `Ok(false)` means the
/// operation was valid but a no-op (unknown program, already in the desired
/// state); errors are store or rebalancing failures.
#[derive(Debug, Clone)]
pub(crate) struct MasterHandle {
    tx: mpsc::Sender<MasterCommand>,
}

#[allow(dead_code)]
impl MasterHandle {
    pub(crate) fn new(tx: mpsc::Sender<MasterCommand>) -> Self {
        MasterHandle { tx }
    }

    async fn request<T>(
        &self,
        command: MasterCommand,
        reply: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| anyhow!("master loop is not running"))?;
        reply
            .await
            .map_err(|_| anyhow!("master loop dropped the command"))?
    }

    pub(crate) async fn update_conf(&self, text: impl Into<String>) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(
            MasterCommand::UpdateConf {
                text: text.into(),
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub(crate) async fn start_program(&self, name: impl Into<String>) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(
            MasterCommand::StartProgram {
                name: name.into(),
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub(crate) async fn stop_program(&self, name: impl Into<String>) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(
            MasterCommand::StopProgram {
                name: name.into(),
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub(crate) async fn restart_program(&self, name: impl Into<String>) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(
            MasterCommand::RestartProgram {
                name: name.into(),
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub(crate) async fn increase_procs(&self, name: impl Into<String>, count: u32) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(
            MasterCommand::IncreaseProcs {
                name: name.into(),
                count,
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub(crate) async fn decrease_procs(&self, name: impl Into<String>, count: u32) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(
            MasterCommand::DecreaseProcs {
                name: name.into(),
                count,
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub(crate) async fn list_processes(&self) -> Result<ProcessPlacements> {
        let (tx, rx) = oneshot::channel();
        self.request(MasterCommand::ListProcesses { reply: tx }, rx)
            .await
    }
}
