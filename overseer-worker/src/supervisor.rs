use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::process::Command;

/// The external process-supervisor collaborator: pick up a rewritten include
/// file, and answer liveness probes for the health poll.
#[async_trait]
pub(crate) trait ProcessSupervisor: Send + Sync {
    async fn reload(&self) -> Result<()>;
    async fn is_healthy(&self) -> bool;
}

/// Shells out to `supervisorctl`, optionally against a non-default server URL.
pub(crate) struct SupervisorCtl {
    server_url: Option<String>,
}

impl SupervisorCtl {
    pub(crate) fn new(server_url: Option<String>) -> Self {
        SupervisorCtl { server_url }
    }

    fn command(&self) -> Command {
        let mut command = Command::new("supervisorctl");
        if let Some(url) = &self.server_url {
            command.arg("-s").arg(url);
        }
        command
    }
}

#[async_trait]
impl ProcessSupervisor for SupervisorCtl {
    async fn reload(&self) -> Result<()> {
        let output = self.command().arg("update").output().await?;
        if !output.status.success() {
            return Err(anyhow!(
                "supervisorctl update failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        matches!(
            self.command().arg("pid").output().await,
            Ok(output) if output.status.success()
        )
    }
}
