//! Engine child process

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::XrayConfig;
use crate::error::{HelperError, Result};

const ASSET_ENV: &str = "XRAY_LOCATION_ASSET";

/// A running `xray run -confdir <dir>` process
#[derive(Debug)]
pub struct EngineProcess {
    child: Child,
    pid: Option<u32>,
}

impl EngineProcess {
    /// Spawn the engine and wait out the start grace period.
    ///
    /// Fails with [`HelperError::StartFailure`] if the executable cannot be
    /// launched or has already exited when the grace period ends.
    pub async fn spawn(config: &XrayConfig) -> Result<Self> {
        let executable = config.engine_executable();

        let mut command = Command::new(&executable);
        command
            .arg("run")
            .arg("-confdir")
            .arg(config.config_dir())
            .env(ASSET_ENV, &config.xray_asset_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            HelperError::StartFailure(format!("cannot launch {}: {}", executable.display(), e))
        })?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, true));
        }

        info!("engine spawned (pid {:?}), waiting {:?}", pid, config.start_grace());
        tokio::time::sleep(config.start_grace()).await;

        if let Some(status) = child.try_wait()? {
            return Err(HelperError::StartFailure(format!(
                "engine exited during startup: {}",
                status
            )));
        }

        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process has not exited yet
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the process and reap it
    pub async fn terminate(mut self) -> Result<()> {
        if !self.is_running() {
            debug!("engine (pid {:?}) already exited", self.pid);
            return Ok(());
        }

        self.child.start_kill()?;
        let status = self.child.wait().await?;
        info!("engine (pid {:?}) stopped: {}", self.pid, status);
        Ok(())
    }
}

/// Forward engine output to the log under the `xray` target
async fn forward_lines<R>(reader: R, stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if stderr {
            warn!(target: "xray", "{}", line);
        } else {
            info!(target: "xray", "{}", line);
        }
    }
}
