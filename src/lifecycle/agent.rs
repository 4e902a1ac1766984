// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Out-of-process forwarding agent.
//!
//! Spawns a local collector process (for example an OpenTelemetry
//! collector) and relays its output to the log. The controller starts it in
//! the background and never waits for it: records emitted before the agent
//! accepts connections may be lost.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::AgentError;

/// Forwarding agent state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Starting,
    Running,
    Failed(String),
    Stopped,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Failed(e) => write!(f, "failed: {}", e),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Handle to the agent process. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ForwardingAgent {
    config: AgentConfig,
    state: Arc<RwLock<AgentState>>,
    process: Arc<Mutex<Option<Child>>>,
}

impl ForwardingAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(AgentState::Idle)),
            process: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn state(&self) -> AgentState {
        self.state.read().await.clone()
    }

    pub fn command(&self) -> &str {
        &self.config.command
    }

    /// Spawn the agent process.
    pub async fn start(&self) -> Result<(), AgentError> {
        *self.state.write().await = AgentState::Starting;

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("Failed to spawn {}: {}", self.config.command, e);
                *self.state.write().await = AgentState::Failed(message.clone());
                return Err(AgentError::StartupFailed(message));
            }
        };

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(relay_output(self.config.command.clone(), "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(relay_output(self.config.command.clone(), "stderr", stderr));
        }

        info!(command = %self.config.command, pid = ?child.id(), "Forwarding agent started");
        *self.process.lock().await = Some(child);
        *self.state.write().await = AgentState::Running;
        Ok(())
    }

    /// Stop the agent, waiting up to `grace` for it to exit after the kill
    /// signal.
    pub async fn stop(&self, grace: Duration) -> Result<(), AgentError> {
        let Some(mut child) = self.process.lock().await.take() else {
            let mut state = self.state.write().await;
            if *state == AgentState::Running {
                *state = AgentState::Stopped;
            }
            return Err(AgentError::NotRunning);
        };

        if let Some(status) = child.try_wait()? {
            warn!(command = %self.config.command, %status, "Forwarding agent had already exited");
        } else {
            child.start_kill()?;
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => debug!(command = %self.config.command, status = ?status, "Forwarding agent exited"),
                Err(_) => warn!(command = %self.config.command, "Forwarding agent did not exit in time"),
            }
        }

        *self.state.write().await = AgentState::Stopped;
        Ok(())
    }
}

async fn relay_output<R: AsyncRead + Unpin>(command: String, stream: &'static str, output: R) {
    let mut lines = BufReader::new(output).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(agent = %command, stream, "{}", line);
    }
}
