// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Default [`CollectorEngine`]: runs the collector as a child process.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::supervisor::{CollectorEngine, CollectorHandle, SupervisorError};

/// Spawns `<binary> --config <config_path>` and owns the child process.
pub struct SubprocessCollectorEngine {
    binary: String,
}

impl SubprocessCollectorEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

#[async_trait]
impl CollectorEngine for SubprocessCollectorEngine {
    async fn start(&self, config_path: &str) -> Result<Box<dyn CollectorHandle>, SupervisorError> {
        let child = Command::new(&self.binary)
            .arg("--config")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::StartFailed(e.to_string()))?;

        info!(binary = %self.binary, %config_path, "collector process spawned");
        Ok(Box::new(SubprocessHandle { child: Mutex::new(child) }))
    }
}

struct SubprocessHandle {
    child: Mutex<Child>,
}

#[async_trait]
impl CollectorHandle for SubprocessHandle {
    async fn shutdown(&self) -> Result<(), SupervisorError> {
        let mut child = self.child.lock().await;

        if let Some(pid) = child.id() {
            // SIGTERM first; `kill_on_drop` is the hard backstop if this
            // doesn't land before the supervisor's own timeout fires.
            #[cfg(unix)]
            {
                use nix::sys::signal::{self, Signal};
                use nix::unistd::Pid;
                let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        match child.wait().await {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                warn!(?status, "collector process exited with non-zero status");
                Ok(())
            }
            Err(e) => Err(SupervisorError::EngineError(e.to_string())),
        }
    }

    fn is_alive(&self) -> bool {
        match self.child.try_lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            Err(_) => true,
        }
    }
}
