// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collector Supervisor (C3): owns the single running collector process and
//! enforces the at-most-one-handle invariant across Start/Stop/Restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the Collector Run-task polls the live handle for an unprompted
/// exit.
const LIVENESS_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("collector already running")]
    AlreadyRunning,

    #[error("collector engine failed to start: {0}")]
    StartFailed(String),

    #[error("collector engine reported an error: {0}")]
    EngineError(String),
}

/// State of the supervised collector. `Ready` means a handle was never
/// started (or was fully cleaned up); there is no bare "stopping" state
/// visible outside the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Ready,
    Running,
    Stopped,
}

/// A running collector process, abstracted so tests can substitute a fake
/// rather than spawn a real `otelcol` binary.
#[async_trait]
pub trait CollectorEngine: Send + Sync + 'static {
    /// Starts the collector against the config at `config_path`.
    async fn start(&self, config_path: &str) -> Result<Box<dyn CollectorHandle>, SupervisorError>;
}

/// A handle to one running collector instance.
#[async_trait]
pub trait CollectorHandle: Send + Sync {
    /// Requests shutdown and waits for the process to exit, or returns once
    /// cancelled/timed out — the caller bounds the wait, not the handle.
    async fn shutdown(&self) -> Result<(), SupervisorError>;

    /// True while the underlying process is still alive.
    fn is_alive(&self) -> bool;
}

struct State {
    handle: Option<Box<dyn CollectorHandle>>,
    status: CollectorState,
    last_error: Option<String>,
}

/// Serializes Start/Stop/Restart so at most one collector handle exists at a
/// time and every started handle is eventually stopped.
pub struct CollectorSupervisor<E: CollectorEngine> {
    engine: E,
    state: Mutex<State>,
}

impl<E: CollectorEngine> CollectorSupervisor<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            state: Mutex::new(State {
                handle: None,
                status: CollectorState::Ready,
                last_error: None,
            }),
        }
    }

    pub fn status(&self) -> CollectorState {
        self.state.lock().status
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// Starts the collector. Refuses if a handle already exists and isn't
    /// `Stopped` — callers must `stop()` first.
    pub async fn start(&self, config_path: &str) -> Result<(), SupervisorError> {
        {
            let state = self.state.lock();
            if state.handle.is_some() && state.status != CollectorState::Stopped {
                return Err(SupervisorError::AlreadyRunning);
            }
        }

        // The actual start call is a blocking network/process op; never hold
        // the lock across it.
        let result = self.engine.start(config_path).await;

        let mut state = self.state.lock();
        match result {
            Ok(handle) => {
                state.handle = Some(handle);
                state.status = CollectorState::Running;
                state.last_error = None;
                info!("collector started");
                Ok(())
            }
            Err(e) => {
                state.status = CollectorState::Stopped;
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Stops the running collector. Safe to call when already stopped.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let handle = {
            let mut state = self.state.lock();
            if state.status != CollectorState::Running {
                return Ok(());
            }
            state.handle.take()
        };

        let Some(handle) = handle else { return Ok(()) };

        let outcome = timeout(SHUTDOWN_TIMEOUT, handle.shutdown()).await;

        let mut state = self.state.lock();
        // Late-exit guard: only clear/replace state if nothing else already
        // replaced the handle while we were waiting unlocked.
        if state.handle.is_none() {
            state.status = CollectorState::Stopped;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => state.last_error = Some(e.to_string()),
                Err(_) => warn!("collector shutdown exceeded 10s bound, continuing"),
            }
        }
        Ok(())
    }

    /// Restart = Stop then Start, serialized by the same mutex a concurrent
    /// caller would contend on.
    pub async fn restart(&self, config_path: &str) -> Result<(), SupervisorError> {
        self.stop().await?;
        self.start(config_path).await
    }

    /// Collector Run-task: the steady-state background watcher that notices
    /// when the collector exits on its own, rather than in response to
    /// `stop()`. Mirrors a supervisory goroutine blocked on the child
    /// process's exit, except here the handle exposes no "wait for exit"
    /// primitive, so watching is done by polling `is_alive()`.
    pub fn spawn_watchdog(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LIVENESS_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => supervisor.check_liveness(),
                }
            }
        })
    }

    /// If the currently tracked handle has died without going through
    /// `stop()`, clears it and records the crash so the next reconciliation
    /// tick observes `Stopped` and restarts the collector.
    fn check_liveness(&self) {
        let mut state = self.state.lock();
        if state.status != CollectorState::Running {
            return;
        }
        let dead = match &state.handle {
            Some(handle) => !handle.is_alive(),
            None => false,
        };
        if dead {
            warn!("collector exited without a stop request");
            state.handle = None;
            state.status = CollectorState::Stopped;
            state.last_error = Some("collector exited unexpectedly".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeHandle {
        alive: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CollectorHandle for FakeHandle {
        async fn shutdown(&self) -> Result<(), SupervisorError> {
            self.alive.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst) > 0
        }
    }

    struct FakeEngine {
        starts: Arc<AtomicUsize>,
        alive: Arc<AtomicUsize>,
        fail_next: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl CollectorEngine for FakeEngine {
        async fn start(&self, _config_path: &str) -> Result<Box<dyn CollectorHandle>, SupervisorError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(SupervisorError::StartFailed("boom".into()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.alive.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeHandle { alive: self.alive.clone() }))
        }
    }

    fn engine() -> (FakeEngine, Arc<AtomicUsize>) {
        let starts = Arc::new(AtomicUsize::new(0));
        let alive = Arc::new(AtomicUsize::new(0));
        (
            FakeEngine {
                starts: starts.clone(),
                alive: alive.clone(),
                fail_next: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            },
            starts,
        )
    }

    #[tokio::test]
    async fn start_then_stop_clears_the_handle() {
        let (engine, starts) = engine();
        let sup = CollectorSupervisor::new(engine);
        sup.start("cfg.yaml").await.unwrap();
        assert_eq!(sup.status(), CollectorState::Running);
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        sup.stop().await.unwrap();
        assert_eq!(sup.status(), CollectorState::Stopped);
    }

    #[tokio::test]
    async fn double_start_without_stop_is_refused() {
        let (engine, _) = engine();
        let sup = CollectorSupervisor::new(engine);
        sup.start("cfg.yaml").await.unwrap();
        let err = sup.start("cfg.yaml").await.unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning));
    }

    #[tokio::test]
    async fn restart_stops_and_starts_again() {
        let (engine, starts) = engine();
        let sup = CollectorSupervisor::new(engine);
        sup.start("cfg.yaml").await.unwrap();
        sup.restart("cfg.yaml").await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!(sup.status(), CollectorState::Running);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let (engine, _) = engine();
        let sup = CollectorSupervisor::new(engine);
        sup.stop().await.unwrap();
        assert_eq!(sup.status(), CollectorState::Ready);
    }

    #[tokio::test]
    async fn liveness_check_detects_an_unprompted_exit() {
        let (engine, _) = engine();
        let alive = engine.alive.clone();
        let sup = CollectorSupervisor::new(engine);
        sup.start("cfg.yaml").await.unwrap();

        // Simulate the process dying on its own, without going through stop().
        alive.store(0, Ordering::SeqCst);
        assert_eq!(sup.status(), CollectorState::Running);

        sup.check_liveness();
        assert_eq!(sup.status(), CollectorState::Stopped);
        assert!(sup.last_error().is_some());
    }

    #[tokio::test]
    async fn liveness_check_leaves_a_healthy_collector_running() {
        let (engine, _) = engine();
        let sup = CollectorSupervisor::new(engine);
        sup.start("cfg.yaml").await.unwrap();

        sup.check_liveness();
        assert_eq!(sup.status(), CollectorState::Running);
        assert!(sup.last_error().is_none());
    }

    #[tokio::test]
    async fn watchdog_task_can_be_spawned_and_cancelled() {
        let (engine, _) = engine();
        let sup = Arc::new(CollectorSupervisor::new(engine));
        sup.start("cfg.yaml").await.unwrap();

        let cancel = CancellationToken::new();
        let watchdog = sup.spawn_watchdog(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), watchdog)
            .await
            .expect("watchdog task did not exit promptly after cancellation")
            .unwrap();
    }
}
