// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent Lifecycle (C7): startup, signal handling, and shutdown sequencing.

use std::sync::Arc;
use std::time::Duration;

use oca_adapters::{DetectionCache, RolloutController};
use oca_core::{AgentIdentity, Platform, SystemClock};
use oca_engine::{CollectorSupervisor, K8sTargets, ReconcileLoop};
use oca_engine::subprocess::SubprocessCollectorEngine;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AgentConfig, DeploymentMode};
use crate::config_client::HttpConfigClient;
use crate::detected_apps::CacheDetectedAppSource;
use crate::store::{AgentStore, ConfigMapStore, FileConfigStore};

const AGENT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("failed to resolve hostname: {0}")]
    Hostname(String),

    #[error("failed to build kubernetes client: {0}")]
    K8sClient(String),

    #[error("collector failed to start: {0}")]
    CollectorStart(String),

    #[error("failed to install signal handler: {0}")]
    SignalHandler(String),
}

/// Everything running after a successful startup, held so `run_until_shutdown`
/// can stop each task in the documented order: reconciliation loop, then
/// collector supervisor (and its run-task watchdog), then the janitor/RPC
/// background tasks.
pub struct Agent {
    config: AgentConfig,
    cancel: CancellationToken,
    reconcile_task: tokio::task::JoinHandle<()>,
    watchdog_task: tokio::task::JoinHandle<()>,
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    supervisor: Arc<CollectorSupervisor<SubprocessCollectorEngine>>,
}

impl Agent {
    pub async fn start(config: AgentConfig) -> Result<Self, LifecycleError> {
        let identity = build_identity(&config)?;
        info!(identity = %identity.redacted(), "starting agent");

        let supervisor = Arc::new(CollectorSupervisor::new(SubprocessCollectorEngine::new(
            config.collector_bin.clone(),
        )));

        // Absent config is only fatal if the collector engine itself refuses
        // to start against it; a missing file is otelcol's problem to report.
        supervisor
            .start(&config.config_path)
            .await
            .map_err(|e| LifecycleError::CollectorStart(e.to_string()))?;

        let cancel = CancellationToken::new();
        let mut background_tasks = Vec::new();

        let watchdog_task = supervisor.spawn_watchdog(cancel.clone());

        let detection_cache = DetectionCache::new(SystemClock);
        {
            let cache = detection_cache.clone();
            let janitor_cancel = cancel.clone();
            background_tasks.push(tokio::spawn(oca_adapters::run_janitor(cache, janitor_cancel)));
        }
        {
            let cache = detection_cache.clone();
            let port = config.detection_rpc_port;
            let rpc_cancel = cancel.clone();
            background_tasks.push(tokio::spawn(async move {
                if let Err(e) = oca_adapters::rpc::serve(cache, port, rpc_cancel).await {
                    warn!(error = %e, "detection inbox server exited with an error");
                }
            }));
        }

        let client = HttpConfigClient::new(config.update_endpoint.clone(), config.api_key.clone());

        let (store, k8s_targets, detected_apps): (
            AgentStore,
            Option<K8sTargets>,
            Option<Arc<dyn oca_engine::DetectedAppSource>>,
        ) = match (&config.mode, &config.k8s) {
            (DeploymentMode::Kubernetes, Some(k8s)) => {
                let kube_client = kube::Client::try_default()
                    .await
                    .map_err(|e| LifecycleError::K8sClient(e.to_string()))?;
                let rollout = RolloutController::new(kube_client.clone(), k8s.namespace.clone());
                let store = ConfigMapStore::new(
                    kube_client,
                    k8s.namespace.clone(),
                    k8s.daemonset_configmap_name.clone(),
                    k8s.deployment_configmap_name.clone(),
                );
                let targets = K8sTargets {
                    rollout,
                    daemonset_name: k8s.daemonset_name.clone(),
                    deployment_name: k8s.deployment_name.clone(),
                };
                let apps = Arc::new(CacheDetectedAppSource::new(detection_cache.clone()));
                (AgentStore::ConfigMap(store), Some(targets), Some(apps as Arc<dyn oca_engine::DetectedAppSource>))
            }
            _ => (AgentStore::File(FileConfigStore::new(config.config_path.clone())), None, None),
        };

        let reconcile = Arc::new(ReconcileLoop::new(
            client,
            store,
            supervisor.clone(),
            identity,
            config.config_path.clone(),
            config.check_interval,
            k8s_targets,
            detected_apps,
        ));
        let reconcile_task = {
            let reconcile = reconcile.clone();
            let reconcile_cancel = cancel.clone();
            tokio::spawn(async move { reconcile.run(reconcile_cancel).await })
        };

        Ok(Self {
            config,
            cancel,
            reconcile_task,
            watchdog_task,
            background_tasks,
            supervisor,
        })
    }

    /// Blocks until SIGINT/SIGTERM, running SIGHUP as a forced
    /// reconciliation restart in between.
    pub async fn run_until_shutdown(mut self) -> Result<(), LifecycleError> {
        let mut sighup = signal(SignalKind::hangup())
            .map_err(|e| LifecycleError::SignalHandler(format!("SIGHUP: {e}")))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| LifecycleError::SignalHandler(format!("SIGTERM: {e}")))?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
                _ = sighup.recv() => {
                    info!("received SIGHUP, restarting collector");
                    if let Err(e) = self.supervisor.restart(&self.config.config_path).await {
                        warn!(error = %e, "SIGHUP-triggered restart failed");
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stops C4, then C3 (with its own internally-bounded wait), then the
    /// C6 janitor/RPC tasks — in that order, all under one overall bound so
    /// shutdown latency cannot exceed [`AGENT_SHUTDOWN_TIMEOUT`] regardless
    /// of where along the sequence something is slow to stop.
    async fn shutdown(self) {
        self.cancel.cancel();

        let ordered_shutdown = async {
            let _ = self.reconcile_task.await;

            if let Err(e) = self.supervisor.stop().await {
                warn!(error = %e, "collector stop during shutdown failed");
            }
            let _ = self.watchdog_task.await;

            for task in self.background_tasks {
                let _ = task.await;
            }
        };

        if tokio::time::timeout(AGENT_SHUTDOWN_TIMEOUT, ordered_shutdown).await.is_err() {
            warn!("agent shutdown exceeded its bound, exiting anyway");
        }
    }
}

fn build_identity(config: &AgentConfig) -> Result<AgentIdentity, LifecycleError> {
    let hostname = hostname::get()
        .map_err(|e| LifecycleError::Hostname(e.to_string()))?
        .to_string_lossy()
        .into_owned();

    let platform = match config.mode {
        DeploymentMode::Host => Platform::Host,
        DeploymentMode::Docker => Platform::Docker,
        DeploymentMode::Kubernetes => Platform::Kubernetes,
    };

    Ok(AgentIdentity {
        hostname,
        cluster_name: config.k8s.as_ref().map(|k| k.cluster_name.clone()),
        architecture: std::env::consts::ARCH.to_string(),
        platform,
        agent_version: env!("CARGO_PKG_VERSION").to_string(),
        collector_version: String::new(),
        api_key: config.api_key.clone(),
    })
}
