// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workload Rollout Controller (C5): forced rolling restarts and idempotent
//! auto-instrumentation annotations.

mod instrumentation;
mod rollout;

pub use instrumentation::reconcile_instrumentation;
pub use rollout::trigger_rollout;

use std::fmt;

use kube::Client;
use thiserror::Error;

/// Kind of workload a `DetectedApp` or a rollout target names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    DaemonSet,
    Deployment,
    StatefulSet,
    ReplicaSet,
    Pod,
}

impl WorkloadKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DAEMONSET" => Some(Self::DaemonSet),
            "DEPLOYMENT" => Some(Self::Deployment),
            "STATEFULSET" => Some(Self::StatefulSet),
            "REPLICASET" => Some(Self::ReplicaSet),
            "POD" => Some(Self::Pod),
            _ => None,
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DaemonSet => "DaemonSet",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::ReplicaSet => "ReplicaSet",
            Self::Pod => "Pod",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum K8sError {
    #[error("unknown workload kind: {0}")]
    UnknownKind(String),

    #[error("unsupported language hint: {0}")]
    UnknownLanguage(String),

    #[error("kubernetes api error on {kind} {namespace}/{name}: {source}")]
    Api {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
}

/// Thin wrapper around a `kube::Client` scoped to the namespace this agent
/// operates in. Holds no other state — all operations are request/response.
#[derive(Clone)]
pub struct RolloutController {
    client: Client,
    namespace: String,
}

impl RolloutController {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self { client, namespace: namespace.into() }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}
