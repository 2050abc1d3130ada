// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collector Supervisor (C3) and Reconciliation Loop (C4).

pub mod reconcile;
pub mod subprocess;
pub mod supervisor;

pub use reconcile::{
    ConfigClientError, ConfigStore, ConfigStoreError, DetectedAppSource, K8sTargets,
    ReconcileLoop, RemoteConfigClient,
};
pub use supervisor::{CollectorEngine, CollectorHandle, CollectorState, CollectorSupervisor, SupervisorError};
