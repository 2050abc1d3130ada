// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Config Store (C2): persists control-plane config to disk (host/docker)
//! or to a Kubernetes ConfigMap (k8s).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, PostParams};
use oca_engine::{ConfigStore, ConfigStoreError};
use serde_json::{Map, Value};

/// Writes the collector's own YAML config atomically: serialize, write to
/// `<path>.new`, `fsync`, then rename over `<path>`. The `.new` file is
/// always removed on any failure path so a half-written file never lingers.
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write_atomic(path: &Path, yaml: &str) -> std::io::Result<()> {
        let staging = path.with_extension("yaml.new");
        let result = (|| {
            std::fs::write(&staging, yaml)?;
            let file = std::fs::File::open(&staging)?;
            file.sync_all()?;
            std::fs::rename(&staging, path)
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&staging);
        }
        result
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn write_collector_config(&self, config: &Map<String, Value>) -> Result<(), ConfigStoreError> {
        let yaml = serde_yaml::to_string(config).map_err(|e| ConfigStoreError::Io(e.to_string()))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::write_atomic(&path, &yaml))
            .await
            .map_err(|e| ConfigStoreError::Io(e.to_string()))?
            .map_err(|e| ConfigStoreError::Io(e.to_string()))
    }

    async fn update_daemonset_configmap(&self, _config: &Map<String, Value>) -> Result<(), ConfigStoreError> {
        Err(ConfigStoreError::Io("FileConfigStore has no ConfigMap to update".into()))
    }

    async fn update_deployment_configmap(&self, _config: &Map<String, Value>) -> Result<(), ConfigStoreError> {
        Err(ConfigStoreError::Io("FileConfigStore has no ConfigMap to update".into()))
    }
}

/// Replaces a named ConfigMap's entire `data` map with a single key. A full
/// `Api::replace` PUT, not a merge patch — fields (and other `data` keys)
/// not in the sent payload are not preserved, per the control-plane contract.
pub struct ConfigMapStore {
    client: kube::Client,
    namespace: String,
    daemonset_configmap: String,
    deployment_configmap: String,
    daemonset_key: String,
    deployment_key: String,
}

impl ConfigMapStore {
    pub fn new(
        client: kube::Client,
        namespace: impl Into<String>,
        daemonset_configmap: impl Into<String>,
        deployment_configmap: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            daemonset_configmap: daemonset_configmap.into(),
            deployment_configmap: deployment_configmap.into(),
            daemonset_key: "agent-daemonset.yaml".to_string(),
            deployment_key: "agent-deployment.yaml".to_string(),
        }
    }

    async fn replace_key(&self, configmap_name: &str, key: &str, config: &Map<String, Value>) -> Result<(), ConfigStoreError> {
        let yaml = serde_yaml::to_string(config).map_err(|e| ConfigStoreError::K8sApi(e.to_string()))?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);

        let mut existing = api.get(configmap_name).await.map_err(|e| ConfigStoreError::K8sApi(e.to_string()))?;
        existing.data = Some(replaced_data(key, yaml));

        api.replace(configmap_name, &PostParams::default(), &existing)
            .await
            .map_err(|e| ConfigStoreError::K8sApi(e.to_string()))?;
        Ok(())
    }
}

/// The full desired `data` map for a replace call: exactly one key, nothing
/// carried over from whatever was there before.
fn replaced_data(key: &str, yaml: String) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    data.insert(key.to_string(), yaml);
    data
}

#[async_trait]
impl ConfigStore for ConfigMapStore {
    async fn write_collector_config(&self, _config: &Map<String, Value>) -> Result<(), ConfigStoreError> {
        Err(ConfigStoreError::K8sApi("ConfigMapStore writes no local file".into()))
    }

    async fn update_daemonset_configmap(&self, config: &Map<String, Value>) -> Result<(), ConfigStoreError> {
        let name = self.daemonset_configmap.clone();
        let key = self.daemonset_key.clone();
        self.replace_key(&name, &key, config).await
    }

    async fn update_deployment_configmap(&self, config: &Map<String, Value>) -> Result<(), ConfigStoreError> {
        let name = self.deployment_configmap.clone();
        let key = self.deployment_key.clone();
        self.replace_key(&name, &key, config).await
    }
}

/// Picks the one store implementation the deployment mode actually needs,
/// so the reconciliation loop can hold a single concrete `ConfigStore`
/// rather than a trait object.
pub enum AgentStore {
    File(FileConfigStore),
    ConfigMap(ConfigMapStore),
}

#[async_trait]
impl ConfigStore for AgentStore {
    async fn write_collector_config(&self, config: &Map<String, Value>) -> Result<(), ConfigStoreError> {
        match self {
            Self::File(s) => s.write_collector_config(config).await,
            Self::ConfigMap(s) => s.write_collector_config(config).await,
        }
    }

    async fn update_daemonset_configmap(&self, config: &Map<String, Value>) -> Result<(), ConfigStoreError> {
        match self {
            Self::File(s) => s.update_daemonset_configmap(config).await,
            Self::ConfigMap(s) => s.update_daemonset_configmap(config).await,
        }
    }

    async fn update_deployment_configmap(&self, config: &Map<String, Value>) -> Result<(), ConfigStoreError> {
        match self {
            Self::File(s) => s.update_deployment_configmap(config).await,
            Self::ConfigMap(s) => s.update_deployment_configmap(config).await,
        }
    }
}
