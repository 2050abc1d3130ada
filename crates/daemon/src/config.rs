// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::time::Duration;

use crate::lifecycle::LifecycleError;

const DEFAULT_COLLECTOR_ENDPOINT: &str = "https://otel.kloudmate.com:4318";
const DEFAULT_CONFIG_PATH: &str = "/etc/oca/agent.yaml";
const DEFAULT_COLLECTOR_BIN: &str = "otelcol-contrib";
const DEFAULT_INTERVAL_SECS: u64 = 30;
const MIN_INTERVAL_SECS: u64 = 10;
const DEFAULT_RPC_PORT: u16 = 7777;

/// Deployment shape, mirrors `oca_core::Platform` but read from the
/// environment before identity is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    Host,
    Docker,
    Kubernetes,
}

impl DeploymentMode {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Some(Self::Host),
            "docker" => Some(Self::Docker),
            "kubernetes" | "k8s" => Some(Self::Kubernetes),
            _ => None,
        }
    }
}

/// k8s-only settings, required when [`DeploymentMode::Kubernetes`] is selected.
#[derive(Debug, Clone)]
pub struct K8sConfig {
    pub namespace: String,
    pub cluster_name: String,
    pub daemonset_name: String,
    pub deployment_name: String,
    pub daemonset_configmap_name: String,
    pub deployment_configmap_name: String,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_key: String,
    pub collector_endpoint: String,
    pub update_endpoint: String,
    pub check_interval: Duration,
    pub config_path: String,
    pub collector_bin: String,
    pub mode: DeploymentMode,
    pub k8s: Option<K8sConfig>,
    pub detection_rpc_port: u16,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, LifecycleError> {
        let api_key = required("OCA_API_KEY")?;
        let collector_endpoint = optional("OCA_COLLECTOR_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_COLLECTOR_ENDPOINT.to_string());

        let update_endpoint = match optional("OCA_UPDATE_ENDPOINT") {
            Some(v) => v,
            None => derive_update_endpoint(&collector_endpoint),
        };

        let check_interval = check_interval();
        let config_path =
            optional("OCA_CONFIG_PATH").unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let collector_bin =
            optional("OCA_COLLECTOR_BIN").unwrap_or_else(|| DEFAULT_COLLECTOR_BIN.to_string());
        let detection_rpc_port = optional("OCA_DETECTION_RPC_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RPC_PORT);

        let mode = optional("OCA_DEPLOYMENT_MODE")
            .as_deref()
            .and_then(DeploymentMode::parse)
            .unwrap_or(DeploymentMode::Host);

        let k8s = match mode {
            DeploymentMode::Kubernetes => Some(K8sConfig {
                namespace: required("OCA_K8S_NAMESPACE")?,
                cluster_name: required("OCA_K8S_CLUSTER_NAME")?,
                daemonset_name: required("OCA_DAEMONSET_NAME")?,
                deployment_name: required("OCA_DEPLOYMENT_NAME")?,
                daemonset_configmap_name: optional("OCA_DAEMONSET_CONFIGMAP_NAME")
                    .unwrap_or_else(|| "agent-daemonset.yaml".to_string()),
                deployment_configmap_name: optional("OCA_DEPLOYMENT_CONFIGMAP_NAME")
                    .unwrap_or_else(|| "agent-deployment.yaml".to_string()),
            }),
            _ => None,
        };

        Ok(Self {
            api_key,
            collector_endpoint,
            update_endpoint,
            check_interval,
            config_path,
            collector_bin,
            mode,
            k8s,
            detection_rpc_port,
        })
    }
}

/// `30s` default, floored at `10s`. A value that fails to parse falls back
/// to the default with a warning rather than aborting startup.
fn check_interval() -> Duration {
    match optional("OCA_CONFIG_CHECK_INTERVAL_SECS") {
        None => Duration::from_secs(DEFAULT_INTERVAL_SECS),
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs.max(MIN_INTERVAL_SECS)),
            Err(_) => {
                tracing::warn!(value = %raw, "invalid OCA_CONFIG_CHECK_INTERVAL_SECS, using default");
                Duration::from_secs(DEFAULT_INTERVAL_SECS)
            }
        },
    }
}

/// The update-check endpoint defaults to the collector endpoint's root
/// domain rewritten to `api.<root-domain>/agents/config-check`.
fn derive_update_endpoint(collector_endpoint: &str) -> String {
    let host = collector_endpoint
        .split("://")
        .nth(1)
        .unwrap_or(collector_endpoint)
        .split(['/', ':'])
        .next()
        .unwrap_or(collector_endpoint);

    let root_domain = host.splitn(2, '.').nth(1).unwrap_or(host);
    format!("https://api.{root_domain}/agents/config-check")
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn required(key: &str) -> Result<String, LifecycleError> {
    optional(key).ok_or_else(|| LifecycleError::MissingEnv(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_update_endpoint_from_collector_host() {
        assert_eq!(
            derive_update_endpoint("https://otel.kloudmate.com:4318"),
            "https://api.kloudmate.com/agents/config-check"
        );
    }

    #[test]
    fn deployment_mode_parses_case_insensitively() {
        assert_eq!(DeploymentMode::parse("Kubernetes"), Some(DeploymentMode::Kubernetes));
        assert_eq!(DeploymentMode::parse("k8s"), Some(DeploymentMode::Kubernetes));
        assert_eq!(DeploymentMode::parse("bogus"), None);
    }
}
