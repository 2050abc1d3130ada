// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

use crate::identity::{AgentIdentity, Platform};
use crate::status::{AgentStatus, CollectorStatus};

/// A workload discovered (or re-reported) by the external language-detection
/// agent, eligible for auto-instrumentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedApp {
    pub namespace: String,
    #[serde(rename = "workload")]
    pub workload_name: String,
    pub kind: String,
    pub language: String,
    pub enabled: bool,
}

/// Built fresh every tick and POSTed to the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub is_docker: bool,
    pub hostname: String,
    pub platform: Platform,
    pub architecture: String,
    pub agent_version: String,
    pub agent_status: AgentStatus,
    pub collector_status: CollectorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collector_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k8s_deployments: Option<Vec<DetectedApp>>,
}

impl TickReport {
    pub fn new(
        identity: &AgentIdentity,
        agent_status: AgentStatus,
        collector_status: CollectorStatus,
        last_error: Option<String>,
        detected_apps: Option<Vec<DetectedApp>>,
        is_docker_override: bool,
    ) -> Self {
        Self {
            is_docker: identity.platform.is_docker(is_docker_override),
            hostname: identity.hostname.clone(),
            platform: identity.platform,
            architecture: identity.architecture.clone(),
            agent_version: identity.agent_version.clone(),
            agent_status,
            collector_status,
            collector_version: Some(identity.collector_version.clone()),
            last_error_message: last_error.filter(|s| !s.is_empty()),
            cluster_name: identity.cluster_name.clone(),
            k8s_deployments: detected_apps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> AgentIdentity {
        AgentIdentity {
            hostname: "node-1".into(),
            cluster_name: Some("prod".into()),
            architecture: "x86_64".into(),
            platform: Platform::Kubernetes,
            agent_version: "1.0.0".into(),
            collector_version: "0.100.0".into(),
            api_key: "secret".into(),
        }
    }

    #[test]
    fn wire_keys_match_control_plane_contract() {
        let report = TickReport::new(
            &identity(),
            AgentStatus::Running,
            CollectorStatus::Running,
            None,
            None,
            false,
        );
        let json = serde_json::to_value(&report).unwrap();
        for key in ["is_docker", "hostname", "platform", "architecture", "agent_version", "agent_status", "collector_status"] {
            assert!(json.get(key).is_some(), "missing wire key {key}");
        }
        // empty last_error is omitted, not sent as ""
        assert!(json.get("last_error_message").is_none());
    }

    #[test]
    fn empty_last_error_is_not_sent() {
        let report = TickReport::new(
            &identity(),
            AgentStatus::Running,
            CollectorStatus::Stopped,
            Some(String::new()),
            None,
            false,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("last_error_message").is_none());
    }
}
