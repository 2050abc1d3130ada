// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Deployment shape the agent is running under. Immutable after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Host,
    Docker,
    Kubernetes,
}

impl Platform {
    /// `is_docker` as the control plane's wire format expects it — distinct
    /// from `platform` because a host-mode agent running inside a plain
    /// Docker container still reports `platform: host` in some deployments.
    pub fn is_docker(self, is_docker_override: bool) -> bool {
        matches!(self, Platform::Docker) || is_docker_override
    }
}

/// Identity fields fixed at startup and attached to every tick report.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub hostname: String,
    pub cluster_name: Option<String>,
    pub architecture: String,
    pub platform: Platform,
    pub agent_version: String,
    pub collector_version: String,
    pub api_key: String,
}

impl AgentIdentity {
    /// Redact the API key for Debug/logging contexts.
    pub fn redacted(&self) -> String {
        format!(
            "AgentIdentity {{ hostname: {:?}, cluster_name: {:?}, architecture: {:?}, platform: {:?}, agent_version: {:?}, collector_version: {:?}, api_key: \"***\" }}",
            self.hostname,
            self.cluster_name,
            self.architecture,
            self.platform,
            self.agent_version,
            self.collector_version,
        )
    }
}
