// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;

use crate::report::DetectedApp;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct K8sApmSettings {
    #[serde(default)]
    pub apm_enabled: bool,
    #[serde(default)]
    pub apm_settings: Vec<DetectedApp>,
}

/// Decoded response body from a `CheckForUpdates` call.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateResponse {
    pub restart_required: bool,
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
    #[serde(default)]
    pub daemonset_config: Option<Map<String, Value>>,
    #[serde(default)]
    pub deployment_config: Option<Map<String, Value>>,
    #[serde(default)]
    pub k8s: Option<K8sApmSettings>,
}

impl UpdateResponse {
    /// True when both k8s config trees are present and non-empty.
    pub fn has_k8s_config_update(&self) -> bool {
        matches!(&self.daemonset_config, Some(m) if !m.is_empty())
            && matches!(&self.deployment_config, Some(m) if !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_host_mode_response() {
        let body = r#"{"restart_required": true, "config": {"receivers": {}}}"#;
        let resp: UpdateResponse = serde_json::from_str(body).unwrap();
        assert!(resp.restart_required);
        assert!(resp.config.is_some());
        assert!(!resp.has_k8s_config_update());
    }

    #[test]
    fn decodes_k8s_mode_response() {
        let body = r#"{
            "restart_required": true,
            "daemonset_config": {"receivers": {}},
            "deployment_config": {"receivers": {}},
            "k8s": {"apm_enabled": true, "apm_settings": [
                {"namespace": "bookinfo", "workload": "reviews", "kind": "DEPLOYMENT", "language": "java", "enabled": true}
            ]}
        }"#;
        let resp: UpdateResponse = serde_json::from_str(body).unwrap();
        assert!(resp.has_k8s_config_update());
        let k8s = resp.k8s.unwrap();
        assert!(k8s.apm_enabled);
        assert_eq!(k8s.apm_settings.len(), 1);
        assert_eq!(k8s.apm_settings[0].workload_name, "reviews");
    }

    #[test]
    fn missing_k8s_configs_is_not_an_update() {
        let body = r#"{"restart_required": false}"#;
        let resp: UpdateResponse = serde_json::from_str(body).unwrap();
        assert!(!resp.has_k8s_config_update());
    }
}
