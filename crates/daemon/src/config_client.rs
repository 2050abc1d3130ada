// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote Config Client (C1): the single outbound call each reconciliation
//! tick makes to the control plane.

use std::time::Duration;

use async_trait::async_trait;
use oca_core::TickReport;
use oca_engine::{ConfigClientError, RemoteConfigClient};
use reqwest::Client;
use tracing::debug;

const CALL_TIMEOUT: Duration = Duration::from_secs(20);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpConfigClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl HttpConfigClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(CALL_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl RemoteConfigClient for HttpConfigClient {
    async fn check_for_updates(
        &self,
        report: &TickReport,
    ) -> Result<oca_core::UpdateResponse, ConfigClientError> {
        // Raw API key, not a Bearer token — the control plane's k8s/docker
        // update path expects the key verbatim in Authorization.
        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", &self.api_key)
            .json(report)
            .send()
            .await
            .map_err(|e| ConfigClientError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConfigClientError::Transport(format!(
                "control plane returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ConfigClientError::Transport(e.to_string()))?;

        debug!(bytes = body.len(), "received control plane response");

        serde_json::from_str(&body).map_err(|e| ConfigClientError::Decode(e.to_string()))
    }
}
