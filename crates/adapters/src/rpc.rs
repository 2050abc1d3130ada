// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loopback-only HTTP inbox the detection sidecar pushes results into.
//!
//! Deliberately unauthenticated — it only ever binds to loopback, the same
//! trust boundary the original raw-TCP RPC server relied on.

use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use oca_core::Clock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::detect::{DetectionCache, DetectionEntry};

#[derive(Debug, Serialize)]
struct PushResponse {
    accepted: usize,
}

async fn push_detection_results<C: Clock>(
    State(cache): State<DetectionCache<C>>,
    Json(entries): Json<Vec<DetectionEntry>>,
) -> Json<PushResponse> {
    let accepted = cache.push(entries);
    Json(PushResponse { accepted })
}

/// Serves the detection inbox on `127.0.0.1:<port>` until `cancel` fires.
pub async fn serve<C: Clock>(
    cache: DetectionCache<C>,
    port: u16,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let app = Router::new()
        .route("/detections", post(push_detection_results::<C>))
        .with_state(cache);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "detection inbox listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
