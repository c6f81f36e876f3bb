// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The provisioner's HTTP surface.
//!
//! Streams the provisioning progress of a project as server-sent events, and
//! serves liveness and Prometheus metrics.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::Stream;
use hearth_cloud_resources::TenantRef;
use hearth_ore::metrics::MetricsRegistry;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::health::{HealthMonitor, StatusEvent};
use crate::store::ProjectStore;

pub const STATUS_PATH: &str = "/api/projects/:tenant_ref/status";
pub const METRICS_PATH: &str = "/metrics";
pub const LIVEZ_PATH: &str = "/api/livez";

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct HttpState {
    pub health: Arc<HealthMonitor>,
    pub store: Arc<dyn ProjectStore>,
    pub registry: MetricsRegistry,
    /// Cancelled when the server shuts down, ending every open stream.
    pub shutdown: CancellationToken,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route(STATUS_PATH, get(project_status))
        .route(METRICS_PATH, get(metrics))
        .route(LIVEZ_PATH, get(livez))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorData<'a> {
    message: &'a str,
}

/// Streams the health of a project's database cluster until it is healthy,
/// polling fails, or the client goes away.
pub async fn project_status(
    State(state): State<HttpState>,
    Path(tenant_ref): Path<String>,
) -> Response {
    let tenant: TenantRef = match tenant_ref.parse() {
        Ok(tenant) => tenant,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("{e}")).into_response(),
    };
    match state.store.find_by_ref(&tenant).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (StatusCode::NOT_FOUND, format!("no project {tenant}")).into_response()
        }
        Err(e) => {
            warn!(%tenant, "looking up project failed: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    debug!(%tenant, "streaming project status");
    let cancel = state.shutdown.child_token();
    let events = state.health.subscribe(tenant, cancel.clone());
    Sse::new(event_stream(ReceiverStream::new(events), cancel))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response()
}

/// Renders status events as SSE events. Dropping the stream cancels the
/// watch behind it.
fn event_stream<S>(
    events: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Event, axum::Error>>
where
    S: Stream<Item = StatusEvent>,
{
    let guard = cancel.drop_guard();
    events.map_while(move |event| {
        let _ = &guard;
        match event {
            StatusEvent::Progress(progress) => {
                Some(Event::default().event("progress").json_data(progress))
            }
            StatusEvent::Error { message } => Some(
                Event::default()
                    .event("error")
                    .json_data(ErrorData { message: &message }),
            ),
            StatusEvent::Cancelled => None,
        }
    })
}

pub async fn metrics(State(state): State<HttpState>) -> Response {
    match state.registry.encode_text() {
        Ok(text) => text.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn livez() -> Result<&'static str, Infallible> {
    Ok("ok")
}
