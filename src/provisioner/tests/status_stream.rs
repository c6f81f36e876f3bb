// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The server-sent status stream.

mod common;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use hearth_provisioner::http::{self, HttpState};
use hearth_provisioner::store::ProjectStore;
use tokio_util::sync::CancellationToken;

use crate::common::{Harness, HEALTHY_PHASES, TENANT};

fn state(h: &Harness) -> HttpState {
    HttpState {
        health: Arc::clone(&h.health),
        store: Arc::clone(&h.store) as Arc<dyn ProjectStore>,
        registry: h.registry.clone(),
        shutdown: CancellationToken::new(),
    }
}

async fn body(res: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn streams_progress_until_healthy() {
    let h = Harness::new();
    h.resources.set_phases(&HEALTHY_PHASES);

    let res = http::project_status(State(state(&h)), Path(TENANT.into())).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body(res).await;

    let events: Vec<&str> = body
        .lines()
        .filter_map(|l| l.strip_prefix("event:"))
        .map(str::trim)
        .collect();
    assert_eq!(events, vec!["progress"; 5]);
    assert!(
        body.contains(r#"{"message":"Your project is ready","step":4,"totalStep":4}"#),
        "{body}"
    );
    assert!(h.store.get(&TENANT.parse().unwrap()).unwrap().initialized_at.is_some());

    let metrics = body_text(http::metrics(State(state(&h))).await).await;
    assert!(metrics.contains("hearth_health_polls_total"), "{metrics}");
}

async fn body_text(res: axum::response::Response) -> String {
    assert_eq!(res.status(), StatusCode::OK);
    body(res).await
}

#[tokio::test(start_paused = true)]
async fn polling_errors_are_error_events() {
    let h = Harness::new();
    h.journal.fail("k8s.cluster_phase");

    let res = http::project_status(State(state(&h)), Path(TENANT.into())).await;
    let body = body(res).await;

    let events: Vec<&str> = body
        .lines()
        .filter_map(|l| l.strip_prefix("event:"))
        .map(str::trim)
        .collect();
    assert_eq!(events, vec!["progress", "error"]);
}

#[tokio::test]
async fn rejects_unknown_and_malformed_refs() {
    let h = Harness::new();

    let res = http::project_status(State(state(&h)), Path("not-a-ref".into())).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = http::project_status(State(state(&h)), Path("abcdefghijklmnopqrst".into())).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
