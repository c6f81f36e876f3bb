// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use hearth_ore::metric;
use hearth_ore::metrics::{histogram_seconds_buckets, MetricsRegistry};
use prometheus::{HistogramVec, IntCounterVec};

#[derive(Debug, Clone)]
pub struct Metrics {
    /// Outcomes of project creations.
    pub project_create: IntCounterVec,
    /// Compensating actions that failed during a rollback.
    pub compensation_failures: IntCounterVec,
    /// Teardown actions that failed while deleting a project.
    pub teardown_failures: IntCounterVec,
    /// Outcomes of post-install runs.
    pub post_install: IntCounterVec,
    pub post_install_duration_seconds: HistogramVec,
    /// Cluster health polls, by observed health.
    pub health_polls: IntCounterVec,
    /// Connection cache lookups, by hit or miss.
    pub connection_cache: IntCounterVec,
}

impl Metrics {
    pub fn register_into(registry: &MetricsRegistry) -> Self {
        Self {
            project_create: registry.register(metric!(
                name: "hearth_project_create_total",
                help: "Total number of project creations, by result.",
                var_labels: ["result"],
            )),
            compensation_failures: registry.register(metric!(
                name: "hearth_compensation_failures_total",
                help: "Total number of compensating actions that failed during a rollback.",
                var_labels: ["action"],
            )),
            teardown_failures: registry.register(metric!(
                name: "hearth_teardown_failures_total",
                help: "Total number of teardown actions that failed while deleting a project.",
                var_labels: ["action"],
            )),
            post_install: registry.register(metric!(
                name: "hearth_post_install_total",
                help: "Total number of post-install runs, by result.",
                var_labels: ["result"],
            )),
            post_install_duration_seconds: registry.register(metric!(
                name: "hearth_post_install_duration_seconds",
                help: "How long post-install runs take, including waiting for the cluster.",
                var_labels: ["result"],
                buckets: histogram_seconds_buckets(1.0, 1024.0),
            )),
            health_polls: registry.register(metric!(
                name: "hearth_health_polls_total",
                help: "Total number of cluster health polls, by observed health.",
                var_labels: ["health"],
            )),
            connection_cache: registry.register(metric!(
                name: "hearth_connection_cache_requests_total",
                help: "Total number of tenant connection cache lookups, by result.",
                var_labels: ["result"],
            )),
        }
    }
}
