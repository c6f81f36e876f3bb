// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Tracks the provisioning progress of a tenant's database cluster.
//!
//! [`HealthMonitor::watch`] polls the phase of the cluster on a fixed
//! interval and reports it as a stream of [`StatusEvent`]s. The reported step
//! never decreases, and the stream ends on the first healthy observation, on
//! cancellation, or on a failed poll.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hearth_cloud_resources::{TenantRef, TenantResourceReader};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::Error;
use crate::metrics::Metrics;
use crate::store::{ProjectStore, ProjectUpdate};

/// The number of steps until a cluster is healthy.
pub const TOTAL_STEPS: u32 = 4;

/// The default interval between two polls of a cluster's phase.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The health of a tenant's database cluster, as derived from the phase
/// reported by the cluster operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClusterHealth {
    Unknown,
    Initializing,
    SettingUpPrimary,
    WaitingForInstances,
    Healthy,
}

impl ClusterHealth {
    pub const PHASE_SETTING_UP_PRIMARY: &'static str = "Setting up primary";
    pub const PHASE_WAITING_FOR_INSTANCES: &'static str =
        "Waiting for the instances to become active";
    pub const PHASE_HEALTHY: &'static str = "Cluster in healthy state";

    /// Maps a phase string to a health. A cluster without a phase has not
    /// been picked up by the operator yet.
    pub fn from_phase(phase: Option<&str>) -> ClusterHealth {
        match phase {
            None | Some("") => ClusterHealth::Initializing,
            Some(Self::PHASE_SETTING_UP_PRIMARY) => ClusterHealth::SettingUpPrimary,
            Some(Self::PHASE_WAITING_FOR_INSTANCES) => ClusterHealth::WaitingForInstances,
            Some(Self::PHASE_HEALTHY) => ClusterHealth::Healthy,
            Some(_) => ClusterHealth::Unknown,
        }
    }

    pub fn step(&self) -> u32 {
        match self {
            ClusterHealth::Unknown => 0,
            ClusterHealth::Initializing => 1,
            ClusterHealth::SettingUpPrimary => 2,
            ClusterHealth::WaitingForInstances => 3,
            ClusterHealth::Healthy => 4,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ClusterHealth::Unknown => "Waiting for the database cluster",
            ClusterHealth::Initializing => "Initializing the database cluster",
            ClusterHealth::SettingUpPrimary => "Setting up the primary database instance",
            ClusterHealth::WaitingForInstances => {
                "Waiting for the database instances to become active"
            }
            ClusterHealth::Healthy => "Your project is ready",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ClusterHealth::Unknown => "unknown",
            ClusterHealth::Initializing => "initializing",
            ClusterHealth::SettingUpPrimary => "setting_up_primary",
            ClusterHealth::WaitingForInstances => "waiting_for_instances",
            ClusterHealth::Healthy => "healthy",
        }
    }

    fn progress(&self) -> Progress {
        Progress {
            message: self.message().to_owned(),
            step: self.step(),
            total_step: TOTAL_STEPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub message: String,
    pub step: u32,
    pub total_step: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Progress(Progress),
    /// Polling failed. Terminal.
    Error { message: String },
    /// The watch was cancelled. Terminal.
    Cancelled,
}

/// How a watch that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Healthy,
    Cancelled,
}

#[derive(Debug)]
pub struct HealthMonitor {
    reader: Arc<dyn TenantResourceReader>,
    store: Arc<dyn ProjectStore>,
    poll_interval: Duration,
    metrics: Metrics,
}

impl HealthMonitor {
    pub fn new(
        reader: Arc<dyn TenantResourceReader>,
        store: Arc<dyn ProjectStore>,
        poll_interval: Duration,
        metrics: Metrics,
    ) -> HealthMonitor {
        HealthMonitor {
            reader,
            store,
            poll_interval,
            metrics,
        }
    }

    /// Watches the cluster of `tenant` until it is healthy, sending progress
    /// to `events` if given.
    ///
    /// The first healthy observation records the project's initialization
    /// time, if it has none yet. Cancellation through `cancel`, or the
    /// receiver of `events` going away, ends the watch with
    /// [`WatchOutcome::Cancelled`].
    #[instrument(skip(self, events, cancel), fields(tenant = %tenant))]
    pub async fn watch(
        &self,
        tenant: &TenantRef,
        events: Option<&mpsc::Sender<StatusEvent>>,
        cancel: &CancellationToken,
    ) -> Result<WatchOutcome, Error> {
        let mut reported = ClusterHealth::Unknown;
        if !emit(events, StatusEvent::Progress(reported.progress())).await {
            return Ok(WatchOutcome::Cancelled);
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let phase = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(cancelled(events)),
                phase = async {
                    interval.tick().await;
                    self.reader.cluster_phase(tenant).await
                } => phase,
            };
            let phase = match phase {
                Ok(phase) => phase,
                Err(e) => {
                    let e = Error::from(e);
                    warn!("polling cluster phase failed: {e}");
                    emit(events, StatusEvent::Error { message: e.to_string() }).await;
                    return Err(e);
                }
            };

            let health = ClusterHealth::from_phase(phase.as_deref());
            self.metrics
                .health_polls
                .with_label_values(&[health.label()])
                .inc();
            match health {
                ClusterHealth::Unknown => {
                    warn!(phase = phase.as_deref(), "unrecognized cluster phase");
                }
                ClusterHealth::Healthy => {
                    if let Err(e) = self.mark_initialized(tenant).await {
                        emit(events, StatusEvent::Error { message: e.to_string() }).await;
                        return Err(e);
                    }
                    emit(events, StatusEvent::Progress(health.progress())).await;
                    info!("cluster is healthy");
                    return Ok(WatchOutcome::Healthy);
                }
                _ if health > reported => {
                    debug!(step = health.step(), "cluster progressed");
                    reported = health;
                    if !emit(events, StatusEvent::Progress(health.progress())).await {
                        return Ok(WatchOutcome::Cancelled);
                    }
                }
                _ => {}
            }
        }
    }

    /// Starts watching the cluster of `tenant` in the background and returns
    /// the stream of its events. The watch ends when `cancel` is cancelled or
    /// the receiver is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        tenant: TenantRef,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StatusEvent> {
        let (tx, rx) = mpsc::channel(1);
        let monitor = Arc::clone(self);
        let name = format!("health-watch-{tenant}");
        hearth_ore::task::spawn(
            move || name,
            async move {
                if let Err(e) = monitor.watch(&tenant, Some(&tx), &cancel).await {
                    debug!(%tenant, "health watch failed: {e}");
                }
            },
        );
        rx
    }

    async fn mark_initialized(&self, tenant: &TenantRef) -> Result<(), Error> {
        match self.store.find_by_ref(tenant).await? {
            Some(project) if project.initialized_at.is_none() => {
                let update = ProjectUpdate {
                    initialized_at: Some(Utc::now()),
                    ..Default::default()
                };
                self.store.update_by_ref(tenant, &update).await?;
                info!(project = %project.id, "project initialized");
            }
            Some(_) => debug!("project already initialized"),
            None => warn!("no project record for healthy cluster"),
        }
        Ok(())
    }
}

/// Sends `event`, returning false if nobody is listening anymore.
async fn emit(events: Option<&mpsc::Sender<StatusEvent>>, event: StatusEvent) -> bool {
    match events {
        Some(tx) => tx.send(event).await.is_ok(),
        None => true,
    }
}

fn cancelled(events: Option<&mpsc::Sender<StatusEvent>>) -> WatchOutcome {
    debug!("health watch cancelled");
    if let Some(tx) = events {
        // The consumer may be gone or slow. Neither is worth waiting for.
        let _ = tx.try_send(StatusEvent::Cancelled);
    }
    WatchOutcome::Cancelled
}
