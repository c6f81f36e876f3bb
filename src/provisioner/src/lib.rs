// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The hearth tenant provisioner.
//!
//! [`ProjectService`] drives the creation and teardown of a tenant's stack
//! across the SQL-RPC service, object storage, and the tenant resource
//! controller. [`HealthMonitor`] reports the progress of a tenant's database
//! cluster, and [`ConnectionCache`] hands out pooled connections to tenant
//! databases.

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod keys;
pub mod metrics;
pub mod project;
pub mod rpc;
pub mod saga;
pub mod storage;
pub mod store;

pub use crate::cache::{CallerIdentity, ConnectionCache, TtlCache};
pub use crate::error::{AggregateError, Error, UpstreamComponent};
pub use crate::health::{ClusterHealth, HealthMonitor, Progress, StatusEvent, WatchOutcome};
pub use crate::project::{ProjectService, ProjectServiceConfig};
