// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::LocalObjectReference;

pub mod v1 {
    use super::*;

    /// A database inside a [`Cluster`](crate::crd::cluster::v1::Cluster),
    /// reconciled by the cluster operator.
    #[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    #[kube(
        namespaced,
        group = "postgresql.cnpg.io",
        version = "v1",
        kind = "Database",
        singular = "database",
        plural = "databases",
        status = "DatabaseStatus"
    )]
    pub struct DatabaseSpec {
        /// Name of the database inside the cluster.
        pub name: String,
        /// Role owning the database.
        pub owner: String,
        pub cluster: LocalObjectReference,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub ensure: Option<String>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct DatabaseStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub applied: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub message: Option<String>,
    }
}
