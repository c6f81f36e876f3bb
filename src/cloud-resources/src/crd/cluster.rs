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

    /// A highly available Postgres cluster.
    #[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    #[kube(
        namespaced,
        group = "postgresql.cnpg.io",
        version = "v1",
        kind = "Cluster",
        singular = "cluster",
        plural = "clusters",
        status = "ClusterStatus"
    )]
    pub struct ClusterSpec {
        /// Number of instances required in the cluster.
        pub instances: i32,
        /// Name of the container image, overriding the operator's default.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub image_name: Option<String>,
        pub storage: StorageConfiguration,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub bootstrap: Option<BootstrapConfiguration>,
        /// Roles managed declaratively by the operator.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub managed: Option<ManagedConfiguration>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct StorageConfiguration {
        /// Size of the volume, as a Kubernetes quantity.
        pub size: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub storage_class: Option<String>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct BootstrapConfiguration {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub initdb: Option<BootstrapInitDb>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct BootstrapInitDb {
        /// Name of the database created at bootstrap.
        pub database: String,
        /// Name of the role owning the bootstrap database.
        pub owner: String,
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct ManagedConfiguration {
        #[serde(default)]
        pub roles: Vec<RoleConfiguration>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct RoleConfiguration {
        pub name: String,
        /// Either `present` or `absent`.
        pub ensure: String,
        pub login: bool,
        /// A secret with `username` and `password` keys holding the role's
        /// credentials.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub password_secret: Option<LocalObjectReference>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub in_roles: Vec<String>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    pub struct ClusterStatus {
        /// Human-readable phase of the cluster, like `Cluster in healthy state`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub phase: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub phase_reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub ready_instances: Option<i32>,
    }
}
