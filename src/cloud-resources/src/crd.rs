// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Custom resource definitions of the operators that run tenant
//! infrastructure.
//!
//! These are client-side mirrors of CRDs owned by third-party operators: the
//! Postgres cluster operator (`postgresql.cnpg.io`) and the ingress
//! controller (`traefik.io`). Only the fields the control plane writes or
//! reads are modeled.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::naming::Component;
use crate::TenantRef;

pub mod cluster;
pub mod database;
pub mod ingress_route;

/// The label holding the tenant reference of a managed object.
pub const TENANT_LABEL: &str = "hearth.dev/tenant-ref";
/// The label holding the component of a managed object.
pub const COMPONENT_LABEL: &str = "hearth.dev/component";
/// The standard Kubernetes label naming the manager of an object.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// The value of [`MANAGED_BY_LABEL`] on every object this control plane
/// creates.
pub const MANAGED_BY: &str = "hearth-provisioner";

/// A reference to an object in the same namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

/// Returns the labels installed on every object of `component` for
/// `tenant`.
pub fn default_labels(tenant: &TenantRef, component: Component) -> BTreeMap<String, String> {
    BTreeMap::from_iter([
        (TENANT_LABEL.to_owned(), tenant.to_string()),
        (COMPONENT_LABEL.to_owned(), component.label().to_owned()),
        (MANAGED_BY_LABEL.to_owned(), MANAGED_BY.to_owned()),
    ])
}

/// Returns the metadata for a managed object named `name`.
pub fn managed_resource_meta(
    tenant: &TenantRef,
    component: Component,
    name: String,
    namespace: &str,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_owned()),
        labels: Some(default_labels(tenant, component)),
        ..Default::default()
    }
}
