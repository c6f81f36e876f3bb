// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Thin wrappers over [`Api`] that classify failures into [`ResourceError`].

use std::fmt::Debug;

use hearth_cloud_resources::crd::cluster::v1::Cluster;
use hearth_cloud_resources::crd::database::v1::Database;
use hearth_cloud_resources::crd::ingress_route::v1alpha1::{IngressRoute, IngressRouteTcp};
use hearth_cloud_resources::ResourceError;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::FIELD_MANAGER;

/// A Kubernetes object kind with a name suitable for error reports.
pub(crate) trait ManagedKind {
    const KIND: &'static str;
}

macro_rules! managed_kind {
    ($($ty:ty => $kind:literal),* $(,)?) => {
        $(impl ManagedKind for $ty {
            const KIND: &'static str = $kind;
        })*
    };
}

managed_kind! {
    Cluster => "Cluster",
    Database => "Database",
    Secret => "Secret",
    ConfigMap => "ConfigMap",
    Deployment => "Deployment",
    Service => "Service",
    Job => "Job",
    IngressRoute => "IngressRoute",
    IngressRouteTcp => "IngressRouteTCP",
}

/// Classifies a Kubernetes client error for the object `name` of kind `K`.
pub(crate) fn classify<K: ManagedKind>(name: &str, error: kube::Error) -> ResourceError {
    let kind = K::KIND;
    let name = name.to_owned();
    match error {
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            ResourceError::AlreadyExists { kind, name }
        }
        kube::Error::Api(resp) if resp.code == 404 => ResourceError::NotFound { kind, name },
        kube::Error::Api(resp) => ResourceError::Api {
            kind,
            name,
            code: resp.code,
            message: resp.message,
        },
        e => ResourceError::Transport {
            kind,
            name,
            source: Box::new(e),
        },
    }
}

/// Creates `resource`, failing if an object of the same name exists.
pub(crate) async fn create_resource<K>(api: &Api<K>, resource: &K) -> Result<(), ResourceError>
where
    K: Resource + ManagedKind + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = resource.name_any();
    trace!(kind = K::KIND, %name, "creating object");
    api.create(&PostParams::default(), resource)
        .await
        .map_err(|e| classify::<K>(&name, e))?;
    Ok(())
}

/// Replaces an existing object with `resource` in full. Keys present on the
/// stored object but absent from `resource` are dropped.
pub(crate) async fn replace_resource<K>(api: &Api<K>, resource: &K) -> Result<(), ResourceError>
where
    K: Resource + ManagedKind + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = resource.name_any();
    let current = get_resource(api, &name).await?;
    let mut resource = resource.clone();
    resource.meta_mut().resource_version = current.resource_version();
    trace!(kind = K::KIND, %name, "replacing object");
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_owned()),
        ..Default::default()
    };
    api.replace(&name, &params, &resource)
        .await
        .map_err(|e| classify::<K>(&name, e))?;
    Ok(())
}

/// Applies a strategic merge patch to the object `name`.
pub(crate) async fn patch_resource<K>(
    api: &Api<K>,
    name: &str,
    patch: &serde_json::Value,
) -> Result<(), ResourceError>
where
    K: Resource + ManagedKind + Clone + Debug + DeserializeOwned,
{
    trace!(kind = K::KIND, %name, "patching object");
    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.to_owned()),
        ..Default::default()
    };
    api.patch(name, &params, &Patch::Strategic(patch))
        .await
        .map_err(|e| classify::<K>(name, e))?;
    Ok(())
}

/// Deletes the object `name`. Dependents are collected in the background.
///
/// Deleting an absent object fails with [`ResourceError::NotFound`].
pub(crate) async fn delete_resource<K>(api: &Api<K>, name: &str) -> Result<(), ResourceError>
where
    K: Resource + ManagedKind + Clone + Debug + DeserializeOwned,
{
    trace!(kind = K::KIND, %name, "deleting object");
    api.delete(name, &DeleteParams::background())
        .await
        .map_err(|e| classify::<K>(name, e))?;
    Ok(())
}

pub(crate) async fn get_resource<K>(api: &Api<K>, name: &str) -> Result<K, ResourceError>
where
    K: Resource + ManagedKind + Clone + Debug + DeserializeOwned,
{
    trace!(kind = K::KIND, %name, "reading object");
    api.get(name).await.map_err(|e| classify::<K>(name, e))
}
