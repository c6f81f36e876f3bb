// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Pieces shared by the object builders.

use hearth_cloud_resources::crd::managed_resource_meta;
use hearth_cloud_resources::naming::Component;
use hearth_cloud_resources::TenantRef;
use k8s_openapi::api::core::v1::{
    Capabilities, HTTPGetAction, Probe, SeccompProfile, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use crate::KubernetesTenantOrchestratorConfig;

/// Returns the metadata for the object `name` of `component`, including the
/// configured service labels.
pub(crate) fn object_meta(
    config: &KubernetesTenantOrchestratorConfig,
    namespace: &str,
    tenant: &TenantRef,
    component: Component,
    name: String,
) -> ObjectMeta {
    let mut meta = managed_resource_meta(tenant, component, name, namespace);
    if let Some(labels) = meta.labels.as_mut() {
        for (key, value) in &config.service_labels {
            labels.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    meta
}

pub(crate) fn security_context(
    config: &KubernetesTenantOrchestratorConfig,
) -> Option<SecurityContext> {
    if !config.enable_security_context {
        return None;
    }
    // See https://kubernetes.io/docs/concepts/security/pod-security-standards/#restricted
    Some(SecurityContext {
        run_as_non_root: Some(true),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        allow_privilege_escalation: Some(false),
        ..Default::default()
    })
}

/// A readiness probe issuing `GET path` against `port`.
pub(crate) fn http_probe(port: u16, path: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            port: IntOrString::Int(port.into()),
            path: Some(path.into()),
            ..Default::default()
        }),
        failure_threshold: Some(3),
        period_seconds: Some(10),
        success_threshold: Some(1),
        timeout_seconds: Some(1),
        ..Default::default()
    }
}
