// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The tenant's REST data API and its API documentation sidecar.

use std::collections::BTreeMap;

use hearth_cloud_resources::crd::default_labels;
use hearth_cloud_resources::naming::{self, Component, TenantEndpoints};
use hearth_cloud_resources::{DatabaseRole, RoleCredentials, TenantRef};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use maplit::btreemap;

use crate::pod::{http_probe, object_meta, security_context};
use crate::KubernetesTenantOrchestratorConfig;

/// The role anonymous requests are executed as.
const ANONYMOUS_ROLE: &str = "anon";

fn pod_labels(tenant: &TenantRef) -> BTreeMap<String, String> {
    btreemap! {
        "app".to_owned() => naming::rest_api_name(tenant),
    }
}

fn literal(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Renders the REST API deployment. The API logs in as the `authenticator`
/// role and verifies request tokens against `jwt_secret`.
pub(crate) fn create_deployment_object(
    config: &KubernetesTenantOrchestratorConfig,
    namespace: &str,
    tenant: &TenantRef,
    jwt_secret: &str,
) -> Deployment {
    let endpoints = TenantEndpoints::new(tenant, &config.external_domain);
    let security_context = security_context(config);

    let rest = Container {
        name: "rest".to_owned(),
        image: Some(config.rest_api_image.clone()),
        image_pull_policy: Some(config.image_pull_policy.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: config.rest_api_port.into(),
            name: Some("http".into()),
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        env: Some(vec![
            EnvVar {
                name: "PGRST_DB_URI".to_owned(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: naming::role_secret_name(tenant, DatabaseRole::Authenticator),
                        key: RoleCredentials::URI_KEY.to_owned(),
                        optional: Some(false),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            literal("PGRST_DB_SCHEMAS", "public"),
            literal("PGRST_DB_ANON_ROLE", ANONYMOUS_ROLE),
            literal("PGRST_JWT_SECRET", jwt_secret),
            literal("PGRST_OPENAPI_SERVER_PROXY_URI", endpoints.rest_url.clone()),
            literal("PGRST_SERVER_PORT", config.rest_api_port.to_string()),
            literal("PGRST_ADMIN_SERVER_PORT", "3001"),
        ]),
        readiness_probe: Some(http_probe(3001, "/ready")),
        security_context: security_context.clone(),
        ..Default::default()
    };

    let docs = Container {
        name: "docs".to_owned(),
        image: Some(config.docs_image.clone()),
        image_pull_policy: Some(config.image_pull_policy.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: config.docs_port.into(),
            name: Some("docs".into()),
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        env: Some(vec![
            literal("API_URL", endpoints.rest_url),
            literal("BASE_URL", naming::DOCS_PATH),
            literal("PORT", config.docs_port.to_string()),
        ]),
        security_context,
        ..Default::default()
    };

    let mut pod_template_labels = pod_labels(tenant);
    pod_template_labels.extend(default_labels(tenant, Component::RestApi));

    Deployment {
        metadata: object_meta(
            config,
            namespace,
            tenant,
            Component::RestApi,
            naming::rest_api_name(tenant),
        ),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(pod_labels(tenant)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_template_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![rest, docs],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Renders the service exposing both the REST API and the docs viewer.
pub(crate) fn create_service_object(
    config: &KubernetesTenantOrchestratorConfig,
    namespace: &str,
    tenant: &TenantRef,
) -> Service {
    let service_port = |name: &str, port: u16| ServicePort {
        name: Some(name.into()),
        port: port.into(),
        target_port: Some(IntOrString::Int(port.into())),
        protocol: Some("TCP".into()),
        ..Default::default()
    };
    Service {
        metadata: object_meta(
            config,
            namespace,
            tenant,
            Component::RestApi,
            naming::rest_api_name(tenant),
        ),
        spec: Some(ServiceSpec {
            selector: Some(pod_labels(tenant)),
            ports: Some(vec![
                service_port("http", config.rest_api_port),
                service_port("docs", config.docs_port),
            ]),
            ..Default::default()
        }),
        status: None,
    }
}
