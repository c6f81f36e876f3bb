// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The tenant's authentication API.

use std::collections::BTreeMap;

use hearth_cloud_resources::crd::default_labels;
use hearth_cloud_resources::naming::{self, Component, TenantEndpoints};
use hearth_cloud_resources::{AuthApiConfig, AuthApiPatch, DatabaseRole, RoleCredentials, TenantRef};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use maplit::btreemap;
use serde_json::json;

use crate::pod::{http_probe, object_meta, security_context};
use crate::KubernetesTenantOrchestratorConfig;

const CONTAINER_NAME: &str = "auth";
const DATABASE_URL_ENV: &str = "DATABASE_URL";
const BASE_URL_ENV: &str = "BASE_URL";

fn pod_labels(tenant: &TenantRef) -> BTreeMap<String, String> {
    btreemap! {
        "app".to_owned() => naming::auth_api_name(tenant),
    }
}

pub(crate) fn create_deployment_object(
    config: &KubernetesTenantOrchestratorConfig,
    namespace: &str,
    tenant: &TenantRef,
    auth: &AuthApiConfig,
) -> Deployment {
    let endpoints = TenantEndpoints::new(tenant, &config.external_domain);
    let mut env = vec![
        EnvVar {
            name: DATABASE_URL_ENV.to_owned(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: naming::role_secret_name(tenant, DatabaseRole::App),
                    key: RoleCredentials::URI_KEY.to_owned(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        EnvVar {
            name: BASE_URL_ENV.to_owned(),
            value: Some(endpoints.auth_url),
            ..Default::default()
        },
    ];
    env.extend(auth.env().into_iter().map(|(name, value)| EnvVar {
        name,
        value: Some(value),
        ..Default::default()
    }));

    let container = Container {
        name: CONTAINER_NAME.to_owned(),
        image: Some(config.auth_api_image.clone()),
        image_pull_policy: Some(config.image_pull_policy.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: config.auth_api_port.into(),
            name: Some("http".into()),
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        env: Some(env),
        readiness_probe: Some(http_probe(config.auth_api_port, "/api/auth/ok")),
        security_context: security_context(config),
        ..Default::default()
    };

    let mut pod_template_labels = pod_labels(tenant);
    pod_template_labels.extend(default_labels(
        tenant,
        Component::AuthApi,
    ));

    Deployment {
        metadata: object_meta(
            config,
            namespace,
            tenant,
            Component::AuthApi,
            naming::auth_api_name(tenant),
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
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn create_service_object(
    config: &KubernetesTenantOrchestratorConfig,
    namespace: &str,
    tenant: &TenantRef,
) -> Service {
    Service {
        metadata: object_meta(
            config,
            namespace,
            tenant,
            Component::AuthApi,
            naming::auth_api_name(tenant),
        ),
        spec: Some(ServiceSpec {
            selector: Some(pod_labels(tenant)),
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: config.auth_api_port.into(),
                target_port: Some(IntOrString::Int(config.auth_api_port.into())),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Renders a strategic merge patch that sets only the environment variables
/// named by `patch`. Containers and variables merge by name, so every other
/// variable keeps its current value.
pub(crate) fn create_env_patch(patch: &AuthApiPatch) -> serde_json::Value {
    let env: Vec<_> = patch
        .env()
        .into_iter()
        .map(|(name, value)| json!({"name": name, "value": value}))
        .collect();
    json!({
        "spec": {
            "template": {
                "spec": {
                    "containers": [{"name": CONTAINER_NAME, "env": env}],
                },
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use hearth_cloud_resources::{AuthProvider, AuthProviderSetting};

    use super::*;
    use crate::pod::tests::{config, tenant, NAMESPACE};

    fn env_value<'a>(deployment: &'a Deployment, name: &str) -> Option<&'a EnvVar> {
        deployment.spec.as_ref()?.template.spec.as_ref()?.containers[0]
            .env
            .as_ref()?
            .iter()
            .find(|var| var.name == name)
    }

    #[test]
    fn deployment_renders_provider_env() {
        let auth = AuthApiConfig {
            auth_secret: "s3cret".into(),
            trusted_origins: vec!["https://a.dev".into(), "https://b.dev".into()],
            proxy_url: None,
            providers: vec![AuthProviderSetting {
                provider: AuthProvider::Google,
                enabled: true,
                client_id: Some("gid".into()),
                client_secret: Some("gsecret".into()),
            }],
        };
        let deployment = create_deployment_object(&config(), NAMESPACE, &tenant(), &auth);
        assert_eq!(
            deployment.metadata.name.as_deref(),
            Some("hisqrzwgndjcycmkwpnj-auth")
        );
        let value = |name| env_value(&deployment, name).and_then(|v| v.value.clone());
        assert_eq!(value("AUTH_SECRET").as_deref(), Some("s3cret"));
        assert_eq!(
            value("TRUSTED_ORIGINS").as_deref(),
            Some("https://a.dev,https://b.dev")
        );
        assert_eq!(value("GOOGLE_ENABLED").as_deref(), Some("true"));
        assert_eq!(value("GOOGLE_CLIENT_ID").as_deref(), Some("gid"));
        assert_eq!(value("PROXY_URL"), None);
        assert_eq!(
            value("BASE_URL").as_deref(),
            Some("https://hisqrzwgndjcycmkwpnj.hearth.test/api/auth")
        );
        let database_url = env_value(&deployment, "DATABASE_URL").unwrap();
        let selector = database_url
            .value_from
            .as_ref()
            .and_then(|source| source.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(selector.name, "hisqrzwgndjcycmkwpnj-cluster-app");
        assert_eq!(selector.key, "uri");
    }

    #[test]
    fn selector_matches_service() {
        let deployment = create_deployment_object(
            &config(),
            NAMESPACE,
            &tenant(),
            &AuthApiConfig::default(),
        );
        let service = create_service_object(&config(), NAMESPACE, &tenant());
        let selector = service.spec.unwrap().selector.unwrap();
        let template_labels = deployment
            .spec
            .unwrap()
            .template
            .metadata
            .unwrap()
            .labels
            .unwrap();
        for (key, value) in selector {
            assert_eq!(template_labels[&key], value);
        }
    }

    #[test]
    fn env_patch_touches_only_named_fields() {
        let patch = AuthApiPatch {
            trusted_origins: None,
            proxy_url: Some("https://proxy.dev".into()),
            providers: vec![],
        };
        assert_eq!(
            create_env_patch(&patch),
            json!({
                "spec": {"template": {"spec": {"containers": [{
                    "name": "auth",
                    "env": [{"name": "PROXY_URL", "value": "https://proxy.dev"}],
                }]}}}
            })
        );
    }
}
