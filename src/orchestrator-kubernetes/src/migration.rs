// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use hearth_cloud_resources::naming::{self, Component};
use hearth_cloud_resources::{DatabaseRole, RoleCredentials, TenantRef};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    SecretKeySelector, Volume, VolumeMount,
};
use kube::api::ObjectMeta;

use crate::pod::{object_meta, security_context};
use crate::secrets::SEED_SQL_KEY;
use crate::KubernetesTenantOrchestratorConfig;

/// The directory at which the signing key seed is mounted.
pub(crate) const SEED_MOUNT_PATH: &str = "/seed";

/// Renders the one-shot job that migrates the tenant's application database
/// and seeds its signing keys. The job connects as the `app` role and is
/// garbage collected once it has been finished for the configured TTL.
pub(crate) fn create_job_object(
    config: &KubernetesTenantOrchestratorConfig,
    namespace: &str,
    tenant: &TenantRef,
) -> Job {
    let metadata = object_meta(
        config,
        namespace,
        tenant,
        Component::MigrationJob,
        naming::migration_job_name(tenant),
    );
    let container = Container {
        name: "migrate".to_owned(),
        image: Some(config.migration_image.clone()),
        image_pull_policy: Some(config.image_pull_policy.to_string()),
        env: Some(vec![
            EnvVar {
                name: "DATABASE_URL".to_owned(),
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
                name: "SEED_FILE".to_owned(),
                value: Some(format!("{SEED_MOUNT_PATH}/{SEED_SQL_KEY}")),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "seed".to_owned(),
            mount_path: SEED_MOUNT_PATH.to_owned(),
            read_only: Some(true),
            ..Default::default()
        }]),
        security_context: security_context(config),
        ..Default::default()
    };
    Job {
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(config.migration_ttl_seconds),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: metadata.labels.clone(),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    restart_policy: Some("Never".to_owned()),
                    volumes: Some(vec![Volume {
                        name: "seed".to_owned(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: naming::jwks_config_map_name(tenant),
                            optional: Some(false),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        metadata,
        status: None,
    }
}
