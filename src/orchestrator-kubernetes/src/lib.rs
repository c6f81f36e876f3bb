// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Tenant resource management backed by Kubernetes.
//!
//! [`KubernetesTenantOrchestrator`] implements
//! [`TenantResourceController`] by rendering each tenant component into a
//! Kubernetes object and submitting it to the API server. Object
//! construction lives in one module per component and is pure, so that it
//! can be tested without a cluster; this module only wires the rendered
//! objects to the API.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hearth_cloud_resources::crd::cluster::v1::Cluster;
use hearth_cloud_resources::crd::database::v1::Database;
use hearth_cloud_resources::crd::ingress_route::v1alpha1::{IngressRoute, IngressRouteTcp};
use hearth_cloud_resources::{
    naming, AuthApiConfig, AuthApiPatch, DatabaseRole, ResourceError, RoleCredentials,
    StorageSize, TenantRef, TenantResourceController, TenantResourceReader,
};
use hearth_ore::cli::KeyValueArg;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::Api;
use kube::client::Client;
use tracing::instrument;

mod auth_api;
mod cluster;
mod ingress;
mod k8s;
mod migration;
mod pod;
mod rest_api;
mod secrets;
pub mod util;

use crate::k8s::{create_resource, delete_resource, get_resource, patch_resource, replace_resource};

const FIELD_MANAGER: &str = "hearth-provisioner";

/// Configures a [`KubernetesTenantOrchestrator`].
#[derive(Debug, Clone)]
pub struct KubernetesTenantOrchestratorConfig {
    /// The name of a Kubernetes context to use, if the Kubernetes configuration
    /// is loaded from the local kubeconfig.
    pub context: String,
    /// The namespace in which tenant objects live. Defaults to the namespace
    /// of the Kubernetes context.
    pub namespace: Option<String>,
    /// The domain under which tenant hosts are published.
    pub external_domain: String,
    /// Labels to install on every object created by the orchestrator, in
    /// addition to the standard tenant labels.
    pub service_labels: BTreeMap<String, String>,
    /// The image pull policy to set for every container.
    pub image_pull_policy: KubernetesImagePullPolicy,
    /// Whether to run containers under the restricted pod security standard.
    pub enable_security_context: bool,
    /// The Postgres image of tenant clusters, if not the operator default.
    pub cluster_image: Option<String>,
    /// The number of Postgres instances per tenant cluster.
    pub cluster_instances: i32,
    /// The StorageClass of tenant cluster volumes, if not the default.
    pub storage_class: Option<String>,
    pub auth_api_image: String,
    pub auth_api_port: u16,
    pub rest_api_image: String,
    pub rest_api_port: u16,
    pub docs_image: String,
    pub docs_port: u16,
    pub migration_image: String,
    /// How long a finished migration job lingers before it is garbage
    /// collected.
    pub migration_ttl_seconds: i32,
    /// The TLS secret shared by every tenant ingress route.
    pub tls_secret_name: String,
    pub http_entry_points: Vec<String>,
    pub tcp_entry_points: Vec<String>,
    /// An ingress middleware that strips the API path prefix before requests
    /// reach the REST API and the docs viewer, if any.
    pub strip_prefix_middleware: Option<String>,
}

/// Command line arguments for a [`KubernetesTenantOrchestratorConfig`].
#[derive(Debug, Clone, clap::Parser)]
pub struct KubernetesCliArgs {
    /// The Kubernetes context to use when running outside of a cluster.
    #[clap(long, env = "KUBERNETES_CONTEXT", default_value = "kind-kind")]
    pub kubernetes_context: String,
    /// The namespace in which tenant objects live.
    #[clap(long, env = "KUBERNETES_NAMESPACE")]
    pub kubernetes_namespace: Option<String>,
    /// Additional labels to install on every tenant object.
    #[clap(long, env = "KUBERNETES_SERVICE_LABEL", value_name = "KEY=VALUE")]
    pub kubernetes_service_label: Vec<KeyValueArg<String, String>>,
    #[clap(long, env = "KUBERNETES_IMAGE_PULL_POLICY", value_enum, default_value = "always")]
    pub kubernetes_image_pull_policy: KubernetesImagePullPolicy,
    #[clap(long, env = "ENABLE_SECURITY_CONTEXT")]
    pub enable_security_context: bool,
    #[clap(long, env = "CLUSTER_IMAGE")]
    pub cluster_image: Option<String>,
    #[clap(long, env = "CLUSTER_INSTANCES", default_value = "1")]
    pub cluster_instances: i32,
    #[clap(long, env = "CLUSTER_STORAGE_CLASS")]
    pub cluster_storage_class: Option<String>,
    #[clap(long, env = "AUTH_API_IMAGE")]
    pub auth_api_image: String,
    #[clap(long, env = "AUTH_API_PORT", default_value = "3000")]
    pub auth_api_port: u16,
    #[clap(long, env = "REST_API_IMAGE", default_value = "postgrest/postgrest:v12.2.3")]
    pub rest_api_image: String,
    #[clap(long, env = "REST_API_PORT", default_value = "3000")]
    pub rest_api_port: u16,
    #[clap(long, env = "DOCS_IMAGE", default_value = "swaggerapi/swagger-ui:v5.17.14")]
    pub docs_image: String,
    #[clap(long, env = "DOCS_PORT", default_value = "8080")]
    pub docs_port: u16,
    #[clap(long, env = "MIGRATION_IMAGE")]
    pub migration_image: String,
    #[clap(long, env = "MIGRATION_TTL_SECONDS", default_value = "300")]
    pub migration_ttl_seconds: i32,
    #[clap(long, env = "TLS_SECRET_NAME", default_value = "tenant-wildcard-tls")]
    pub tls_secret_name: String,
    #[clap(
        long,
        env = "HTTP_ENTRY_POINTS",
        value_delimiter = ',',
        default_value = "websecure"
    )]
    pub http_entry_points: Vec<String>,
    #[clap(
        long,
        env = "TCP_ENTRY_POINTS",
        value_delimiter = ',',
        default_value = "postgres"
    )]
    pub tcp_entry_points: Vec<String>,
    #[clap(long, env = "STRIP_PREFIX_MIDDLEWARE")]
    pub strip_prefix_middleware: Option<String>,
}

impl KubernetesCliArgs {
    /// Builds the orchestrator configuration, publishing tenants under
    /// `external_domain`.
    pub fn into_config(self, external_domain: String) -> KubernetesTenantOrchestratorConfig {
        KubernetesTenantOrchestratorConfig {
            context: self.kubernetes_context,
            namespace: self.kubernetes_namespace,
            external_domain,
            service_labels: self
                .kubernetes_service_label
                .into_iter()
                .map(|label| (label.key, label.value))
                .collect(),
            image_pull_policy: self.kubernetes_image_pull_policy,
            enable_security_context: self.enable_security_context,
            cluster_image: self.cluster_image,
            cluster_instances: self.cluster_instances,
            storage_class: self.cluster_storage_class,
            auth_api_image: self.auth_api_image,
            auth_api_port: self.auth_api_port,
            rest_api_image: self.rest_api_image,
            rest_api_port: self.rest_api_port,
            docs_image: self.docs_image,
            docs_port: self.docs_port,
            migration_image: self.migration_image,
            migration_ttl_seconds: self.migration_ttl_seconds,
            tls_secret_name: self.tls_secret_name,
            http_entry_points: self.http_entry_points,
            tcp_entry_points: self.tcp_entry_points,
            strip_prefix_middleware: self.strip_prefix_middleware,
        }
    }
}

/// Specifies whether Kubernetes should pull Docker images when creating pods.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubernetesImagePullPolicy {
    /// Always pull the Docker image from the registry.
    Always,
    /// Pull the Docker image only if the image is not present.
    IfNotPresent,
    /// Never pull the Docker image.
    Never,
}

impl fmt::Display for KubernetesImagePullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KubernetesImagePullPolicy::Always => f.write_str("Always"),
            KubernetesImagePullPolicy::IfNotPresent => f.write_str("IfNotPresent"),
            KubernetesImagePullPolicy::Never => f.write_str("Never"),
        }
    }
}

/// The namespace-bound API handles used by the orchestrator and its reader.
#[derive(Clone)]
struct Apis {
    cluster: Api<Cluster>,
    database: Api<Database>,
    secret: Api<Secret>,
    config_map: Api<ConfigMap>,
    deployment: Api<Deployment>,
    service: Api<Service>,
    job: Api<Job>,
    ingress_route: Api<IngressRoute>,
    ingress_route_tcp: Api<IngressRouteTcp>,
}

impl Apis {
    fn new(client: Client, namespace: &str) -> Apis {
        Apis {
            cluster: Api::namespaced(client.clone(), namespace),
            database: Api::namespaced(client.clone(), namespace),
            secret: Api::namespaced(client.clone(), namespace),
            config_map: Api::namespaced(client.clone(), namespace),
            deployment: Api::namespaced(client.clone(), namespace),
            service: Api::namespaced(client.clone(), namespace),
            job: Api::namespaced(client.clone(), namespace),
            ingress_route: Api::namespaced(client.clone(), namespace),
            ingress_route_tcp: Api::namespaced(client, namespace),
        }
    }
}

/// Manages tenant resources in a Kubernetes namespace.
pub struct KubernetesTenantOrchestrator {
    kubernetes_namespace: String,
    config: KubernetesTenantOrchestratorConfig,
    apis: Apis,
    reader: Arc<KubernetesResourceReader>,
}

impl fmt::Debug for KubernetesTenantOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KubernetesTenantOrchestrator")
            .field("kubernetes_namespace", &self.kubernetes_namespace)
            .finish()
    }
}

impl KubernetesTenantOrchestrator {
    /// Creates a new Kubernetes orchestrator from the provided configuration.
    pub async fn new(
        config: KubernetesTenantOrchestratorConfig,
    ) -> Result<KubernetesTenantOrchestrator, anyhow::Error> {
        let (client, default_namespace) = util::create_client(config.context.clone()).await?;
        let namespace = config.namespace.clone().unwrap_or(default_namespace);
        Ok(KubernetesTenantOrchestrator::with_client(client, namespace, config))
    }

    /// Creates a new Kubernetes orchestrator that uses an existing client.
    pub fn with_client(
        client: Client,
        kubernetes_namespace: String,
        config: KubernetesTenantOrchestratorConfig,
    ) -> KubernetesTenantOrchestrator {
        let apis = Apis::new(client, &kubernetes_namespace);
        let reader = Arc::new(KubernetesResourceReader { apis: apis.clone() });
        KubernetesTenantOrchestrator {
            kubernetes_namespace,
            config,
            apis,
            reader,
        }
    }

    /// The namespace in which tenant objects live.
    pub fn namespace(&self) -> &str {
        &self.kubernetes_namespace
    }
}

#[async_trait]
impl TenantResourceReader for KubernetesTenantOrchestrator {
    async fn cluster_phase(&self, tenant: &TenantRef) -> Result<Option<String>, ResourceError> {
        self.reader.cluster_phase(tenant).await
    }

    async fn read_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
    ) -> Result<RoleCredentials, ResourceError> {
        self.reader.read_role_secret(tenant, role).await
    }
}

#[async_trait]
impl TenantResourceController for KubernetesTenantOrchestrator {
    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn create_cluster(
        &self,
        tenant: &TenantRef,
        storage_size: &StorageSize,
    ) -> Result<(), ResourceError> {
        let cluster = cluster::create_cluster_object(
            &self.config,
            &self.kubernetes_namespace,
            tenant,
            storage_size,
        );
        create_resource(&self.apis.cluster, &cluster).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn delete_cluster(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        delete_resource(&self.apis.cluster, &naming::cluster_name(tenant)).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn create_database(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        let database =
            cluster::create_database_object(&self.config, &self.kubernetes_namespace, tenant);
        create_resource(&self.apis.database, &database).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn delete_database(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        delete_resource(&self.apis.database, &naming::database_name(tenant)).await
    }

    #[instrument(skip(self, credentials), fields(tenant = %tenant))]
    async fn create_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
        credentials: &RoleCredentials,
    ) -> Result<(), ResourceError> {
        let secret = secrets::create_role_secret_object(
            &self.config,
            &self.kubernetes_namespace,
            tenant,
            role,
            credentials,
        );
        create_resource(&self.apis.secret, &secret).await
    }

    #[instrument(skip(self, credentials), fields(tenant = %tenant))]
    async fn update_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
        credentials: &RoleCredentials,
    ) -> Result<(), ResourceError> {
        let secret = secrets::create_role_secret_object(
            &self.config,
            &self.kubernetes_namespace,
            tenant,
            role,
            credentials,
        );
        replace_resource(&self.apis.secret, &secret).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn delete_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
    ) -> Result<(), ResourceError> {
        delete_resource(&self.apis.secret, &naming::role_secret_name(tenant, role)).await
    }

    #[instrument(skip(self, config), fields(tenant = %tenant))]
    async fn create_auth_deployment(
        &self,
        tenant: &TenantRef,
        config: &AuthApiConfig,
    ) -> Result<(), ResourceError> {
        let deployment = auth_api::create_deployment_object(
            &self.config,
            &self.kubernetes_namespace,
            tenant,
            config,
        );
        create_resource(&self.apis.deployment, &deployment).await
    }

    #[instrument(skip(self, patch), fields(tenant = %tenant))]
    async fn patch_auth_deployment(
        &self,
        tenant: &TenantRef,
        patch: &AuthApiPatch,
    ) -> Result<(), ResourceError> {
        let patch = auth_api::create_env_patch(patch);
        patch_resource(&self.apis.deployment, &naming::auth_api_name(tenant), &patch).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn delete_auth_deployment(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        delete_resource(&self.apis.deployment, &naming::auth_api_name(tenant)).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn create_auth_service(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        let service =
            auth_api::create_service_object(&self.config, &self.kubernetes_namespace, tenant);
        create_resource(&self.apis.service, &service).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn delete_auth_service(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        delete_resource(&self.apis.service, &naming::auth_api_name(tenant)).await
    }

    #[instrument(skip(self, jwt_secret), fields(tenant = %tenant))]
    async fn create_rest_deployment(
        &self,
        tenant: &TenantRef,
        jwt_secret: &str,
    ) -> Result<(), ResourceError> {
        let deployment = rest_api::create_deployment_object(
            &self.config,
            &self.kubernetes_namespace,
            tenant,
            jwt_secret,
        );
        create_resource(&self.apis.deployment, &deployment).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn delete_rest_deployment(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        delete_resource(&self.apis.deployment, &naming::rest_api_name(tenant)).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn create_rest_service(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        let service =
            rest_api::create_service_object(&self.config, &self.kubernetes_namespace, tenant);
        create_resource(&self.apis.service, &service).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn delete_rest_service(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        delete_resource(&self.apis.service, &naming::rest_api_name(tenant)).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn create_http_ingress_route(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        let route =
            ingress::create_http_route_object(&self.config, &self.kubernetes_namespace, tenant);
        create_resource(&self.apis.ingress_route, &route).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn delete_http_ingress_route(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        delete_resource(
            &self.apis.ingress_route,
            &naming::http_ingress_route_name(tenant),
        )
        .await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn create_tcp_ingress_route(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        let route =
            ingress::create_tcp_route_object(&self.config, &self.kubernetes_namespace, tenant);
        create_resource(&self.apis.ingress_route_tcp, &route).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn delete_tcp_ingress_route(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        delete_resource(
            &self.apis.ingress_route_tcp,
            &naming::tcp_ingress_route_name(tenant),
        )
        .await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn create_migration_job(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        let job = migration::create_job_object(&self.config, &self.kubernetes_namespace, tenant);
        create_resource(&self.apis.job, &job).await
    }

    #[instrument(skip(self, seed_sql), fields(tenant = %tenant))]
    async fn create_jwks_config_map(
        &self,
        tenant: &TenantRef,
        seed_sql: &str,
    ) -> Result<(), ResourceError> {
        let config_map = secrets::create_jwks_config_map_object(
            &self.config,
            &self.kubernetes_namespace,
            tenant,
            seed_sql,
        );
        create_resource(&self.apis.config_map, &config_map).await
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn delete_jwks_config_map(&self, tenant: &TenantRef) -> Result<(), ResourceError> {
        delete_resource(&self.apis.config_map, &naming::jwks_config_map_name(tenant)).await
    }

    fn reader(&self) -> Arc<dyn TenantResourceReader> {
        let reader = Arc::clone(&self.reader);
        reader
    }
}

/// Reads tenant resources managed by a [`KubernetesTenantOrchestrator`].
#[derive(Clone)]
pub struct KubernetesResourceReader {
    apis: Apis,
}

impl fmt::Debug for KubernetesResourceReader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KubernetesResourceReader").finish()
    }
}

#[async_trait]
impl TenantResourceReader for KubernetesResourceReader {
    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn cluster_phase(&self, tenant: &TenantRef) -> Result<Option<String>, ResourceError> {
        let cluster = get_resource(&self.apis.cluster, &naming::cluster_name(tenant)).await?;
        Ok(cluster.status.and_then(|status| status.phase))
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn read_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
    ) -> Result<RoleCredentials, ResourceError> {
        let name = naming::role_secret_name(tenant, role);
        let secret = get_resource(&self.apis.secret, &name).await?;
        secrets::role_credentials_from_secret(&name, secret)
    }
}
