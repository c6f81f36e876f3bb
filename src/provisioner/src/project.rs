// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The project lifecycle.
//!
//! Creating a project is a saga: each step registers the action that undoes
//! it, and a failing step unwinds everything registered so far before the
//! error is returned. Once every step succeeded, a background task waits for
//! the tenant's database cluster to become healthy and installs the rest of
//! the stack. That phase is not rolled back; its failures are logged and
//! counted.
//!
//! Deleting a project attempts every teardown action, whatever fails along
//! the way, and reports all failures together.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, TryFutureExt};
use hearth_cloud_resources::naming::{self, TenantEndpoints};
use hearth_cloud_resources::{
    generate_password, AuthApiConfig, AuthApiPatch, AuthProvider, AuthProviderSetting,
    DatabaseRole, RoleCredentials, StorageSize, TenantRef, TenantResourceController,
};
use hearth_ore::error::ErrorExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{CallerIdentity, InvalidateConnections};
use crate::error::{AggregateError, Error};
use crate::health::{HealthMonitor, WatchOutcome};
use crate::keys::SigningKeys;
use crate::metrics::Metrics;
use crate::rpc::{ProjectSettingsUpdate, SqlRpc};
use crate::saga::Saga;
use crate::storage::ObjectStorage;
use crate::store::ProjectId;

/// The length of generated database passwords.
pub const PASSWORD_LEN: usize = 32;

/// The longest accepted project name, in characters.
pub const MAX_NAME_LEN: usize = 64;

/// The default bound on a post-install run, including the wait for the
/// cluster to become healthy.
pub const DEFAULT_POST_INSTALL_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// The roles whose credential secrets are created with a project. The `app`
/// secret is generated by the cluster operator.
const PROVISIONED_ROLES: [DatabaseRole; 2] = [DatabaseRole::Authenticator, DatabaseRole::AppAdmin];

#[derive(Debug, Clone)]
pub struct ProjectServiceConfig {
    /// The domain under which tenant hosts are exposed.
    pub external_domain: String,
    /// The namespace tenant databases are reachable in.
    pub namespace: String,
    pub post_install_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CreateProjectInput {
    pub caller: CallerIdentity,
    pub name: String,
    pub description: Option<String>,
    pub storage_size: StorageSize,
}

impl CreateProjectInput {
    fn validate(&self) -> Result<(), Error> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("project name must not be empty".into()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(Error::Validation(format!(
                "project name must be at most {MAX_NAME_LEN} characters"
            )));
        }
        Ok(())
    }
}

/// The identifiers of a newly created project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub id: ProjectId,
    pub tenant_ref: TenantRef,
}

/// A change to a project's settings. Absent fields are left unchanged.
#[derive(Debug, Clone)]
pub struct PatchProjectSettingsInput {
    pub caller: CallerIdentity,
    pub id: ProjectId,
    pub tenant_ref: TenantRef,
    pub name: Option<String>,
    pub description: Option<String>,
    pub trusted_origins: Option<Vec<String>>,
    pub proxy_url: Option<String>,
    pub providers: Vec<AuthProviderSetting>,
}

/// Creates, configures, and deletes projects.
#[derive(Debug, Clone)]
pub struct ProjectService {
    config: ProjectServiceConfig,
    rpc: Arc<dyn SqlRpc>,
    storage: Arc<dyn ObjectStorage>,
    resources: Arc<dyn TenantResourceController>,
    health: Arc<HealthMonitor>,
    connections: Arc<dyn InvalidateConnections>,
    metrics: Metrics,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl ProjectService {
    pub fn new(
        config: ProjectServiceConfig,
        rpc: Arc<dyn SqlRpc>,
        storage: Arc<dyn ObjectStorage>,
        resources: Arc<dyn TenantResourceController>,
        health: Arc<HealthMonitor>,
        connections: Arc<dyn InvalidateConnections>,
        metrics: Metrics,
    ) -> ProjectService {
        ProjectService {
            config,
            rpc,
            storage,
            resources,
            health,
            connections,
            metrics,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates a project and its data plane, then installs the rest of the
    /// tenant's stack in the background.
    ///
    /// If any step fails, the steps that completed are undone, most recent
    /// first, and the step's error is returned.
    #[instrument(skip(self, input), fields(user = %input.caller.user_id))]
    pub async fn create_project(&self, input: CreateProjectInput) -> Result<NewProject, Error> {
        input.validate()?;
        info!(name = %input.name, "creating project");

        let mut saga = Saga::new("create_project");
        match self.provision(&input, &mut saga).await {
            Ok(provisioned) => {
                saga.commit();
                self.metrics
                    .project_create
                    .with_label_values(&["success"])
                    .inc();
                let project = NewProject {
                    id: provisioned.id,
                    tenant_ref: provisioned.tenant_ref.clone(),
                };
                info!(project = %project.id, tenant = %project.tenant_ref, "project created");
                self.spawn_post_install(provisioned);
                Ok(project)
            }
            Err(e) => {
                warn!(
                    steps = saga.len(),
                    "creating project failed, rolling back: {}",
                    e.display_with_causes()
                );
                let rollback = saga.rollback().await;
                for action in rollback.failed {
                    self.metrics
                        .compensation_failures
                        .with_label_values(&[action])
                        .inc();
                }
                self.metrics
                    .project_create
                    .with_label_values(&["failure"])
                    .inc();
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        input: &CreateProjectInput,
        saga: &mut Saga,
    ) -> Result<Provisioned, Error> {
        // Step 1: the project record, which mints the tenant ref.
        let created = self
            .rpc
            .create_project(&input.caller, input.name.trim(), input.description.as_deref())
            .await?;
        let tenant = created.tenant_ref.clone();
        {
            let rpc = Arc::clone(&self.rpc);
            let caller = input.caller.clone();
            let id = created.id;
            saga.push("delete project record", move || async move {
                rpc.delete_project(&caller, id)
                    .await
                    .map(|_| ())
                    .map_err(Error::from)
            });
        }
        debug!(%tenant, project = %created.id, "created project record");

        // Step 2: object storage.
        let bucket = naming::bucket_name(&tenant);
        let user = naming::storage_user_name(&tenant);
        let policy = naming::storage_policy_name(&tenant);
        self.storage.create_bucket(&bucket).await?;
        {
            let storage = Arc::clone(&self.storage);
            let bucket = bucket.clone();
            saga.push("delete bucket", move || async move {
                storage.delete_bucket(&bucket).await.map_err(Error::from)
            });
        }
        self.storage.create_user(&user).await?;
        {
            let storage = Arc::clone(&self.storage);
            let user = user.clone();
            saga.push("delete storage user", move || async move {
                storage.delete_user(&user).await.map_err(Error::from)
            });
        }
        self.storage
            .attach_bucket_policy(&policy, &user, &bucket)
            .await?;
        {
            let storage = Arc::clone(&self.storage);
            saga.push("delete bucket policy", move || async move {
                storage.delete_bucket_policy(&policy, &user).await.map_err(Error::from)
            });
        }
        debug!(%tenant, "created object storage");

        // Step 3: signing keys.
        let keys = SigningKeys::generate().await?;
        self.resources
            .create_jwks_config_map(&tenant, &keys.seed_sql())
            .await?;
        {
            let resources = Arc::clone(&self.resources);
            let tenant = tenant.clone();
            saga.push("delete jwks config map", move || async move {
                resources.delete_jwks_config_map(&tenant).await.map_err(Error::from)
            });
        }
        debug!(%tenant, kid = %keys.kid, "created signing keys");

        // Step 4: role credentials.
        let host = naming::cluster_rw_host(&tenant, &self.config.namespace);
        for role in PROVISIONED_ROLES {
            let credentials = RoleCredentials::new(role, generate_password(PASSWORD_LEN), &host);
            self.resources
                .create_role_secret(&tenant, role, &credentials)
                .await?;
            let resources = Arc::clone(&self.resources);
            let tenant = tenant.clone();
            saga.push(delete_secret_action(role), move || async move {
                resources.delete_role_secret(&tenant, role).await.map_err(Error::from)
            });
        }
        debug!(%tenant, "created role secrets");

        // Step 5: the database cluster.
        self.resources
            .create_cluster(&tenant, &input.storage_size)
            .await?;
        {
            let resources = Arc::clone(&self.resources);
            let tenant = tenant.clone();
            saga.push("delete cluster", move || async move {
                resources.delete_cluster(&tenant).await.map_err(Error::from)
            });
        }
        self.resources.create_database(&tenant).await?;
        {
            let resources = Arc::clone(&self.resources);
            let tenant = tenant.clone();
            saga.push("delete database", move || async move {
                resources.delete_database(&tenant).await.map_err(Error::from)
            });
        }
        debug!(%tenant, storage_size = %input.storage_size, "created database cluster");

        let endpoints = TenantEndpoints::new(&tenant, &self.config.external_domain);
        Ok(Provisioned {
            id: created.id,
            tenant_ref: tenant,
            auth_config: AuthApiConfig {
                auth_secret: created.auth_secret,
                trusted_origins: vec![format!("https://{}", endpoints.host)],
                proxy_url: None,
                providers: vec![AuthProviderSetting {
                    provider: AuthProvider::Email,
                    enabled: true,
                    client_id: None,
                    client_secret: None,
                }],
            },
            jwt_secret: keys.public_jwks_json(),
        })
    }

    fn spawn_post_install(&self, provisioned: Provisioned) {
        let service = self.clone();
        let cancel = self.shutdown.child_token();
        let timeout = self.config.post_install_timeout;
        let name = format!("post-install-{}", provisioned.tenant_ref);
        let task = self.tasks.track_future(async move {
            let tenant = &provisioned.tenant_ref;
            let start = Instant::now();
            let result = tokio::time::timeout(timeout, service.post_install(&provisioned, &cancel))
                .await
                .unwrap_or(Err(Error::Timeout(timeout)));
            let label = match &result {
                Ok(()) => {
                    info!(%tenant, "post-install finished");
                    "success"
                }
                Err(Error::Cancelled) => {
                    info!(%tenant, "post-install cancelled");
                    "cancelled"
                }
                Err(e) => {
                    error!(%tenant, "post-install failed: {}", e.display_with_causes());
                    if matches!(e, Error::Timeout(_)) {
                        "timeout"
                    } else {
                        "failure"
                    }
                }
            };
            service.metrics.post_install.with_label_values(&[label]).inc();
            service
                .metrics
                .post_install_duration_seconds
                .with_label_values(&[label])
                .observe(start.elapsed().as_secs_f64());
        });
        hearth_ore::task::spawn(|| name, task);
    }

    /// Waits for the tenant's cluster to become healthy, then installs the
    /// migration job, the APIs, and the ingress routes, in that order.
    #[instrument(skip_all, fields(tenant = %provisioned.tenant_ref))]
    async fn post_install(
        &self,
        provisioned: &Provisioned,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let tenant = &provisioned.tenant_ref;
        match self.health.watch(tenant, None, cancel).await? {
            WatchOutcome::Healthy => {}
            WatchOutcome::Cancelled => return Err(Error::Cancelled),
        }

        self.resources.create_migration_job(tenant).await?;
        debug!("created migration job");
        self.resources
            .create_auth_deployment(tenant, &provisioned.auth_config)
            .await?;
        self.resources.create_auth_service(tenant).await?;
        debug!("created auth api");
        self.resources
            .create_rest_deployment(tenant, &provisioned.jwt_secret)
            .await?;
        self.resources.create_rest_service(tenant).await?;
        debug!("created rest api");
        self.resources.create_http_ingress_route(tenant).await?;
        self.resources.create_tcp_ingress_route(tenant).await?;
        debug!("created ingress routes");
        Ok(())
    }

    /// Deletes the project record and then every resource of its tenant.
    ///
    /// Every teardown action is attempted exactly once. The call fails iff
    /// any of them failed, with an [`AggregateError`] holding each failure.
    #[instrument(skip(self, caller), fields(user = %caller.user_id))]
    pub async fn delete_project_by_id(
        &self,
        caller: &CallerIdentity,
        id: ProjectId,
    ) -> Result<TenantRef, Error> {
        let deleted = self.rpc.delete_project(caller, id).await?;
        let tenant = deleted.tenant_ref;
        info!(%tenant, "deleting project");
        self.connections.invalidate(&tenant);
        self.teardown(&tenant).await?;
        info!(%tenant, "project deleted");
        Ok(tenant)
    }

    async fn teardown(&self, tenant: &TenantRef) -> Result<(), AggregateError> {
        let r = &self.resources;
        let s = &self.storage;
        let bucket = naming::bucket_name(tenant);
        let user = naming::storage_user_name(tenant);
        let policy = naming::storage_policy_name(tenant);

        // Each action starts only when awaited below.
        let actions: Vec<(&'static str, BoxFuture<'_, Result<(), Error>>)> = vec![
            (
                "delete http ingress route",
                r.delete_http_ingress_route(tenant).err_into::<Error>().boxed(),
            ),
            (
                "delete tcp ingress route",
                r.delete_tcp_ingress_route(tenant).err_into::<Error>().boxed(),
            ),
            (
                "delete auth deployment",
                r.delete_auth_deployment(tenant).err_into::<Error>().boxed(),
            ),
            (
                "delete rest deployment",
                r.delete_rest_deployment(tenant).err_into::<Error>().boxed(),
            ),
            (
                "delete auth service",
                r.delete_auth_service(tenant).err_into::<Error>().boxed(),
            ),
            (
                "delete rest service",
                r.delete_rest_service(tenant).err_into::<Error>().boxed(),
            ),
            (
                delete_secret_action(DatabaseRole::Authenticator),
                r.delete_role_secret(tenant, DatabaseRole::Authenticator)
                    .err_into::<Error>()
                    .boxed(),
            ),
            (
                delete_secret_action(DatabaseRole::AppAdmin),
                r.delete_role_secret(tenant, DatabaseRole::AppAdmin)
                    .err_into::<Error>()
                    .boxed(),
            ),
            (
                "delete jwks config map",
                r.delete_jwks_config_map(tenant).err_into::<Error>().boxed(),
            ),
            (
                "delete database",
                r.delete_database(tenant).err_into::<Error>().boxed(),
            ),
            (
                "delete cluster",
                r.delete_cluster(tenant).err_into::<Error>().boxed(),
            ),
            (
                "delete bucket policy",
                s.delete_bucket_policy(&policy, &user).err_into::<Error>().boxed(),
            ),
            (
                "delete storage user",
                s.delete_user(&user).err_into::<Error>().boxed(),
            ),
            (
                "delete bucket",
                s.delete_bucket(&bucket).err_into::<Error>().boxed(),
            ),
        ];

        let mut errors = AggregateError::default();
        for (action, fut) in actions {
            match fut.await {
                Ok(()) => debug!(%tenant, action, "teardown action succeeded"),
                Err(e) => {
                    if e.is_absent_resource() {
                        info!(%tenant, action, "teardown target already absent: {e}");
                    } else {
                        warn!(%tenant, action, "teardown action failed: {}", e.display_with_causes());
                    }
                    self.metrics
                        .teardown_failures
                        .with_label_values(&[action])
                        .inc();
                    errors.push(action, e);
                }
            }
        }
        errors.into_result()
    }

    /// Updates a project's settings.
    ///
    /// The auth API deployment is patched first, then the project record and
    /// the auth provider rows are updated. The two are not transactional: if
    /// the record update fails, the deployment keeps the new settings.
    #[instrument(skip(self, input), fields(tenant = %input.tenant_ref, project = %input.id))]
    pub async fn patch_project_settings(
        &self,
        input: PatchProjectSettingsInput,
    ) -> Result<(), Error> {
        for provider in &input.providers {
            provider.validate().map_err(Error::Validation)?;
        }
        if let Some(name) = &input.name {
            if name.trim().is_empty() {
                return Err(Error::Validation("project name must not be empty".into()));
            }
        }

        let patch = AuthApiPatch {
            trusted_origins: input.trusted_origins.clone(),
            proxy_url: input.proxy_url.clone(),
            providers: input.providers.clone(),
        };
        let patched = !patch.is_empty();
        if patched {
            self.resources
                .patch_auth_deployment(&input.tenant_ref, &patch)
                .await?;
            debug!("patched auth deployment");
        }

        let update = ProjectSettingsUpdate {
            p_id: input.id,
            p_name: input.name,
            p_description: input.description,
            p_trusted_origins: input.trusted_origins,
            p_proxy_url: input.proxy_url,
        };
        let recorded = async {
            if !update.is_empty() {
                self.rpc.update_project(&input.caller, &update).await?;
            }
            if !input.providers.is_empty() {
                self.rpc
                    .create_or_update_auth_providers(&input.caller, input.id, &input.providers)
                    .await?;
            }
            Ok::<_, Error>(())
        }
        .await;
        if let Err(e) = &recorded {
            if patched {
                warn!("auth deployment was patched but recording the settings failed: {e}");
            }
        }
        recorded
    }

    /// Replaces the password of `role` and drops the cached connection using
    /// the old one. Only the project's owner may rotate passwords.
    #[instrument(skip(self, caller), fields(tenant = %tenant, user = %caller.user_id))]
    pub async fn rotate_role_password(
        &self,
        caller: &CallerIdentity,
        tenant: &TenantRef,
        role: DatabaseRole,
    ) -> Result<(), Error> {
        if !self.rpc.check_project_permission(caller, tenant, true).await? {
            return Err(Error::Authorization(format!(
                "only the owner of project {tenant} may rotate passwords"
            )));
        }
        let host = naming::cluster_rw_host(tenant, &self.config.namespace);
        let credentials = RoleCredentials::new(role, generate_password(PASSWORD_LEN), &host);
        self.resources
            .update_role_secret(tenant, role, &credentials)
            .await?;
        self.connections.invalidate_role(tenant, role);
        info!("rotated role password");
        Ok(())
    }

    /// Cancels outstanding post-install tasks and waits for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Everything post-install needs from a completed creation.
#[derive(Debug)]
struct Provisioned {
    id: ProjectId,
    tenant_ref: TenantRef,
    auth_config: AuthApiConfig,
    /// The public key set the REST API verifies tokens against.
    jwt_secret: String,
}

fn delete_secret_action(role: DatabaseRole) -> &'static str {
    match role {
        DatabaseRole::App => "delete app secret",
        DatabaseRole::Authenticator => "delete authenticator secret",
        DatabaseRole::AppAdmin => "delete app-admin secret",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str) -> CreateProjectInput {
        CreateProjectInput {
            caller: CallerIdentity {
                user_id: uuid::Uuid::nil(),
                access_token: "token".into(),
            },
            name: name.into(),
            description: None,
            storage_size: StorageSize::default(),
        }
    }

    #[test]
    fn validate_name() {
        assert!(input("My Project").validate().is_ok());
        assert!(matches!(input("  ").validate(), Err(Error::Validation(_))));
        assert!(matches!(
            input(&"x".repeat(MAX_NAME_LEN + 1)).validate(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn secret_actions_are_distinct() {
        let actions: std::collections::BTreeSet<_> =
            DatabaseRole::ALL.into_iter().map(delete_secret_action).collect();
        assert_eq!(actions.len(), DatabaseRole::ALL.len());
    }
}
