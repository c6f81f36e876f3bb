// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! In-memory fakes of every collaborator of the provisioner.
//!
//! Every fake records its calls in a shared [`Journal`], which can also be
//! told to fail any call by name.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_cloud_resources::{
    AuthApiConfig, AuthApiPatch, AuthProviderSetting, DatabaseRole, ResourceError,
    RoleCredentials, StorageSize, TenantRef, TenantResourceController, TenantResourceReader,
};
use hearth_ore::metrics::MetricsRegistry;
use hearth_provisioner::cache::{
    CallerIdentity, ConnectionCache, InvalidateConnections, PermissionChecker, PoolFactory,
};
use hearth_provisioner::metrics::Metrics;
use hearth_provisioner::project::{CreateProjectInput, ProjectServiceConfig};
use hearth_provisioner::rpc::{
    CreatedProject, DeletedProject, PostgrestError, ProjectSettingsUpdate, RpcError, SqlRpc,
};
use hearth_provisioner::storage::{ObjectStorage, StorageError};
use hearth_provisioner::store::{Project, ProjectId, ProjectStore, ProjectUpdate, StoreError};
use hearth_provisioner::{Error, HealthMonitor, ProjectService};
use uuid::Uuid;

pub const TENANT: &str = "hisqrzwgndjcycmkwpnj";
pub const PROJECT_ID: ProjectId = ProjectId(42);

pub fn tenant() -> TenantRef {
    TENANT.parse().unwrap()
}

pub fn owner() -> CallerIdentity {
    CallerIdentity {
        user_id: Uuid::from_u128(1),
        access_token: "owner-token".into(),
    }
}

pub fn member() -> CallerIdentity {
    CallerIdentity {
        user_id: Uuid::from_u128(2),
        access_token: "member-token".into(),
    }
}

pub fn stranger() -> CallerIdentity {
    CallerIdentity {
        user_id: Uuid::from_u128(3),
        access_token: "stranger-token".into(),
    }
}

pub fn create_input() -> CreateProjectInput {
    CreateProjectInput {
        caller: owner(),
        name: "My Project".into(),
        description: None,
        storage_size: "1Gi".parse().unwrap(),
    }
}

/// The steps of a project creation, each with its compensation.
pub const CREATE_STEPS: [(&str, &str); 9] = [
    ("rpc.create_project", "rpc.delete_project"),
    ("storage.create_bucket", "storage.delete_bucket"),
    ("storage.create_user", "storage.delete_user"),
    ("storage.attach_bucket_policy", "storage.delete_bucket_policy"),
    ("k8s.create_jwks_config_map", "k8s.delete_jwks_config_map"),
    (
        "k8s.create_role_secret:authenticator",
        "k8s.delete_role_secret:authenticator",
    ),
    (
        "k8s.create_role_secret:app-admin",
        "k8s.delete_role_secret:app-admin",
    ),
    ("k8s.create_cluster", "k8s.delete_cluster"),
    ("k8s.create_database", "k8s.delete_database"),
];

pub const POST_INSTALL_STEPS: [&str; 7] = [
    "k8s.create_migration_job",
    "k8s.create_auth_deployment",
    "k8s.create_auth_service",
    "k8s.create_rest_deployment",
    "k8s.create_rest_service",
    "k8s.create_http_ingress_route",
    "k8s.create_tcp_ingress_route",
];

pub const TEARDOWN_STEPS: [&str; 14] = [
    "k8s.delete_http_ingress_route",
    "k8s.delete_tcp_ingress_route",
    "k8s.delete_auth_deployment",
    "k8s.delete_rest_deployment",
    "k8s.delete_auth_service",
    "k8s.delete_rest_service",
    "k8s.delete_role_secret:authenticator",
    "k8s.delete_role_secret:app-admin",
    "k8s.delete_jwks_config_map",
    "k8s.delete_database",
    "k8s.delete_cluster",
    "storage.delete_bucket_policy",
    "storage.delete_user",
    "storage.delete_bucket",
];

pub const HEALTHY_PHASES: [Option<&str>; 4] = [
    None,
    Some("Setting up primary"),
    Some("Waiting for the instances to become active"),
    Some("Cluster in healthy state"),
];

#[derive(Debug, Default)]
struct JournalState {
    entries: Vec<String>,
    failing: BTreeSet<String>,
}

/// The ordered record of calls made to the fakes.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    state: Arc<Mutex<JournalState>>,
}

impl Journal {
    /// Makes every future call named `op` fail.
    pub fn fail(&self, op: &str) {
        self.state.lock().unwrap().failing.insert(op.to_owned());
    }

    pub fn is_failing(&self, op: &str) -> bool {
        self.state.lock().unwrap().failing.contains(op)
    }

    /// Records a call to `op` and reports whether it should fail.
    pub fn call(&self, op: String) -> bool {
        let mut state = self.state.lock().unwrap();
        let fail = state.failing.contains(&op);
        state.entries.push(op);
        fail
    }

    pub fn entries(&self) -> Vec<String> {
        self.state.lock().unwrap().entries.clone()
    }

    pub fn contains(&self, op: &str) -> bool {
        self.state.lock().unwrap().entries.iter().any(|e| e == op)
    }

    pub fn count(&self, op: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| *e == op)
            .count()
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().entries.clear();
    }

    /// Waits until `op` has been called, advancing time in steps.
    pub async fn wait_for(&self, op: &str) {
        for _ in 0..1000 {
            if self.contains(op) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("{op} was never called; journal: {:?}", self.entries());
    }
}

fn rpc_failure(op: &str) -> RpcError {
    RpcError::Internal {
        status: 500,
        error: PostgrestError {
            code: "XX000".into(),
            message: format!("injected failure of {op}"),
            details: None,
            hint: None,
        },
    }
}

#[derive(Debug)]
pub struct FakeRpc {
    journal: Journal,
    pub owner: Uuid,
    pub members: Vec<Uuid>,
    pub permission_checks: AtomicUsize,
}

impl FakeRpc {
    fn call(&self, op: &str) -> Result<(), RpcError> {
        let op = format!("rpc.{op}");
        if self.journal.call(op.clone()) {
            Err(rpc_failure(&op))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SqlRpc for FakeRpc {
    async fn create_project(
        &self,
        _caller: &CallerIdentity,
        _name: &str,
        _description: Option<&str>,
    ) -> Result<CreatedProject, RpcError> {
        self.call("create_project")?;
        Ok(CreatedProject {
            id: PROJECT_ID,
            tenant_ref: tenant(),
            auth_secret: "auth-secret".into(),
        })
    }

    async fn delete_project(
        &self,
        _caller: &CallerIdentity,
        id: ProjectId,
    ) -> Result<DeletedProject, RpcError> {
        self.call("delete_project")?;
        Ok(DeletedProject {
            id,
            tenant_ref: tenant(),
        })
    }

    async fn update_project(
        &self,
        _caller: &CallerIdentity,
        _update: &ProjectSettingsUpdate,
    ) -> Result<(), RpcError> {
        self.call("update_project")
    }

    async fn create_or_update_auth_providers(
        &self,
        _caller: &CallerIdentity,
        _id: ProjectId,
        _providers: &[AuthProviderSetting],
    ) -> Result<(), RpcError> {
        self.call("create_or_update_auth_providers")
    }

    async fn check_project_permission(
        &self,
        caller: &CallerIdentity,
        _tenant: &TenantRef,
        require_owner: bool,
    ) -> Result<bool, RpcError> {
        self.permission_checks.fetch_add(1, Ordering::SeqCst);
        let is_owner = caller.user_id == self.owner;
        let is_member = is_owner || self.members.contains(&caller.user_id);
        Ok(if require_owner { is_owner } else { is_member })
    }
}

#[derive(Debug)]
pub struct FakeStorage {
    journal: Journal,
}

impl FakeStorage {
    fn call(&self, op: &'static str) -> Result<(), StorageError> {
        if self.journal.call(format!("storage.{op}")) {
            Err(StorageError::Api {
                operation: op,
                code: "InjectedFailure".into(),
                message: format!("injected failure of {op}"),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn create_bucket(&self, _bucket: &str) -> Result<(), StorageError> {
        self.call("create_bucket")
    }

    async fn delete_bucket(&self, _bucket: &str) -> Result<(), StorageError> {
        self.call("delete_bucket")
    }

    async fn create_user(&self, _user: &str) -> Result<(), StorageError> {
        self.call("create_user")
    }

    async fn delete_user(&self, _user: &str) -> Result<(), StorageError> {
        self.call("delete_user")
    }

    async fn attach_bucket_policy(
        &self,
        _policy: &str,
        _user: &str,
        _bucket: &str,
    ) -> Result<(), StorageError> {
        self.call("attach_bucket_policy")
    }

    async fn delete_bucket_policy(&self, _policy: &str, _user: &str) -> Result<(), StorageError> {
        self.call("delete_bucket_policy")
    }
}

#[derive(Debug, Default)]
struct ResourcesState {
    phases: Mutex<VecDeque<Option<String>>>,
    secrets: Mutex<BTreeMap<(TenantRef, DatabaseRole), RoleCredentials>>,
    secret_reads: AtomicUsize,
    auth_patches: Mutex<Vec<AuthApiPatch>>,
}

/// A fake tenant resource controller. Clones share their state.
#[derive(Debug, Clone, Default)]
pub struct FakeResources {
    journal: Journal,
    state: Arc<ResourcesState>,
}

impl FakeResources {
    /// Queues the phases reported by successive polls. The last one is
    /// repeated once the queue runs dry.
    pub fn set_phases(&self, phases: &[Option<&str>]) {
        *self.state.phases.lock().unwrap() = phases.iter().map(|p| p.map(String::from)).collect();
    }

    pub fn put_secret(&self, tenant: &TenantRef, role: DatabaseRole, password: &str) {
        let credentials = RoleCredentials::new(role, password.into(), "db.internal");
        self.state
            .secrets
            .lock()
            .unwrap()
            .insert((tenant.clone(), role), credentials);
    }

    pub fn secret(&self, tenant: &TenantRef, role: DatabaseRole) -> Option<RoleCredentials> {
        self.state
            .secrets
            .lock()
            .unwrap()
            .get(&(tenant.clone(), role))
            .cloned()
    }

    pub fn secret_reads(&self) -> usize {
        self.state.secret_reads.load(Ordering::SeqCst)
    }

    pub fn auth_patches(&self) -> Vec<AuthApiPatch> {
        self.state.auth_patches.lock().unwrap().clone()
    }

    fn call(&self, op: &str) -> Result<(), ResourceError> {
        if self.journal.call(format!("k8s.{op}")) {
            Err(ResourceError::Api {
                kind: "Fake",
                name: TENANT.into(),
                code: 500,
                message: format!("injected failure of {op}"),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TenantResourceReader for FakeResources {
    async fn cluster_phase(&self, tenant: &TenantRef) -> Result<Option<String>, ResourceError> {
        if self.journal.is_failing("k8s.cluster_phase") {
            return Err(ResourceError::NotFound {
                kind: "Cluster",
                name: format!("{tenant}-cluster"),
            });
        }
        let mut phases = self.state.phases.lock().unwrap();
        if phases.len() > 1 {
            Ok(phases.pop_front().flatten())
        } else {
            Ok(phases.front().cloned().flatten())
        }
    }

    async fn read_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
    ) -> Result<RoleCredentials, ResourceError> {
        self.state.secret_reads.fetch_add(1, Ordering::SeqCst);
        self.secret(tenant, role).ok_or_else(|| ResourceError::NotFound {
            kind: "Secret",
            name: format!("{tenant}-cluster-{role}"),
        })
    }
}

#[async_trait]
impl TenantResourceController for FakeResources {
    async fn create_cluster(
        &self,
        _tenant: &TenantRef,
        _storage_size: &StorageSize,
    ) -> Result<(), ResourceError> {
        self.call("create_cluster")
    }

    async fn delete_cluster(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("delete_cluster")
    }

    async fn create_database(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("create_database")
    }

    async fn delete_database(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("delete_database")
    }

    async fn create_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
        credentials: &RoleCredentials,
    ) -> Result<(), ResourceError> {
        self.call(&format!("create_role_secret:{role}"))?;
        self.state
            .secrets
            .lock()
            .unwrap()
            .insert((tenant.clone(), role), credentials.clone());
        Ok(())
    }

    async fn update_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
        credentials: &RoleCredentials,
    ) -> Result<(), ResourceError> {
        self.call(&format!("update_role_secret:{role}"))?;
        self.state
            .secrets
            .lock()
            .unwrap()
            .insert((tenant.clone(), role), credentials.clone());
        Ok(())
    }

    async fn delete_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
    ) -> Result<(), ResourceError> {
        self.call(&format!("delete_role_secret:{role}"))?;
        self.state
            .secrets
            .lock()
            .unwrap()
            .remove(&(tenant.clone(), role));
        Ok(())
    }

    async fn create_auth_deployment(
        &self,
        _tenant: &TenantRef,
        _config: &AuthApiConfig,
    ) -> Result<(), ResourceError> {
        self.call("create_auth_deployment")
    }

    async fn patch_auth_deployment(
        &self,
        _tenant: &TenantRef,
        patch: &AuthApiPatch,
    ) -> Result<(), ResourceError> {
        self.call("patch_auth_deployment")?;
        self.state.auth_patches.lock().unwrap().push(patch.clone());
        Ok(())
    }

    async fn delete_auth_deployment(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("delete_auth_deployment")
    }

    async fn create_auth_service(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("create_auth_service")
    }

    async fn delete_auth_service(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("delete_auth_service")
    }

    async fn create_rest_deployment(
        &self,
        _tenant: &TenantRef,
        _jwt_secret: &str,
    ) -> Result<(), ResourceError> {
        self.call("create_rest_deployment")
    }

    async fn delete_rest_deployment(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("delete_rest_deployment")
    }

    async fn create_rest_service(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("create_rest_service")
    }

    async fn delete_rest_service(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("delete_rest_service")
    }

    async fn create_http_ingress_route(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("create_http_ingress_route")
    }

    async fn delete_http_ingress_route(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("delete_http_ingress_route")
    }

    async fn create_tcp_ingress_route(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("create_tcp_ingress_route")
    }

    async fn delete_tcp_ingress_route(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("delete_tcp_ingress_route")
    }

    async fn create_migration_job(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("create_migration_job")
    }

    async fn create_jwks_config_map(
        &self,
        _tenant: &TenantRef,
        _seed_sql: &str,
    ) -> Result<(), ResourceError> {
        self.call("create_jwks_config_map")
    }

    async fn delete_jwks_config_map(&self, _tenant: &TenantRef) -> Result<(), ResourceError> {
        self.call("delete_jwks_config_map")
    }

    fn reader(&self) -> Arc<dyn TenantResourceReader> {
        Arc::new(self.clone())
    }
}

/// A project store holding projects in memory, with the same
/// set-once semantics for `initialized_at` as the Postgres store.
#[derive(Debug, Default)]
pub struct FakeStore {
    projects: Mutex<BTreeMap<TenantRef, Project>>,
    pub updates: AtomicUsize,
    /// Every initialization time written, in arrival order.
    pub initializations: Mutex<Vec<DateTime<Utc>>>,
}

impl FakeStore {
    pub fn insert(&self, project: Project) {
        self.projects
            .lock()
            .unwrap()
            .insert(project.tenant_ref.clone(), project);
    }

    pub fn get(&self, tenant: &TenantRef) -> Option<Project> {
        self.projects.lock().unwrap().get(tenant).cloned()
    }
}

#[async_trait]
impl ProjectStore for FakeStore {
    async fn find_by_ref(&self, tenant: &TenantRef) -> Result<Option<Project>, StoreError> {
        let project = self.get(tenant);
        // Lets concurrent readers observe the same snapshot.
        tokio::task::yield_now().await;
        Ok(project)
    }

    async fn update_by_ref(
        &self,
        tenant: &TenantRef,
        update: &ProjectUpdate,
    ) -> Result<bool, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if let Some(at) = update.initialized_at {
            self.initializations.lock().unwrap().push(at);
        }
        let mut projects = self.projects.lock().unwrap();
        let Some(project) = projects.get_mut(tenant) else {
            return Ok(false);
        };
        if project.initialized_at.is_none() {
            project.initialized_at = update.initialized_at;
        }
        if update.password_expired_at.is_some() {
            project.password_expired_at = update.password_expired_at;
        }
        Ok(true)
    }
}

/// A fake pool: the order in which it was created and the URI it connects
/// to.
#[derive(Debug, PartialEq, Eq)]
pub struct FakePool {
    pub serial: u64,
    pub uri: String,
}

#[derive(Debug, Clone, Default)]
pub struct CountingPools {
    created: Arc<AtomicU64>,
}

impl CountingPools {
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolFactory for CountingPools {
    type Pool = FakePool;

    async fn create_pool(&self, credentials: &RoleCredentials) -> Result<FakePool, Error> {
        let serial = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(FakePool {
            serial,
            uri: credentials.uri.clone(),
        })
    }
}

/// A provisioner wired to fakes.
pub struct Harness {
    pub journal: Journal,
    pub rpc: Arc<FakeRpc>,
    pub resources: FakeResources,
    pub store: Arc<FakeStore>,
    pub registry: MetricsRegistry,
    pub metrics: Metrics,
    pub health: Arc<HealthMonitor>,
    pub pools: CountingPools,
    pub connections: Arc<ConnectionCache<CountingPools>>,
    pub service: ProjectService,
}

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const CONNECTION_TTL: Duration = Duration::from_secs(60 * 60);

impl Harness {
    pub fn new() -> Harness {
        let journal = Journal::default();
        let registry = MetricsRegistry::new();
        let metrics = Metrics::register_into(&registry);
        let rpc = Arc::new(FakeRpc {
            journal: journal.clone(),
            owner: owner().user_id,
            members: vec![member().user_id],
            permission_checks: AtomicUsize::new(0),
        });
        let storage = Arc::new(FakeStorage {
            journal: journal.clone(),
        });
        let resources = FakeResources {
            journal: journal.clone(),
            state: Arc::default(),
        };
        let store = Arc::new(FakeStore::default());
        store.insert(Project {
            id: PROJECT_ID,
            tenant_ref: tenant(),
            owner_id: owner().user_id,
            initialized_at: None,
            password_expired_at: None,
        });

        let health = Arc::new(HealthMonitor::new(
            resources.reader(),
            Arc::clone(&store) as Arc<dyn ProjectStore>,
            POLL_INTERVAL,
            metrics.clone(),
        ));
        let pools = CountingPools::default();
        let connections = Arc::new(ConnectionCache::new(
            Arc::clone(&rpc) as Arc<dyn PermissionChecker>,
            resources.reader(),
            pools.clone(),
            CONNECTION_TTL,
            metrics.clone(),
        ));
        let service = ProjectService::new(
            ProjectServiceConfig {
                external_domain: "hearth.test".into(),
                namespace: "tenants".into(),
                post_install_timeout: Duration::from_secs(15 * 60),
            },
            Arc::clone(&rpc) as Arc<dyn SqlRpc>,
            storage,
            Arc::new(resources.clone()),
            Arc::clone(&health),
            Arc::clone(&connections) as Arc<dyn InvalidateConnections>,
            metrics.clone(),
        );
        Harness {
            journal,
            rpc,
            resources,
            store,
            registry,
            metrics,
            health,
            pools,
            connections,
            service,
        }
    }
}
