// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Tenant resource definitions and the interfaces for managing them.
//!
//! Every tenant of the platform owns a set of infrastructure objects: a
//! database cluster, a database, role credential secrets, two API
//! deployments with their services, two ingress routes, a migration job and
//! a JWKS seed config map. None of these objects are persisted by the
//! control plane; they are all derived from the tenant's [`TenantRef`] via
//! the functions in [`naming`].
//!
//! This crate defines *what* those objects are. The
//! [`TenantResourceController`] trait is implemented by backends that know
//! *how* to manage them, like the Kubernetes orchestrator.

use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::{Alphanumeric, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub mod auth;
pub mod crd;
pub mod naming;

pub use crate::auth::{AuthApiConfig, AuthApiPatch, AuthProvider, AuthProviderSetting};

/// The number of characters in a [`TenantRef`].
pub const TENANT_REF_LEN: usize = 20;

/// The globally unique, immutable reference of a tenant.
///
/// A tenant reference is exactly twenty lowercase ASCII letters. It is minted
/// once when a project is created and is never reused, which is what makes
/// every name derived from it collision free.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantRef(String);

impl TenantRef {
    /// Mints a new random tenant reference.
    pub fn new_random() -> TenantRef {
        let letters = Uniform::new_inclusive(b'a', b'z');
        let s = rand::thread_rng()
            .sample_iter(letters)
            .take(TENANT_REF_LEN)
            .map(char::from)
            .collect();
        TenantRef(s)
    }

    /// Returns the reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An error returned when parsing a malformed [`TenantRef`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tenant reference {0:?}: expected {TENANT_REF_LEN} lowercase letters")]
pub struct InvalidTenantRef(pub String);

impl FromStr for TenantRef {
    type Err = InvalidTenantRef;

    fn from_str(s: &str) -> Result<TenantRef, InvalidTenantRef> {
        if s.len() == TENANT_REF_LEN && s.bytes().all(|b| b.is_ascii_lowercase()) {
            Ok(TenantRef(s.to_owned()))
        } else {
            Err(InvalidTenantRef(s.to_owned()))
        }
    }
}

impl TryFrom<String> for TenantRef {
    type Error = InvalidTenantRef;

    fn try_from(s: String) -> Result<TenantRef, InvalidTenantRef> {
        s.parse()
    }
}

impl From<TenantRef> for String {
    fn from(tenant: TenantRef) -> String {
        tenant.0
    }
}

/// The database roles provisioned for every tenant.
///
/// The set is closed: every role has a credential secret whose name is
/// derived by [`naming::role_secret_name`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatabaseRole {
    /// The role owning the tenant's application database.
    App,
    /// The role the REST API logs in as before switching to the requesting
    /// user's role.
    Authenticator,
    /// The privileged role reserved for project owners.
    AppAdmin,
}

impl DatabaseRole {
    /// All database roles.
    pub const ALL: [DatabaseRole; 3] = [
        DatabaseRole::App,
        DatabaseRole::Authenticator,
        DatabaseRole::AppAdmin,
    ];

    /// Returns the name of the role as it exists in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseRole::App => "app",
            DatabaseRole::Authenticator => "authenticator",
            DatabaseRole::AppAdmin => "app-admin",
        }
    }

    /// Reports whether the role is reserved for the owner of a project.
    pub fn is_privileged(&self) -> bool {
        matches!(self, DatabaseRole::AppAdmin)
    }
}

impl fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseRole {
    type Err = String;

    fn from_str(s: &str) -> Result<DatabaseRole, String> {
        match s {
            "app" => Ok(DatabaseRole::App),
            "authenticator" => Ok(DatabaseRole::Authenticator),
            "app-admin" | "owner" => Ok(DatabaseRole::AppAdmin),
            _ => Err(format!("unknown database role {s:?}")),
        }
    }
}

/// The size of the persistent volume backing a tenant's database cluster,
/// in Kubernetes quantity notation (for example `1Gi`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageSize(String);

impl StorageSize {
    /// Returns the size as a Kubernetes quantity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StorageSize {
    fn default() -> StorageSize {
        StorageSize("1Gi".into())
    }
}

impl fmt::Display for StorageSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StorageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<StorageSize, String> {
        const SUFFIXES: &[&str] = &["Mi", "Gi", "Ti"];
        let Some(digits) = SUFFIXES.iter().find_map(|suffix| s.strip_suffix(suffix)) else {
            return Err(format!(
                "invalid storage size {s:?}: expected a number followed by one of {}",
                SUFFIXES.join(", ")
            ));
        };
        match digits.parse::<u32>() {
            Ok(n) if n > 0 && !digits.starts_with('0') => Ok(StorageSize(s.to_owned())),
            _ => Err(format!("invalid storage size {s:?}: expected a positive integer")),
        }
    }
}

impl TryFrom<String> for StorageSize {
    type Error = String;

    fn try_from(s: String) -> Result<StorageSize, String> {
        s.parse()
    }
}

impl From<StorageSize> for String {
    fn from(size: StorageSize) -> String {
        size.0
    }
}

/// The credentials of one database role of one tenant, as stored in its
/// role credential secret.
#[derive(Clone, PartialEq, Eq)]
pub struct RoleCredentials {
    pub username: String,
    pub password: String,
    /// A `postgresql://` connection URI embedding the username and password.
    pub uri: String,
}

impl RoleCredentials {
    /// The secret key holding the username.
    pub const USERNAME_KEY: &'static str = "username";
    /// The secret key holding the password.
    pub const PASSWORD_KEY: &'static str = "password";
    /// The secret key holding the connection URI.
    pub const URI_KEY: &'static str = "uri";

    /// Builds the credentials for `role` connecting to the tenant's
    /// application database at `host`.
    pub fn new(role: DatabaseRole, password: String, host: &str) -> RoleCredentials {
        let username = role.as_str().to_owned();
        let uri = format!(
            "postgresql://{}:{}@{}:{}/{}",
            username,
            urlencoding::encode(&password),
            host,
            naming::DATABASE_PORT,
            naming::APP_DATABASE,
        );
        RoleCredentials {
            username,
            password,
            uri,
        }
    }
}

impl Debug for RoleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("uri", &"<redacted>")
            .finish()
    }
}

/// Generates a random alphanumeric password of `len` characters.
pub fn generate_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// An error returned by a [`TenantResourceController`] or
/// [`TenantResourceReader`].
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// The resource already exists. Creates are never retried, so callers
    /// that tolerate existing resources must match on this variant.
    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },
    /// The resource does not exist.
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },
    /// The API server rejected the request.
    #[error("{kind} {name:?}: {message} (status {code})")]
    Api {
        kind: &'static str,
        name: String,
        code: u16,
        message: String,
    },
    /// The resource exists but lacks a required field.
    #[error("{kind} {name:?} is missing {field:?}")]
    MissingData {
        kind: &'static str,
        name: String,
        field: &'static str,
    },
    /// The request never produced an API response.
    #[error("request for {kind} {name:?} failed")]
    Transport {
        kind: &'static str,
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ResourceError {
    /// Reports whether the error indicates that the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResourceError::NotFound { .. })
    }

    /// Reports whether the error indicates that the resource already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ResourceError::AlreadyExists { .. })
    }
}

/// Reads tenant resources managed by a [`TenantResourceController`].
///
/// Does not provide access to create, update, or delete the resources.
#[async_trait]
pub trait TenantResourceReader: Debug + Send + Sync {
    /// Returns the phase string reported in the status of the tenant's
    /// database cluster, or `None` if the cluster has not reported one yet.
    async fn cluster_phase(&self, tenant: &TenantRef) -> Result<Option<String>, ResourceError>;

    /// Returns the credentials stored in the tenant's secret for `role`.
    async fn read_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
    ) -> Result<RoleCredentials, ResourceError>;
}

/// Manages the infrastructure objects of every tenant.
///
/// Creates fail with [`ResourceError::AlreadyExists`] when the object is
/// present and deletes fail with [`ResourceError::NotFound`] when it is
/// absent. Neither is retried.
#[async_trait]
pub trait TenantResourceController: TenantResourceReader {
    /// Creates the tenant's database cluster with a volume of `storage_size`.
    async fn create_cluster(
        &self,
        tenant: &TenantRef,
        storage_size: &StorageSize,
    ) -> Result<(), ResourceError>;

    /// Deletes the tenant's database cluster.
    async fn delete_cluster(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Creates the tenant's application database inside its cluster.
    async fn create_database(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Deletes the tenant's application database.
    async fn delete_database(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Creates the credential secret for `role`.
    async fn create_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
        credentials: &RoleCredentials,
    ) -> Result<(), ResourceError>;

    /// Overwrites the credential secret for `role` in full.
    async fn update_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
        credentials: &RoleCredentials,
    ) -> Result<(), ResourceError>;

    /// Deletes the credential secret for `role`.
    async fn delete_role_secret(
        &self,
        tenant: &TenantRef,
        role: DatabaseRole,
    ) -> Result<(), ResourceError>;

    /// Creates the auth API deployment.
    async fn create_auth_deployment(
        &self,
        tenant: &TenantRef,
        config: &AuthApiConfig,
    ) -> Result<(), ResourceError>;

    /// Merges `patch` into the auth API deployment's container environment,
    /// leaving every variable not named by the patch untouched.
    async fn patch_auth_deployment(
        &self,
        tenant: &TenantRef,
        patch: &AuthApiPatch,
    ) -> Result<(), ResourceError>;

    /// Deletes the auth API deployment.
    async fn delete_auth_deployment(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Creates the service in front of the auth API deployment.
    async fn create_auth_service(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Deletes the service in front of the auth API deployment.
    async fn delete_auth_service(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Creates the REST API deployment, which verifies tokens against
    /// `jwt_secret`.
    async fn create_rest_deployment(
        &self,
        tenant: &TenantRef,
        jwt_secret: &str,
    ) -> Result<(), ResourceError>;

    /// Deletes the REST API deployment.
    async fn delete_rest_deployment(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Creates the service in front of the REST API deployment.
    async fn create_rest_service(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Deletes the service in front of the REST API deployment.
    async fn delete_rest_service(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Creates the HTTP ingress route for the auth and REST APIs.
    async fn create_http_ingress_route(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Deletes the HTTP ingress route.
    async fn delete_http_ingress_route(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Creates the SNI-routed TCP ingress route for Postgres traffic.
    async fn create_tcp_ingress_route(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Deletes the TCP ingress route.
    async fn delete_tcp_ingress_route(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Creates the one-shot schema migration job.
    async fn create_migration_job(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Creates the config map holding the JWKS seed statement.
    async fn create_jwks_config_map(
        &self,
        tenant: &TenantRef,
        seed_sql: &str,
    ) -> Result<(), ResourceError>;

    /// Deletes the JWKS seed config map.
    async fn delete_jwks_config_map(&self, tenant: &TenantRef) -> Result<(), ResourceError>;

    /// Returns a reader for the resources managed by this controller.
    fn reader(&self) -> Arc<dyn TenantResourceReader>;
}
