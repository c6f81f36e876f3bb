// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Deterministic names for tenant resources.
//!
//! Every name is a pure function of a [`TenantRef`] and a [`Component`].
//! Names for one tenant all start with `{ref}-` and a tenant reference has a
//! fixed length, so names of distinct tenants can never collide. Within one
//! tenant every component has a distinct suffix.
//!
//! This is part of the contract with the cluster operator: the operator
//! names the application role's secret `<cluster>-app`, which is exactly
//! what [`role_secret_name`] returns for [`DatabaseRole::App`].

use crate::{DatabaseRole, TenantRef};

/// The Postgres port exposed by every tenant cluster.
pub const DATABASE_PORT: u16 = 5432;

/// The name of the application database bootstrapped in every cluster.
pub const APP_DATABASE: &str = "app";

/// A component of a tenant's resource set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    Cluster,
    Database,
    RoleSecret(DatabaseRole),
    ClusterReadWriteService,
    AuthApi,
    RestApi,
    HttpIngressRoute,
    TcpIngressRoute,
    MigrationJob,
    JwksConfigMap,
    Bucket,
    StorageUser,
    StoragePolicy,
}

impl Component {
    /// Every component, including one role secret per database role.
    pub fn all() -> Vec<Component> {
        let mut components = vec![
            Component::Cluster,
            Component::Database,
            Component::ClusterReadWriteService,
            Component::AuthApi,
            Component::RestApi,
            Component::HttpIngressRoute,
            Component::TcpIngressRoute,
            Component::MigrationJob,
            Component::JwksConfigMap,
            Component::Bucket,
            Component::StorageUser,
            Component::StoragePolicy,
        ];
        components.extend(DatabaseRole::ALL.map(Component::RoleSecret));
        components
    }

    /// The value of the component label installed on the component's
    /// objects.
    pub fn label(&self) -> &'static str {
        match self {
            Component::Cluster | Component::ClusterReadWriteService => "cluster",
            Component::Database => "database",
            Component::RoleSecret(_) => "role-secret",
            Component::AuthApi => "auth",
            Component::RestApi => "rest",
            Component::HttpIngressRoute | Component::TcpIngressRoute => "ingress",
            Component::MigrationJob => "migrate",
            Component::JwksConfigMap => "jwks",
            Component::Bucket | Component::StorageUser | Component::StoragePolicy => "storage",
        }
    }
}

/// Returns the name of `component` for `tenant`.
pub fn resource_name(tenant: &TenantRef, component: Component) -> String {
    match component {
        Component::Cluster => format!("{tenant}-cluster"),
        Component::Database => format!("{tenant}-database"),
        Component::RoleSecret(role) => format!("{tenant}-cluster-{role}"),
        Component::ClusterReadWriteService => format!("{tenant}-cluster-rw"),
        Component::AuthApi => format!("{tenant}-auth"),
        Component::RestApi => format!("{tenant}-rest"),
        Component::HttpIngressRoute => format!("{tenant}-ingress"),
        Component::TcpIngressRoute => format!("{tenant}-ingress-tcp"),
        Component::MigrationJob => format!("{tenant}-migrate"),
        Component::JwksConfigMap => format!("{tenant}-jwks"),
        Component::Bucket => tenant.to_string(),
        Component::StorageUser => format!("{tenant}-user"),
        Component::StoragePolicy => format!("{tenant}-policy"),
    }
}

pub fn cluster_name(tenant: &TenantRef) -> String {
    resource_name(tenant, Component::Cluster)
}

pub fn database_name(tenant: &TenantRef) -> String {
    resource_name(tenant, Component::Database)
}

pub fn role_secret_name(tenant: &TenantRef, role: DatabaseRole) -> String {
    resource_name(tenant, Component::RoleSecret(role))
}

/// The name of the service the cluster operator creates in front of the
/// cluster's primary.
pub fn cluster_rw_service_name(tenant: &TenantRef) -> String {
    resource_name(tenant, Component::ClusterReadWriteService)
}

/// The in-cluster DNS name of the tenant's primary database.
pub fn cluster_rw_host(tenant: &TenantRef, namespace: &str) -> String {
    format!(
        "{}.{}.svc.cluster.local",
        cluster_rw_service_name(tenant),
        namespace
    )
}

/// The name shared by the auth API deployment and its service.
pub fn auth_api_name(tenant: &TenantRef) -> String {
    resource_name(tenant, Component::AuthApi)
}

/// The name shared by the REST API deployment and its service.
pub fn rest_api_name(tenant: &TenantRef) -> String {
    resource_name(tenant, Component::RestApi)
}

pub fn http_ingress_route_name(tenant: &TenantRef) -> String {
    resource_name(tenant, Component::HttpIngressRoute)
}

pub fn tcp_ingress_route_name(tenant: &TenantRef) -> String {
    resource_name(tenant, Component::TcpIngressRoute)
}

pub fn migration_job_name(tenant: &TenantRef) -> String {
    resource_name(tenant, Component::MigrationJob)
}

pub fn jwks_config_map_name(tenant: &TenantRef) -> String {
    resource_name(tenant, Component::JwksConfigMap)
}

pub fn bucket_name(tenant: &TenantRef) -> String {
    resource_name(tenant, Component::Bucket)
}

pub fn storage_user_name(tenant: &TenantRef) -> String {
    resource_name(tenant, Component::StorageUser)
}

pub fn storage_policy_name(tenant: &TenantRef) -> String {
    resource_name(tenant, Component::StoragePolicy)
}

/// The externally visible endpoints of a tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantEndpoints {
    /// The host serving the tenant's HTTP APIs.
    pub host: String,
    /// The host serving SNI-routed Postgres connections.
    pub database_host: String,
    pub auth_url: String,
    pub rest_url: String,
    pub docs_url: String,
}

/// The path prefix routed to the auth API.
pub const AUTH_PATH: &str = "/api/auth";
/// The path prefix routed to the REST API.
pub const REST_PATH: &str = "/api/rest";
/// The path prefix routed to the API documentation viewer.
pub const DOCS_PATH: &str = "/api/docs";

impl TenantEndpoints {
    pub fn new(tenant: &TenantRef, external_domain: &str) -> TenantEndpoints {
        let host = format!("{tenant}.{external_domain}");
        TenantEndpoints {
            database_host: format!("{tenant}.db.{external_domain}"),
            auth_url: format!("https://{host}{AUTH_PATH}"),
            rest_url: format!("https://{host}{REST_PATH}"),
            docs_url: format!("https://{host}{DOCS_PATH}"),
            host,
        }
    }
}
