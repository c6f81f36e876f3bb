// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use hearth_cloud_resources::crd::cluster::v1::{
    BootstrapConfiguration, BootstrapInitDb, Cluster, ClusterSpec, ManagedConfiguration,
    RoleConfiguration, StorageConfiguration,
};
use hearth_cloud_resources::crd::database::v1::{Database, DatabaseSpec};
use hearth_cloud_resources::crd::LocalObjectReference;
use hearth_cloud_resources::naming::{self, Component};
use hearth_cloud_resources::{DatabaseRole, StorageSize, TenantRef};

use crate::pod::object_meta;
use crate::KubernetesTenantOrchestratorConfig;

/// Renders the tenant's Postgres cluster.
///
/// The cluster bootstraps the application database owned by the `app` role,
/// whose credentials the operator generates. The remaining roles are managed
/// declaratively from their credential secrets.
pub(crate) fn create_cluster_object(
    config: &KubernetesTenantOrchestratorConfig,
    namespace: &str,
    tenant: &TenantRef,
    storage_size: &StorageSize,
) -> Cluster {
    let roles = vec![
        RoleConfiguration {
            name: DatabaseRole::Authenticator.to_string(),
            ensure: "present".into(),
            login: true,
            password_secret: Some(LocalObjectReference {
                name: naming::role_secret_name(tenant, DatabaseRole::Authenticator),
            }),
            in_roles: vec![],
        },
        RoleConfiguration {
            name: DatabaseRole::AppAdmin.to_string(),
            ensure: "present".into(),
            login: true,
            password_secret: Some(LocalObjectReference {
                name: naming::role_secret_name(tenant, DatabaseRole::AppAdmin),
            }),
            in_roles: vec![DatabaseRole::App.to_string()],
        },
    ];
    Cluster {
        metadata: object_meta(
            config,
            namespace,
            tenant,
            Component::Cluster,
            naming::cluster_name(tenant),
        ),
        spec: ClusterSpec {
            instances: config.cluster_instances,
            image_name: config.cluster_image.clone(),
            storage: StorageConfiguration {
                size: storage_size.to_string(),
                storage_class: config.storage_class.clone(),
            },
            bootstrap: Some(BootstrapConfiguration {
                initdb: Some(BootstrapInitDb {
                    database: naming::APP_DATABASE.into(),
                    owner: DatabaseRole::App.to_string(),
                }),
            }),
            managed: Some(ManagedConfiguration { roles }),
        },
        status: None,
    }
}

pub(crate) fn create_database_object(
    config: &KubernetesTenantOrchestratorConfig,
    namespace: &str,
    tenant: &TenantRef,
) -> Database {
    Database {
        metadata: object_meta(
            config,
            namespace,
            tenant,
            Component::Database,
            naming::database_name(tenant),
        ),
        spec: DatabaseSpec {
            name: naming::APP_DATABASE.into(),
            owner: DatabaseRole::App.to_string(),
            cluster: LocalObjectReference {
                name: naming::cluster_name(tenant),
            },
            ensure: Some("present".into()),
        },
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::tests::{config, tenant, NAMESPACE};

    #[test]
    fn cluster_declares_managed_roles() {
        let size: StorageSize = "5Gi".parse().unwrap();
        let cluster = create_cluster_object(&config(), NAMESPACE, &tenant(), &size);
        assert_eq!(
            cluster.metadata.name.as_deref(),
            Some("hisqrzwgndjcycmkwpnj-cluster")
        );
        assert_eq!(cluster.metadata.namespace.as_deref(), Some(NAMESPACE));
        assert_eq!(cluster.spec.storage.size, "5Gi");
        assert_eq!(cluster.spec.storage.storage_class.as_deref(), Some("standard"));

        let initdb = cluster.spec.bootstrap.unwrap().initdb.unwrap();
        assert_eq!(initdb.database, "app");
        assert_eq!(initdb.owner, "app");

        let roles = cluster.spec.managed.unwrap().roles;
        let names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["authenticator", "app-admin"]);
        assert_eq!(
            roles[0].password_secret.as_ref().unwrap().name,
            "hisqrzwgndjcycmkwpnj-cluster-authenticator"
        );
        assert_eq!(roles[1].in_roles, ["app"]);
    }

    #[test]
    fn database_is_bound_to_cluster() {
        let database = create_database_object(&config(), NAMESPACE, &tenant());
        assert_eq!(
            database.metadata.name.as_deref(),
            Some("hisqrzwgndjcycmkwpnj-database")
        );
        assert_eq!(database.spec.cluster.name, "hisqrzwgndjcycmkwpnj-cluster");
        assert_eq!(database.spec.owner, "app");
    }
}
