// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Authorization, identity, and expiry of cached tenant connections.

mod common;

use std::sync::Arc;
use std::time::Duration;

use hearth_cloud_resources::DatabaseRole;
use hearth_provisioner::cache::InvalidateConnections;
use hearth_provisioner::Error;

use crate::common::{member, owner, stranger, tenant, Harness, CONNECTION_TTL};

#[tokio::test(start_paused = true)]
async fn same_handle_within_ttl_fresh_handle_after() {
    let h = Harness::new();
    h.resources.put_secret(&tenant(), DatabaseRole::App, "first");

    let a = h
        .connections
        .get_connection(&tenant(), &owner(), DatabaseRole::App)
        .await
        .unwrap();
    tokio::time::advance(CONNECTION_TTL - Duration::from_secs(1)).await;
    let b = h
        .connections
        .get_connection(&tenant(), &owner(), DatabaseRole::App)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(h.pools.created(), 1);
    assert_eq!(h.resources.secret_reads(), 1);

    // The secret changes behind the cache's back. The new password is only
    // picked up once the entry expires.
    h.resources.put_secret(&tenant(), DatabaseRole::App, "second");
    tokio::time::advance(Duration::from_secs(1)).await;
    let c = h
        .connections
        .get_connection(&tenant(), &owner(), DatabaseRole::App)
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(h.pools.created(), 2);
    assert_eq!(h.resources.secret_reads(), 2);
    assert!(c.uri.contains(":second@"), "{}", c.uri);
}

#[tokio::test(start_paused = true)]
async fn privileged_role_requires_owner() {
    let h = Harness::new();
    h.resources.put_secret(&tenant(), DatabaseRole::AppAdmin, "admin");
    h.resources.put_secret(&tenant(), DatabaseRole::App, "app");

    let err = h
        .connections
        .get_connection(&tenant(), &member(), DatabaseRole::AppAdmin)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Authorization(_)), "{err:?}");

    // Members may use the unprivileged role, and owners the privileged one.
    h.connections
        .get_connection(&tenant(), &member(), DatabaseRole::App)
        .await
        .unwrap();
    h.connections
        .get_connection(&tenant(), &owner(), DatabaseRole::AppAdmin)
        .await
        .unwrap();
    assert_eq!(h.pools.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn authorization_is_checked_on_every_lookup() {
    let h = Harness::new();
    h.resources.put_secret(&tenant(), DatabaseRole::App, "app");
    h.connections
        .get_connection(&tenant(), &owner(), DatabaseRole::App)
        .await
        .unwrap();

    // A cached entry does not let strangers in.
    let err = h
        .connections
        .get_connection(&tenant(), &stranger(), DatabaseRole::App)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Authorization(_)), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_create_one_pool() {
    let h = Harness::new();
    h.resources.put_secret(&tenant(), DatabaseRole::App, "app");

    let (tenant, owner) = (tenant(), owner());
    let lookups = (0..8).map(|_| {
        h.connections
            .get_connection(&tenant, &owner, DatabaseRole::App)
    });
    let pools = futures::future::try_join_all(lookups).await.unwrap();

    assert_eq!(h.pools.created(), 1);
    assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
}

#[tokio::test(start_paused = true)]
async fn missing_secret_is_an_upstream_error() {
    let h = Harness::new();

    let err = h
        .connections
        .get_connection(&tenant(), &owner(), DatabaseRole::Authenticator)
        .await
        .unwrap_err();
    assert!(err.upstream_component().is_some(), "{err:?}");
    assert_eq!(h.pools.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn rotation_invalidates_the_cached_connection() {
    let h = Harness::new();
    h.resources.put_secret(&tenant(), DatabaseRole::App, "before");
    let before = h
        .connections
        .get_connection(&tenant(), &owner(), DatabaseRole::App)
        .await
        .unwrap();

    h.service
        .rotate_role_password(&owner(), &tenant(), DatabaseRole::App)
        .await
        .unwrap();
    assert!(h.journal.contains("k8s.update_role_secret:app"));

    let after = h
        .connections
        .get_connection(&tenant(), &owner(), DatabaseRole::App)
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    let password = h
        .resources
        .secret(&tenant(), DatabaseRole::App)
        .unwrap()
        .password;
    assert!(after.uri.contains(&password));
}

#[tokio::test(start_paused = true)]
async fn only_owners_rotate_passwords() {
    let h = Harness::new();
    let err = h
        .service
        .rotate_role_password(&member(), &tenant(), DatabaseRole::App)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Authorization(_)), "{err:?}");
    assert!(h.journal.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalidate_drops_every_role_of_a_tenant() {
    let h = Harness::new();
    for role in [DatabaseRole::App, DatabaseRole::Authenticator] {
        h.resources.put_secret(&tenant(), role, "pw");
        h.connections
            .get_connection(&tenant(), &owner(), role)
            .await
            .unwrap();
    }
    assert_eq!(h.connections.pools().len(), 2);

    h.connections.invalidate(&tenant());
    assert!(h.connections.pools().is_empty());
}
