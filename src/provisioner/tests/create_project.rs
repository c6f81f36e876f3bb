// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Project creation: the saga, its rollback, and the post-install phase.

mod common;

use hearth_cloud_resources::DatabaseRole;
use hearth_provisioner::{Error, UpstreamComponent};

use crate::common::{
    create_input, tenant, Harness, CREATE_STEPS, HEALTHY_PHASES, POST_INSTALL_STEPS, PROJECT_ID,
};

fn create_ops() -> Vec<String> {
    CREATE_STEPS.iter().map(|(op, _)| op.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn create_project_happy_path() {
    let h = Harness::new();
    h.resources.set_phases(&HEALTHY_PHASES);

    let project = h.service.create_project(create_input()).await.unwrap();
    assert_eq!(project.id, PROJECT_ID);
    assert_eq!(project.tenant_ref, tenant());
    assert_eq!(h.journal.entries(), create_ops());

    let authenticator = h.resources.secret(&tenant(), DatabaseRole::Authenticator).unwrap();
    let app_admin = h.resources.secret(&tenant(), DatabaseRole::AppAdmin).unwrap();
    assert_eq!(authenticator.username, "authenticator");
    assert_eq!(app_admin.username, "app-admin");
    assert_ne!(authenticator.password, app_admin.password);
    assert!(authenticator
        .uri
        .contains("@hisqrzwgndjcycmkwpnj-cluster-rw.tenants.svc.cluster.local:5432/app"));

    // Post-install waits for the cluster, then installs the rest in order.
    h.journal.wait_for("k8s.create_tcp_ingress_route").await;
    let mut expected = create_ops();
    expected.extend(POST_INSTALL_STEPS.iter().map(|s| s.to_string()));
    assert_eq!(h.journal.entries(), expected);

    assert!(h.store.get(&tenant()).unwrap().initialized_at.is_some());
    assert_eq!(
        h.metrics.project_create.with_label_values(&["success"]).get(),
        1
    );
    h.service.shutdown().await;
    assert_eq!(h.metrics.post_install.with_label_values(&["success"]).get(), 1);
}

#[tokio::test]
async fn failed_step_unwinds_completed_steps_in_reverse() {
    for (i, (failing, _)) in CREATE_STEPS.iter().enumerate() {
        let h = Harness::new();
        h.journal.fail(failing);

        let err = h.service.create_project(create_input()).await.unwrap_err();

        let mut expected: Vec<String> = CREATE_STEPS[..=i]
            .iter()
            .map(|(op, _)| op.to_string())
            .collect();
        expected.extend(
            CREATE_STEPS[..i]
                .iter()
                .rev()
                .map(|(_, compensation)| compensation.to_string()),
        );
        assert_eq!(h.journal.entries(), expected, "failing {failing}");

        let component = if failing.starts_with("rpc.") {
            UpstreamComponent::SqlRpc
        } else if failing.starts_with("storage.") {
            UpstreamComponent::ObjectStorage
        } else {
            UpstreamComponent::Kubernetes
        };
        assert_eq!(err.upstream_component(), Some(component), "failing {failing}");
        assert!(err.to_string().contains("injected failure"), "{err}");
        assert_eq!(
            h.metrics.project_create.with_label_values(&["failure"]).get(),
            1
        );
        h.service.shutdown().await;
    }
}

#[tokio::test]
async fn storage_user_failure_deletes_bucket_and_record() {
    let h = Harness::new();
    h.journal.fail("storage.create_user");

    let err = h.service.create_project(create_input()).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "object storage error: create_user failed: injected failure of create_user \
         (InjectedFailure)"
    );
    assert_eq!(h.journal.count("storage.delete_bucket"), 1);
    assert_eq!(h.journal.count("rpc.delete_project"), 1);
    assert!(!h.journal.entries().iter().any(|e| e.starts_with("k8s.")));
}

#[tokio::test]
async fn failed_compensation_does_not_mask_the_original_error() {
    let h = Harness::new();
    h.journal.fail("k8s.create_cluster");
    h.journal.fail("storage.delete_user");

    let err = h.service.create_project(create_input()).await.unwrap_err();

    assert_eq!(err.upstream_component(), Some(UpstreamComponent::Kubernetes));
    assert!(err.to_string().contains("create_cluster"), "{err}");
    // Every compensation ran, including those after the failed one.
    assert_eq!(h.journal.count("storage.delete_bucket"), 1);
    assert_eq!(h.journal.count("rpc.delete_project"), 1);
    assert_eq!(
        h.metrics
            .compensation_failures
            .with_label_values(&["delete storage user"])
            .get(),
        1
    );
}

#[tokio::test]
async fn invalid_input_touches_nothing() {
    let h = Harness::new();
    let mut input = create_input();
    input.name = "   ".into();

    let err = h.service.create_project(input).await.unwrap_err();

    assert!(matches!(err, Error::Validation(_)), "{err:?}");
    assert!(h.journal.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn post_install_failure_is_not_rolled_back() {
    let h = Harness::new();
    h.resources.set_phases(&HEALTHY_PHASES);
    h.journal.fail("k8s.create_auth_service");

    h.service.create_project(create_input()).await.unwrap();
    h.journal.wait_for("k8s.create_auth_service").await;
    h.service.shutdown().await;

    let entries = h.journal.entries();
    assert!(!entries.iter().any(|e| e.contains("delete")), "{entries:?}");
    assert!(!entries.contains(&"k8s.create_rest_deployment".to_string()));
    assert_eq!(h.metrics.post_install.with_label_values(&["failure"]).get(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_post_install() {
    let h = Harness::new();
    // The cluster never becomes healthy.
    h.resources.set_phases(&[Some("Setting up primary")]);

    h.service.create_project(create_input()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    h.service.shutdown().await;

    assert!(!h.journal.contains("k8s.create_migration_job"));
    assert_eq!(
        h.metrics.post_install.with_label_values(&["cancelled"]).get(),
        1
    );
    assert!(h.store.get(&tenant()).unwrap().initialized_at.is_none());
}
