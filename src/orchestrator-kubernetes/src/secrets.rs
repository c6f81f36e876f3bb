// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeMap;

use hearth_cloud_resources::naming::{self, Component};
use hearth_cloud_resources::{DatabaseRole, ResourceError, RoleCredentials, TenantRef};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use maplit::btreemap;

use crate::pod::object_meta;
use crate::KubernetesTenantOrchestratorConfig;

/// Label asking the cluster operator to reload a role whose secret changed.
const RELOAD_LABEL: &str = "cnpg.io/reload";

/// The config map key holding the signing key seed statement.
pub(crate) const SEED_SQL_KEY: &str = "seed.sql";

pub(crate) fn create_role_secret_object(
    config: &KubernetesTenantOrchestratorConfig,
    namespace: &str,
    tenant: &TenantRef,
    role: DatabaseRole,
    credentials: &RoleCredentials,
) -> Secret {
    let mut metadata = object_meta(
        config,
        namespace,
        tenant,
        Component::RoleSecret(role),
        naming::role_secret_name(tenant, role),
    );
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(RELOAD_LABEL.to_owned(), "true".to_owned());
    Secret {
        metadata,
        type_: Some("kubernetes.io/basic-auth".to_owned()),
        string_data: Some(btreemap! {
            RoleCredentials::USERNAME_KEY.to_owned() => credentials.username.clone(),
            RoleCredentials::PASSWORD_KEY.to_owned() => credentials.password.clone(),
            RoleCredentials::URI_KEY.to_owned() => credentials.uri.clone(),
        }),
        ..Default::default()
    }
}

/// Extracts role credentials from the secret `name`.
pub(crate) fn role_credentials_from_secret(
    name: &str,
    secret: Secret,
) -> Result<RoleCredentials, ResourceError> {
    let mut data = secret.data.unwrap_or_default();
    let mut take = |field: &'static str| {
        data.remove(field)
            .and_then(|bytes| String::from_utf8(bytes.0).ok())
            .ok_or_else(|| ResourceError::MissingData {
                kind: "Secret",
                name: name.to_owned(),
                field,
            })
    };
    Ok(RoleCredentials {
        username: take(RoleCredentials::USERNAME_KEY)?,
        password: take(RoleCredentials::PASSWORD_KEY)?,
        uri: take(RoleCredentials::URI_KEY)?,
    })
}

pub(crate) fn create_jwks_config_map_object(
    config: &KubernetesTenantOrchestratorConfig,
    namespace: &str,
    tenant: &TenantRef,
    seed_sql: &str,
) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(
            config,
            namespace,
            tenant,
            Component::JwksConfigMap,
            naming::jwks_config_map_name(tenant),
        ),
        data: Some(btreemap! {
            SEED_SQL_KEY.to_owned() => seed_sql.to_owned(),
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::ByteString;

    use super::*;
    use crate::pod::tests::{config, tenant, NAMESPACE};

    #[test]
    fn role_secret_carries_credentials() {
        let credentials = RoleCredentials::new(
            DatabaseRole::Authenticator,
            "hunter2".into(),
            "db.internal",
        );
        let secret = create_role_secret_object(
            &config(),
            NAMESPACE,
            &tenant(),
            DatabaseRole::Authenticator,
            &credentials,
        );
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("hisqrzwgndjcycmkwpnj-cluster-authenticator")
        );
        assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/basic-auth"));
        assert_eq!(secret.metadata.labels.unwrap()[RELOAD_LABEL], "true");
        let data = secret.string_data.unwrap();
        assert_eq!(data["username"], "authenticator");
        assert_eq!(data["password"], "hunter2");
        assert_eq!(data["uri"], credentials.uri);
    }

    #[test]
    fn reads_credentials_and_reports_missing_keys() {
        let mut secret = Secret {
            data: Some(btreemap! {
                "username".to_owned() => ByteString(b"app".to_vec()),
                "password".to_owned() => ByteString(b"secret".to_vec()),
                "uri".to_owned() => ByteString(b"postgresql://app:secret@h:5432/app".to_vec()),
                "host".to_owned() => ByteString(b"h".to_vec()),
            }),
            ..Default::default()
        };
        let credentials = role_credentials_from_secret("s", secret.clone()).unwrap();
        assert_eq!(credentials.username, "app");
        assert_eq!(credentials.uri, "postgresql://app:secret@h:5432/app");

        secret.data.as_mut().unwrap().remove("uri");
        match role_credentials_from_secret("s", secret) {
            Err(ResourceError::MissingData { field, .. }) => assert_eq!(field, "uri"),
            r => panic!("unexpected result: {r:?}"),
        }
    }

    #[test]
    fn jwks_config_map_holds_seed() {
        let config_map = create_jwks_config_map_object(
            &config(),
            NAMESPACE,
            &tenant(),
            "INSERT INTO jwks VALUES (1);",
        );
        assert_eq!(
            config_map.metadata.name.as_deref(),
            Some("hisqrzwgndjcycmkwpnj-jwks")
        );
        assert_eq!(
            config_map.data.unwrap()[SEED_SQL_KEY],
            "INSERT INTO jwks VALUES (1);"
        );
    }
}
