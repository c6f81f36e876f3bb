// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A client for the SQL-RPC service that owns project records.
//!
//! The service exposes Postgres functions over HTTP in the PostgREST style:
//! each call is a `POST /rpc/{function}` whose JSON body names the function's
//! arguments. Calls are made on behalf of a caller, whose access token is
//! forwarded so that row-level security applies.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use hearth_cloud_resources::{AuthProviderSetting, TenantRef};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::cache::{CallerIdentity, PermissionChecker};
use crate::error::Error;
use crate::store::ProjectId;

/// The error body returned by the SQL-RPC service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgrestError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl fmt::Display for PostgrestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)?;
        if let Some(details) = &self.details {
            write!(f, ": {details}")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("unauthorized: {0}")]
    Unauthorized(PostgrestError),
    #[error("forbidden: {0}")]
    Forbidden(PostgrestError),
    #[error("not found: {0}")]
    NotFound(PostgrestError),
    #[error("conflict: {0}")]
    Conflict(PostgrestError),
    #[error("internal error: {error} (status {status})")]
    Internal { status: u16, error: PostgrestError },
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RpcError {
    /// Classifies an error response by its error code, falling back to the
    /// HTTP status for bodies without a known code.
    fn from_response(status: StatusCode, error: PostgrestError) -> RpcError {
        match (error.code.as_str(), status) {
            ("PT401", _) | (_, StatusCode::UNAUTHORIZED) => RpcError::Unauthorized(error),
            ("PT403", _) | (_, StatusCode::FORBIDDEN) => RpcError::Forbidden(error),
            ("PT404", _) | (_, StatusCode::NOT_FOUND) => RpcError::NotFound(error),
            ("PT409", _) | (_, StatusCode::CONFLICT) => RpcError::Conflict(error),
            _ => RpcError::Internal {
                status: status.as_u16(),
                error,
            },
        }
    }
}

/// The record created by `create_project`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedProject {
    pub id: ProjectId,
    #[serde(rename = "ref")]
    pub tenant_ref: TenantRef,
    /// The secret the auth API signs its sessions with.
    pub auth_secret: String,
}

impl fmt::Debug for CreatedProject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CreatedProject")
            .field("id", &self.id)
            .field("tenant_ref", &self.tenant_ref)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedProject {
    pub id: ProjectId,
    #[serde(rename = "ref")]
    pub tenant_ref: TenantRef,
}

/// The arguments of `update_project`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectSettingsUpdate {
    pub p_id: ProjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_trusted_origins: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_proxy_url: Option<String>,
}

impl ProjectSettingsUpdate {
    /// Reports whether the update changes any column.
    pub fn is_empty(&self) -> bool {
        self.p_name.is_none()
            && self.p_description.is_none()
            && self.p_trusted_origins.is_none()
            && self.p_proxy_url.is_none()
    }
}

/// The remote procedures of the SQL-RPC service.
#[async_trait]
pub trait SqlRpc: fmt::Debug + Send + Sync {
    async fn create_project(
        &self,
        caller: &CallerIdentity,
        name: &str,
        description: Option<&str>,
    ) -> Result<CreatedProject, RpcError>;

    async fn delete_project(
        &self,
        caller: &CallerIdentity,
        id: ProjectId,
    ) -> Result<DeletedProject, RpcError>;

    async fn update_project(
        &self,
        caller: &CallerIdentity,
        update: &ProjectSettingsUpdate,
    ) -> Result<(), RpcError>;

    async fn create_or_update_auth_providers(
        &self,
        caller: &CallerIdentity,
        id: ProjectId,
        providers: &[AuthProviderSetting],
    ) -> Result<(), RpcError>;

    /// Reports whether `caller` may access the project of `tenant`, and, if
    /// `require_owner` is set, whether the caller owns it.
    async fn check_project_permission(
        &self,
        caller: &CallerIdentity,
        tenant: &TenantRef,
        require_owner: bool,
    ) -> Result<bool, RpcError>;
}

/// Functions returning a single row may answer with either the row or a
/// one-element array, depending on how they are declared.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_first(self) -> Option<T> {
        match self {
            OneOrMany::One(t) => Some(t),
            OneOrMany::Many(ts) => ts.into_iter().next(),
        }
    }
}

/// A [`SqlRpc`] that talks to a PostgREST server.
#[derive(Clone)]
pub struct PostgrestClient {
    client: reqwest::Client,
    url: String,
    service_key: String,
}

impl fmt::Debug for PostgrestClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PostgrestClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl PostgrestClient {
    /// Creates a client for the server at `url`, authenticating as the
    /// service with `service_key`.
    pub fn new(url: &str, service_key: String) -> Result<PostgrestClient, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(PostgrestClient {
            client,
            url: url.trim_end_matches('/').to_owned(),
            service_key,
        })
    }

    fn build_request(&self, function: &str, caller: &CallerIdentity) -> reqwest::RequestBuilder {
        self.client
            .request(Method::POST, format!("{}/rpc/{}", self.url, function))
            .header("apikey", self.service_key.as_str())
            .bearer_auth(&caller.access_token)
    }

    async fn call<A, T>(
        &self,
        function: &str,
        caller: &CallerIdentity,
        args: &A,
    ) -> Result<T, RpcError>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let res = self
            .build_request(function, caller)
            .json(args)
            .send()
            .await?;
        let status = res.status();
        let body = res.bytes().await?;
        trace!(function, %status, "rpc response");
        if status.is_success() {
            // Void functions answer with an empty body.
            let body: &[u8] = if body.is_empty() { b"null" } else { &body };
            Ok(serde_json::from_slice(body)?)
        } else {
            let error = serde_json::from_slice(&body).unwrap_or_else(|_| PostgrestError {
                code: String::new(),
                message: String::from_utf8_lossy(&body).into_owned(),
                details: None,
                hint: None,
            });
            Err(RpcError::from_response(status, error))
        }
    }

    async fn call_one<A, T>(
        &self,
        function: &str,
        caller: &CallerIdentity,
        args: &A,
    ) -> Result<T, RpcError>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let rows: OneOrMany<T> = self.call(function, caller, args).await?;
        rows.into_first().ok_or_else(|| {
            RpcError::NotFound(PostgrestError {
                code: "PT404".into(),
                message: format!("{function} returned no rows"),
                details: None,
                hint: None,
            })
        })
    }
}

#[derive(Serialize)]
struct CreateProjectArgs<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct DeleteProjectArgs {
    project_id: ProjectId,
}

#[derive(Serialize)]
struct AuthProvidersArgs<'a> {
    project_id: ProjectId,
    providers: &'a [AuthProviderSetting],
}

#[derive(Serialize)]
struct PermissionArgs<'a> {
    p_ref: &'a TenantRef,
    p_require_owner: bool,
}

#[async_trait]
impl SqlRpc for PostgrestClient {
    #[instrument(skip(self, caller), fields(user = %caller.user_id))]
    async fn create_project(
        &self,
        caller: &CallerIdentity,
        name: &str,
        description: Option<&str>,
    ) -> Result<CreatedProject, RpcError> {
        let args = CreateProjectArgs { name, description };
        self.call_one("create_project", caller, &args).await
    }

    #[instrument(skip(self, caller), fields(user = %caller.user_id))]
    async fn delete_project(
        &self,
        caller: &CallerIdentity,
        id: ProjectId,
    ) -> Result<DeletedProject, RpcError> {
        let args = DeleteProjectArgs { project_id: id };
        self.call_one("delete_project", caller, &args).await
    }

    #[instrument(skip(self, caller), fields(user = %caller.user_id))]
    async fn update_project(
        &self,
        caller: &CallerIdentity,
        update: &ProjectSettingsUpdate,
    ) -> Result<(), RpcError> {
        let _: serde_json::Value = self.call("update_project", caller, update).await?;
        Ok(())
    }

    #[instrument(skip(self, caller, providers), fields(user = %caller.user_id))]
    async fn create_or_update_auth_providers(
        &self,
        caller: &CallerIdentity,
        id: ProjectId,
        providers: &[AuthProviderSetting],
    ) -> Result<(), RpcError> {
        let args = AuthProvidersArgs {
            project_id: id,
            providers,
        };
        let _: serde_json::Value = self
            .call("create_or_update_auth_providers", caller, &args)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, caller), fields(user = %caller.user_id, tenant = %tenant))]
    async fn check_project_permission(
        &self,
        caller: &CallerIdentity,
        tenant: &TenantRef,
        require_owner: bool,
    ) -> Result<bool, RpcError> {
        let args = PermissionArgs {
            p_ref: tenant,
            p_require_owner: require_owner,
        };
        self.call("check_project_permission", caller, &args).await
    }
}

/// Every [`SqlRpc`] can answer permission checks for the connection cache.
#[async_trait]
impl<T: SqlRpc> PermissionChecker for T {
    async fn check_project_permission(
        &self,
        caller: &CallerIdentity,
        tenant: &TenantRef,
        require_owner: bool,
    ) -> Result<bool, Error> {
        Ok(SqlRpc::check_project_permission(self, caller, tenant, require_owner).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(code: &str) -> PostgrestError {
        PostgrestError {
            code: code.into(),
            message: "boom".into(),
            details: None,
            hint: None,
        }
    }

    #[test]
    fn classify_by_code() {
        let status = StatusCode::BAD_REQUEST;
        assert!(matches!(
            RpcError::from_response(status, error("PT401")),
            RpcError::Unauthorized(_)
        ));
        assert!(matches!(
            RpcError::from_response(status, error("PT403")),
            RpcError::Forbidden(_)
        ));
        assert!(matches!(
            RpcError::from_response(status, error("PT404")),
            RpcError::NotFound(_)
        ));
        assert!(matches!(
            RpcError::from_response(status, error("PT409")),
            RpcError::Conflict(_)
        ));
        assert!(matches!(
            RpcError::from_response(status, error("23505")),
            RpcError::Internal { status: 400, .. }
        ));
        assert!(matches!(
            RpcError::from_response(StatusCode::FORBIDDEN, error("42501")),
            RpcError::Forbidden(_)
        ));
    }

    #[test]
    fn created_project_accepts_row_or_array() {
        let row = r#"{"id": 7, "ref": "hisqrzwgndjcycmkwpnj", "auth_secret": "s"}"#;
        let one: OneOrMany<CreatedProject> = serde_json::from_str(row).unwrap();
        let many: OneOrMany<CreatedProject> =
            serde_json::from_str(&format!("[{row}]")).unwrap();
        let one = one.into_first().unwrap();
        assert_eq!(one.id, ProjectId(7));
        assert_eq!(one.tenant_ref.as_str(), "hisqrzwgndjcycmkwpnj");
        assert_eq!(Some(one), many.into_first());
    }

    #[test]
    fn settings_update_omits_absent_fields() {
        let update = ProjectSettingsUpdate {
            p_id: ProjectId(3),
            p_proxy_url: Some("https://proxy.dev".into()),
            ..Default::default()
        };
        assert!(!update.is_empty());
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({"p_id": 3, "p_proxy_url": "https://proxy.dev"})
        );
    }
}
