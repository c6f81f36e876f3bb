// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The persisted project records.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Pool, PoolError};
use hearth_cloud_resources::TenantRef;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};
use uuid::Uuid;

/// The identifier of a project record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub i64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A project as recorded in the project store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub tenant_ref: TenantRef,
    pub owner_id: Uuid,
    /// When the project's database cluster was first observed healthy.
    pub initialized_at: Option<DateTime<Utc>>,
    pub password_expired_at: Option<DateTime<Utc>>,
}

/// The fields of a project to update. `None` leaves a field unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectUpdate {
    /// Only takes effect if the project has not been initialized yet.
    pub initialized_at: Option<DateTime<Utc>>,
    pub password_expired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("project store connection: {0}")]
    Pool(#[from] PoolError),
    #[error("project store query: {0}")]
    Query(#[from] tokio_postgres::Error),
    #[error("project store row has invalid tenant ref {0:?}")]
    InvalidRef(String),
}

/// Reads and updates project records.
#[async_trait]
pub trait ProjectStore: fmt::Debug + Send + Sync {
    async fn find_by_ref(&self, tenant: &TenantRef) -> Result<Option<Project>, StoreError>;

    /// Applies `update` to the project of `tenant`. Returns whether a project
    /// was found.
    async fn update_by_ref(
        &self,
        tenant: &TenantRef,
        update: &ProjectUpdate,
    ) -> Result<bool, StoreError>;
}

/// A [`ProjectStore`] backed by the `projects` table of the platform
/// database.
pub struct PostgresProjectStore {
    pool: Pool,
}

impl fmt::Debug for PostgresProjectStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PostgresProjectStore").finish_non_exhaustive()
    }
}

impl PostgresProjectStore {
    pub fn new(pool: Pool) -> PostgresProjectStore {
        PostgresProjectStore { pool }
    }
}

#[async_trait]
impl ProjectStore for PostgresProjectStore {
    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn find_by_ref(&self, tenant: &TenantRef) -> Result<Option<Project>, StoreError> {
        let q = "SELECT id, ref, owner_id, initialized_at, password_expired_at
             FROM projects WHERE ref = $1";
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(q).await?;
        let Some(row) = client.query_opt(&statement, &[&tenant.as_str()]).await? else {
            return Ok(None);
        };
        let tenant_ref: String = row.try_get("ref")?;
        Ok(Some(Project {
            id: ProjectId(row.try_get("id")?),
            tenant_ref: tenant_ref
                .parse()
                .map_err(|_| StoreError::InvalidRef(tenant_ref.clone()))?,
            owner_id: row.try_get("owner_id")?,
            initialized_at: row.try_get("initialized_at")?,
            password_expired_at: row.try_get("password_expired_at")?,
        }))
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn update_by_ref(
        &self,
        tenant: &TenantRef,
        update: &ProjectUpdate,
    ) -> Result<bool, StoreError> {
        // The first initialization time wins.
        let q = "UPDATE projects SET
                initialized_at = COALESCE(initialized_at, $2),
                password_expired_at = COALESCE($3, password_expired_at)
             WHERE ref = $1";
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(q).await?;
        let updated = client
            .execute(
                &statement,
                &[
                    &tenant.as_str(),
                    &update.initialized_at,
                    &update.password_expired_at,
                ],
            )
            .await?;
        trace!(updated, "updated project");
        Ok(updated > 0)
    }
}
