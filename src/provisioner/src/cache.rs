// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Pooled connections to tenant databases.
//!
//! [`ConnectionCache`] authorizes a caller for a `(tenant, role)` pair and
//! hands out a shared pool for it. Pools live in a [`TtlCache`] and are
//! rebuilt from the role's credential secret once they expire. Creation is
//! serialized per key, so concurrent misses on one key build a single pool.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use hearth_cloud_resources::{DatabaseRole, RoleCredentials, TenantRef, TenantResourceReader};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::error::{Error, UpstreamComponent};
use crate::metrics::Metrics;

/// The default lifetime of a cached connection pool.
pub const DEFAULT_CONNECTION_TTL: Duration = Duration::from_secs(60 * 60);

/// A map whose entries expire a fixed time after insertion.
///
/// Expired entries are dropped lazily when read, and in bulk by
/// [`TtlCache::sweep`].
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, (V, Instant)>>,
}

impl<K, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TtlCache").finish_non_exhaustive()
    }
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        TtlCache {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, (V, Instant)>> {
        // The map is never left in an inconsistent state, so a poisoned lock
        // is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the value of `key` if it has not expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Inserts `value`, replacing any previous value of `key`. The entry
    /// expires after `ttl`.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.lock().insert(key, (value, Instant::now() + ttl));
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key).map(|(value, _)| value)
    }

    /// Removes every entry whose key does not satisfy `f`.
    pub fn retain<F>(&self, mut f: F)
    where
        F: FnMut(&K) -> bool,
    {
        self.lock().retain(|k, _| f(k));
    }

    /// Drops all expired entries and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.len()
    }

    /// The number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Sweeps the cache every `interval` until `cancel` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        hearth_ore::task::spawn(|| "ttl-cache-sweeper", async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = cache.sweep();
                        if swept > 0 {
                            debug!(swept, "swept expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

/// The identity of the user on whose behalf a request is made.
#[derive(Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: Uuid,
    /// The caller's access token, forwarded to the SQL-RPC service.
    pub access_token: String,
}

impl fmt::Debug for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CallerIdentity")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Decides whether a caller may use a tenant's database.
#[async_trait]
pub trait PermissionChecker: fmt::Debug + Send + Sync {
    /// Reports whether `caller` may access the project of `tenant`, and, if
    /// `require_owner` is set, whether the caller owns it.
    async fn check_project_permission(
        &self,
        caller: &CallerIdentity,
        tenant: &TenantRef,
        require_owner: bool,
    ) -> Result<bool, Error>;
}

/// Opens connection pools to tenant databases.
#[async_trait]
pub trait PoolFactory: fmt::Debug + Send + Sync {
    type Pool: Send + Sync + 'static;

    async fn create_pool(&self, credentials: &RoleCredentials) -> Result<Self::Pool, Error>;
}

/// Opens [`deadpool_postgres`] pools without TLS, as tenant databases are
/// reached over the cluster network.
#[derive(Debug, Clone)]
pub struct PostgresPoolFactory {
    pub max_size: usize,
}

impl Default for PostgresPoolFactory {
    fn default() -> Self {
        PostgresPoolFactory { max_size: 8 }
    }
}

#[async_trait]
impl PoolFactory for PostgresPoolFactory {
    type Pool = Pool;

    async fn create_pool(&self, credentials: &RoleCredentials) -> Result<Pool, Error> {
        let config: tokio_postgres::Config = credentials
            .uri
            .parse()
            .map_err(|e| Error::upstream(UpstreamComponent::TenantDatabase, e))?;
        let manager = Manager::from_config(
            config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        Pool::builder(manager)
            .max_size(self.max_size)
            .build()
            .map_err(|e| Error::upstream(UpstreamComponent::TenantDatabase, e))
    }
}

/// Drops cached connections whose credentials changed.
pub trait InvalidateConnections: fmt::Debug + Send + Sync {
    /// Drops the cached connection of `role` for `tenant`.
    fn invalidate_role(&self, tenant: &TenantRef, role: DatabaseRole);

    /// Drops every cached connection for `tenant`.
    fn invalidate(&self, tenant: &TenantRef);
}

type CacheKey = (TenantRef, DatabaseRole);

pub struct ConnectionCache<F: PoolFactory> {
    permissions: Arc<dyn PermissionChecker>,
    secrets: Arc<dyn TenantResourceReader>,
    factory: F,
    ttl: Duration,
    pools: Arc<TtlCache<CacheKey, Arc<F::Pool>>>,
    creation_locks: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
    metrics: Metrics,
}

impl<F: PoolFactory> fmt::Debug for ConnectionCache<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("factory", &self.factory)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<F: PoolFactory> ConnectionCache<F> {
    pub fn new(
        permissions: Arc<dyn PermissionChecker>,
        secrets: Arc<dyn TenantResourceReader>,
        factory: F,
        ttl: Duration,
        metrics: Metrics,
    ) -> Self {
        ConnectionCache {
            permissions,
            secrets,
            factory,
            ttl,
            pools: Arc::new(TtlCache::new()),
            creation_locks: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// The underlying cache, for sweeping.
    pub fn pools(&self) -> &Arc<TtlCache<CacheKey, Arc<F::Pool>>> {
        &self.pools
    }

    /// Returns a pool connecting to the database of `tenant` as `role`, on
    /// behalf of `caller`.
    ///
    /// Two calls for the same tenant and role within the TTL return the same
    /// pool.
    #[instrument(skip(self, caller), fields(tenant = %tenant, user = %caller.user_id))]
    pub async fn get_connection(
        &self,
        tenant: &TenantRef,
        caller: &CallerIdentity,
        role: DatabaseRole,
    ) -> Result<Arc<F::Pool>, Error> {
        let permitted = self
            .permissions
            .check_project_permission(caller, tenant, role.is_privileged())
            .await?;
        if !permitted {
            return Err(Error::Authorization(format!(
                "caller may not connect to project {tenant} as {role}"
            )));
        }

        let key = (tenant.clone(), role);
        if let Some(pool) = self.pools.get(&key) {
            self.record(true);
            return Ok(pool);
        }

        let lock = self.creation_lock(&key);
        let _guard = lock.lock().await;
        // Another caller may have created the pool while we waited.
        if let Some(pool) = self.pools.get(&key) {
            self.record(true);
            return Ok(pool);
        }
        self.record(false);

        let credentials = self.secrets.read_role_secret(tenant, role).await?;
        let pool = Arc::new(self.factory.create_pool(&credentials).await?);
        trace!("created connection pool");
        self.pools
            .insert_with_ttl(key, Arc::clone(&pool), self.ttl);
        Ok(pool)
    }

    fn record(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.metrics
            .connection_cache
            .with_label_values(&[result])
            .inc();
    }

    fn creation_lock(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .creation_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        // Drop locks nobody holds or waits for.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

impl<F: PoolFactory> InvalidateConnections for ConnectionCache<F> {
    fn invalidate_role(&self, tenant: &TenantRef, role: DatabaseRole) {
        debug!(%tenant, %role, "invalidating cached connection");
        self.pools.remove(&(tenant.clone(), role));
    }

    fn invalidate(&self, tenant: &TenantRef) {
        debug!(%tenant, "invalidating cached connections");
        self.pools.retain(|(t, _)| t != tenant);
    }
}
