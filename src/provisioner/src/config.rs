// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Command line configuration for `hearth-provisionerd`.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use hearth_orchestrator_kubernetes::KubernetesCliArgs;
use hearth_ore::tracing::TracingCliArgs;

use crate::project::ProjectServiceConfig;
use crate::storage::S3IamStorageConfig;

#[derive(Clone, clap::Parser)]
#[clap(name = "hearth-provisionerd", about = "Provisions and tears down tenant stacks.")]
pub struct Args {
    // === Connection options. ===
    /// The address on which to serve the status stream and metrics.
    #[clap(
        long,
        env = "HTTP_LISTEN_ADDR",
        value_name = "HOST:PORT",
        default_value = "127.0.0.1:6880"
    )]
    pub http_listen_addr: SocketAddr,

    // === Tenant options. ===
    /// The domain under which tenant hosts are exposed.
    #[clap(long, env = "EXTERNAL_DOMAIN", value_name = "DOMAIN")]
    pub external_domain: String,

    // === SQL-RPC options. ===
    /// The base URL of the SQL-RPC service.
    #[clap(long, env = "RPC_URL", value_name = "URL")]
    pub rpc_url: String,
    /// The service key sent with every SQL-RPC request.
    #[clap(long, env = "RPC_SERVICE_KEY", value_name = "KEY", hide_env_values = true)]
    pub rpc_service_key: String,

    // === Object storage options. ===
    /// Overrides the S3 endpoint, for S3-compatible stores.
    #[clap(long, env = "STORAGE_ENDPOINT", value_name = "URL")]
    pub storage_endpoint: Option<String>,
    /// Overrides the IAM endpoint.
    #[clap(long, env = "STORAGE_IAM_ENDPOINT", value_name = "URL")]
    pub storage_iam_endpoint: Option<String>,
    #[clap(long, env = "STORAGE_REGION", value_name = "REGION")]
    pub storage_region: Option<String>,
    /// Static credentials. Falls back to the default AWS credential chain.
    #[clap(long, env = "STORAGE_ACCESS_KEY_ID", requires = "storage_secret_access_key")]
    pub storage_access_key_id: Option<String>,
    #[clap(long, env = "STORAGE_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub storage_secret_access_key: Option<String>,

    // === Project store options. ===
    /// The Postgres URL of the project store.
    #[clap(long, env = "PROJECT_STORE_URL", value_name = "POSTGRES_URL", hide_env_values = true)]
    pub project_store_url: String,

    // === Timing options. ===
    /// How long a project's post-install phase may take, including the wait
    /// for its database cluster.
    #[clap(long, env = "POST_INSTALL_TIMEOUT", value_parser = humantime::parse_duration, default_value = "15m")]
    pub post_install_timeout: Duration,
    /// How often to poll the health of a tenant's database cluster.
    #[clap(long, env = "HEALTH_POLL_INTERVAL", value_parser = humantime::parse_duration, default_value = "1s")]
    pub health_poll_interval: Duration,
    /// How long a pooled connection to a tenant database is reused.
    #[clap(long, env = "CONNECTION_TTL", value_parser = humantime::parse_duration, default_value = "1h")]
    pub connection_ttl: Duration,
    /// How often expired connections are swept.
    #[clap(long, env = "CONNECTION_SWEEP_INTERVAL", value_parser = humantime::parse_duration, default_value = "1m")]
    pub connection_sweep_interval: Duration,

    // === Kubernetes options. ===
    #[clap(flatten)]
    pub kubernetes: KubernetesCliArgs,

    // === Tracing options. ===
    #[clap(flatten)]
    pub tracing: TracingCliArgs,
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Args")
            .field("http_listen_addr", &self.http_listen_addr)
            .field("external_domain", &self.external_domain)
            .field("rpc_url", &self.rpc_url)
            .field("storage_endpoint", &self.storage_endpoint)
            .field("storage_region", &self.storage_region)
            .field("post_install_timeout", &self.post_install_timeout)
            .field("health_poll_interval", &self.health_poll_interval)
            .field("connection_ttl", &self.connection_ttl)
            .field("kubernetes", &self.kubernetes)
            .finish_non_exhaustive()
    }
}

impl Args {
    pub fn storage_config(&self) -> S3IamStorageConfig {
        S3IamStorageConfig {
            region: self.storage_region.clone(),
            endpoint: self.storage_endpoint.clone(),
            iam_endpoint: self.storage_iam_endpoint.clone(),
            credentials: self
                .storage_access_key_id
                .clone()
                .zip(self.storage_secret_access_key.clone()),
        }
    }

    pub fn project_service_config(&self, namespace: &str) -> ProjectServiceConfig {
        ProjectServiceConfig {
            external_domain: self.external_domain.clone(),
            namespace: namespace.to_owned(),
            post_install_timeout: self.post_install_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn durations_parse_with_humantime() {
        let args = Args::try_parse_from([
            "hearth-provisionerd",
            "--external-domain=hearth.test",
            "--rpc-url=http://rpc:3000",
            "--rpc-service-key=s3cr3t",
            "--project-store-url=postgres://store",
            "--post-install-timeout=5m 30s",
            "--auth-api-image=hearth/auth:latest",
            "--migration-image=hearth/migrate:latest",
        ])
        .unwrap();
        assert_eq!(args.post_install_timeout, Duration::from_secs(330));
        assert_eq!(args.health_poll_interval, Duration::from_secs(1));
        assert_eq!(args.connection_ttl, Duration::from_secs(3600));
        assert!(args.storage_config().credentials.is_none());
        assert!(!format!("{args:?}").contains("s3cr3t"));
    }
}
