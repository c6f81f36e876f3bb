// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The tenant provisioner daemon.

use std::process;
use std::sync::Arc;

use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use hearth_cloud_resources::TenantResourceController;
use hearth_orchestrator_kubernetes::KubernetesTenantOrchestrator;
use hearth_ore::cli::{self, CliConfig};
use hearth_ore::error::ErrorExt;
use hearth_ore::task::JoinHandleExt;
use hearth_ore::metrics::MetricsRegistry;
use hearth_provisioner::cache::{ConnectionCache, PostgresPoolFactory};
use hearth_provisioner::config::Args;
use hearth_provisioner::http::{self, HttpState};
use hearth_provisioner::metrics::Metrics;
use hearth_provisioner::rpc::PostgrestClient;
use hearth_provisioner::storage::S3IamStorage;
use hearth_provisioner::store::{PostgresProjectStore, ProjectStore};
use hearth_provisioner::{HealthMonitor, ProjectService};
use tokio::net::TcpListener;
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PROJECT_STORE_POOL_SIZE: usize = 16;

#[tokio::main]
async fn main() {
    let args = cli::parse_args(CliConfig {
        env_prefix: Some("HEARTH_"),
        enable_version_flag: true,
    });
    if let Err(err) = run(args).await {
        eprintln!("hearth-provisionerd: fatal: {}", err.display_with_causes());
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), anyhow::Error> {
    hearth_ore::tracing::configure(args.tracing.to_config("hearth-provisionerd"))?;
    info!(?args, "starting hearth-provisionerd");

    let registry = MetricsRegistry::new();
    let metrics = Metrics::register_into(&registry);

    let orchestrator = KubernetesTenantOrchestrator::new(
        args.kubernetes
            .clone()
            .into_config(args.external_domain.clone()),
    )
    .await
    .context("creating kubernetes orchestrator")?;
    let namespace = orchestrator.namespace().to_owned();
    let resources: Arc<dyn TenantResourceController> = Arc::new(orchestrator);
    let reader = resources.reader();

    let rpc = Arc::new(
        PostgrestClient::new(&args.rpc_url, args.rpc_service_key.clone())
            .context("creating sql-rpc client")?,
    );
    let storage = Arc::new(S3IamStorage::new(args.storage_config()).await);

    let store_config: tokio_postgres::Config = args
        .project_store_url
        .parse()
        .context("parsing project store url")?;
    let store_pool = Pool::builder(Manager::from_config(
        store_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    ))
    .max_size(PROJECT_STORE_POOL_SIZE)
    .build()
    .context("creating project store pool")?;
    let store: Arc<dyn ProjectStore> = Arc::new(PostgresProjectStore::new(store_pool));

    let health = Arc::new(HealthMonitor::new(
        Arc::clone(&reader),
        Arc::clone(&store),
        args.health_poll_interval,
        metrics.clone(),
    ));

    let shutdown = CancellationToken::new();
    let permissions = Arc::clone(&rpc);
    let connections = Arc::new(ConnectionCache::new(
        permissions,
        reader,
        PostgresPoolFactory::default(),
        args.connection_ttl,
        metrics.clone(),
    ));
    let sweeper = connections
        .pools()
        .spawn_sweeper(args.connection_sweep_interval, shutdown.child_token());

    let service = ProjectService::new(
        args.project_service_config(&namespace),
        rpc,
        storage,
        resources,
        Arc::clone(&health),
        connections,
        metrics,
    );

    hearth_ore::task::spawn(|| "signal-handler", {
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("received interrupt, shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!("listening for interrupts failed: {e}"),
            }
        }
    });

    let listener = TcpListener::bind(args.http_listen_addr)
        .await
        .with_context(|| format!("binding {}", args.http_listen_addr))?;
    info!("serving http on {}", args.http_listen_addr);
    let router = http::router(HttpState {
        health,
        store,
        registry,
        shutdown: shutdown.clone(),
    });
    axum::serve(listener, router)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await
        .context("serving http")?;

    service.shutdown().await;
    sweeper.wait_and_assert_finished().await;
    info!("shut down");
    Ok(())
}
