// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tracing::debug;

/// Creates a Kubernetes client and returns it along with the default
/// namespace of its configuration.
///
/// The in-cluster configuration is preferred. Outside of a cluster the local
/// kubeconfig is read using the named `context`.
pub async fn create_client(context: String) -> Result<(Client, String), anyhow::Error> {
    let config = match Config::incluster() {
        Ok(config) => config,
        Err(e) => {
            debug!("not running in a cluster ({e}), using kubeconfig context {context:?}");
            let options = KubeConfigOptions {
                context: Some(context),
                ..Default::default()
            };
            Config::from_kubeconfig(&options).await?
        }
    };
    let namespace = config.default_namespace.clone();
    let client = Client::try_from(config)?;
    Ok((client, namespace))
}
