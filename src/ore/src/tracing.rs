// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Tracing utilities.
//!
//! The key export is the **[`configure`]** function, which installs a
//! `tracing` subscriber with sensible defaults and should be called during
//! initialization of every hearth binary.

use std::io::{self, IsTerminal};

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// The filter used when none is configured.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Application tracing configuration.
///
/// See the [`configure`] function for details.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// The name of the service, recorded as a prefix on every log line.
    pub service_name: &'static str,
    /// A filter directive, in [`EnvFilter`] syntax, which determines which
    /// events are emitted to the log.
    pub filter: String,
    /// Whether to emit JSON-formatted log lines instead of human-readable
    /// ones.
    pub json: bool,
}

/// Command line arguments for application tracing.
#[derive(Debug, Clone, clap::Parser)]
pub struct TracingCliArgs {
    /// Which tracing events to log to stderr.
    ///
    /// Accepts the `RUST_LOG` directive syntax, for example
    /// `info,hearth_provisioner=debug`.
    #[clap(
        long,
        env = "LOG_FILTER",
        value_name = "FILTER",
        default_value = DEFAULT_LOG_FILTER
    )]
    pub log_filter: String,
    /// Emit log lines as JSON objects.
    #[clap(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl TracingCliArgs {
    /// Converts the command line arguments into a [`TracingConfig`].
    pub fn to_config(&self, service_name: &'static str) -> TracingConfig {
        TracingConfig {
            service_name,
            filter: self.log_filter.clone(),
            json: self.log_json,
        }
    }
}

/// Configures application tracing.
///
/// Installs a global subscriber that writes to stderr. Returns an error if
/// the filter directive cannot be parsed or if a global subscriber was
/// already installed.
pub fn configure(config: TracingConfig) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_new(&config.filter)?;
    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(io::stderr().is_terminal())
                    .with_writer(io::stderr),
            )
            .try_init()?;
    }
    tracing::info!(service = config.service_name, "tracing configured");
    Ok(())
}
