// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Compensating rollback for multi-step operations.
//!
//! A [`Saga`] collects one compensating action per completed step. If a later
//! step fails, [`Saga::rollback`] runs the collected actions in the reverse
//! order of their registration. Compensation failures are logged and
//! counted, but never replace the error that caused the rollback.

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use hearth_ore::error::ErrorExt;
use tracing::{debug, warn};

use crate::error::Error;

type Compensation = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Error>> + Send>;

pub struct Saga {
    name: &'static str,
    compensations: Vec<(&'static str, Compensation)>,
}

impl std::fmt::Debug for Saga {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Saga")
            .field("name", &self.name)
            .field(
                "compensations",
                &self.compensations.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// The outcome of a rollback.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Rollback {
    /// The compensations that ran successfully, in execution order.
    pub succeeded: Vec<&'static str>,
    /// The compensations that failed, in execution order.
    pub failed: Vec<&'static str>,
}

impl Saga {
    pub fn new(name: &'static str) -> Saga {
        Saga {
            name,
            compensations: vec![],
        }
    }

    /// Registers the action that undoes the step that just completed.
    pub fn push<F, Fut>(&mut self, action: &'static str, compensation: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        debug!(saga = self.name, action, "registered compensation");
        self.compensations
            .push((action, Box::new(move || compensation().boxed())));
    }

    pub fn len(&self) -> usize {
        self.compensations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compensations.is_empty()
    }

    /// Discards the compensations of a saga that completed.
    pub fn commit(self) {
        debug!(
            saga = self.name,
            steps = self.compensations.len(),
            "saga committed"
        );
    }

    /// Runs every registered compensation, most recent first. Each runs
    /// exactly once, regardless of whether earlier ones failed.
    pub async fn rollback(self) -> Rollback {
        let mut outcome = Rollback::default();
        for (action, compensation) in self.compensations.into_iter().rev() {
            match compensation().await {
                Ok(()) => {
                    debug!(saga = self.name, action, "compensation succeeded");
                    outcome.succeeded.push(action);
                }
                Err(e) => {
                    warn!(
                        saga = self.name,
                        action,
                        "compensation failed: {}",
                        e.display_with_causes()
                    );
                    outcome.failed.push(action);
                }
            }
        }
        outcome
    }
}
