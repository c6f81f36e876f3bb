// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Tokio task utilities.
//!
//! Every task spawned through this module carries a name, which is recorded
//! on a tracing span wrapping the task's future. Anonymous detached tasks are
//! hard to attribute in logs, so prefer these helpers over
//! [`tokio::spawn`].

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::Instrument;

/// Spawns a named task onto the current runtime.
///
/// The name is computed lazily so that callers can build it with `format!`
/// without paying for it on hot paths that never spawn.
#[track_caller]
pub fn spawn<Fut, Name, NameClosure>(name: NameClosure, future: Fut) -> JoinHandle<Fut::Output>
where
    Name: AsRef<str>,
    NameClosure: FnOnce() -> Name,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let name = name();
    let span = tracing::debug_span!("task", name = name.as_ref());
    tokio::spawn(future.instrument(span))
}

/// Runs a named blocking closure on the runtime's blocking thread pool.
#[track_caller]
pub fn spawn_blocking<Function, Output, Name, NameClosure>(
    name: NameClosure,
    function: Function,
) -> JoinHandle<Output>
where
    Name: AsRef<str>,
    NameClosure: FnOnce() -> Name,
    Function: FnOnce() -> Output + Send + 'static,
    Output: Send + 'static,
{
    let name = name();
    let span = tracing::debug_span!("blocking task", name = name.as_ref());
    tokio::task::spawn_blocking(move || span.in_scope(function))
}

/// Extension methods for [`JoinHandle`].
pub trait JoinHandleExt<T> {
    /// Waits for the task to finish, resuming a panic from the task if it
    /// panicked.
    ///
    /// Returns `None` if the task was cancelled.
    fn wait_and_assert_finished(self) -> impl Future<Output = Option<T>> + Send;
}

impl<T: Send + 'static> JoinHandleExt<T> for JoinHandle<T> {
    async fn wait_and_assert_finished(self) -> Option<T> {
        match self.await {
            Ok(value) => Some(value),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => None,
        }
    }
}
