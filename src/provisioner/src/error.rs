// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Errors returned by the provisioner.

use std::fmt;
use std::time::Duration;

use hearth_cloud_resources::ResourceError;

use crate::rpc::RpcError;
use crate::storage::StorageError;
use crate::store::StoreError;

/// The external system a failed request was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamComponent {
    SqlRpc,
    ObjectStorage,
    Kubernetes,
    ProjectStore,
    TenantDatabase,
    SigningKeys,
}

impl fmt::Display for UpstreamComponent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            UpstreamComponent::SqlRpc => "sql-rpc",
            UpstreamComponent::ObjectStorage => "object storage",
            UpstreamComponent::Kubernetes => "kubernetes",
            UpstreamComponent::ProjectStore => "project store",
            UpstreamComponent::TenantDatabase => "tenant database",
            UpstreamComponent::SigningKeys => "signing keys",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller supplied malformed input.
    #[error("invalid input: {0}")]
    Validation(String),
    /// The caller may not perform the operation.
    #[error("not authorized: {0}")]
    Authorization(String),
    /// A request to an external system failed.
    #[error("{component} error: {source}")]
    Upstream {
        component: UpstreamComponent,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("not found: {0}")]
    NotFound(String),
    /// The object to create already exists.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub fn upstream<E>(component: UpstreamComponent, source: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Upstream {
            component,
            source: source.into(),
        }
    }

    /// Reports whether a Kubernetes request failed because its target does
    /// not exist.
    pub fn is_absent_resource(&self) -> bool {
        match self {
            Error::Upstream {
                component: UpstreamComponent::Kubernetes,
                source,
            } => source
                .downcast_ref::<ResourceError>()
                .is_some_and(ResourceError::is_not_found),
            _ => false,
        }
    }

    /// Returns the component named by an upstream error.
    pub fn upstream_component(&self) -> Option<UpstreamComponent> {
        match self {
            Error::Upstream { component, .. } => Some(*component),
            _ => None,
        }
    }
}

impl From<ResourceError> for Error {
    fn from(e: ResourceError) -> Error {
        if e.is_already_exists() {
            Error::Conflict(e.to_string())
        } else {
            Error::upstream(UpstreamComponent::Kubernetes, e)
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Error {
        Error::upstream(UpstreamComponent::ObjectStorage, e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Error {
        Error::upstream(UpstreamComponent::ProjectStore, e)
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Error {
        match e {
            RpcError::Unauthorized(e) | RpcError::Forbidden(e) => Error::Authorization(e.message),
            RpcError::NotFound(e) => Error::NotFound(e.message),
            RpcError::Conflict(e) => Error::Conflict(e.message),
            e => Error::upstream(UpstreamComponent::SqlRpc, e),
        }
    }
}

/// A failed teardown action.
#[derive(Debug)]
pub struct ActionFailure {
    /// The name of the action, like `delete auth deployment`.
    pub action: &'static str,
    pub error: Error,
}

/// The union of the failures of a teardown.
#[derive(Debug, Default)]
pub struct AggregateError {
    pub failures: Vec<ActionFailure>,
}

impl AggregateError {
    pub fn push(&mut self, action: &'static str, error: Error) {
        self.failures.push(ActionFailure { action, error });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns `Ok(())` if no action failed.
    pub fn into_result(self) -> Result<(), AggregateError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} teardown action(s) failed", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{}: {}", failure.action, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
