// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Internal utility libraries for the hearth control plane.
//!
//! **ore** (_n_): the raw material from which more valuable materials are
//! extracted. Modules in this crate are not meaningful on their own; they
//! are shared plumbing for the other crates in the workspace.

pub mod cli;
pub mod error;
pub mod metrics;
pub mod task;
pub mod tracing;
