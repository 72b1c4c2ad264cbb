// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Shared data types for [partest](https://crates.io/crates/partest) and the worker programs it
//! spawns.
//!
//! partest runs every test file in its own worker process. Workers talk to the runner through a
//! line-oriented protocol on standard output (see [`WorkerMessage`]), and receive their
//! configuration through environment variables (see [`WorkerEnv`]).
//!
//! The types in this crate are intentionally kept free of runner internals so that worker
//! programs written in Rust can depend on this crate alone.

mod errors;
mod exit_codes;
mod graph;
mod options;
mod protocol;

pub use errors::*;
pub use exit_codes::*;
pub use graph::*;
pub use options::*;
pub use protocol::*;
