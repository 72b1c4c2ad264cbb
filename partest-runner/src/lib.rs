// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [partest](https://crates.io/crates/partest): runs test files in
//! parallel, one worker process per file, and merges their results into a single report.
//!
//! The basic flow is:
//!
//! 1. A [`UnitScheduler`](runner::UnitScheduler) runs every registered file through a
//!    [`UnitExecutor`](runner::UnitExecutor), bounded by the configured parallelism and retrying
//!    failed files.
//! 2. A [`ResultAggregator`](aggregator::ResultAggregator) merges each finished file's suite tree
//!    and replays its recorded events as a single ordered stream.
//! 3. A [`Reporter`](reporter::Reporter) renders that stream.

pub mod aggregator;
pub mod artifact;
pub mod config;
pub mod errors;
mod helpers;
pub mod reporter;
pub mod runner;
pub mod suite;
mod time;
