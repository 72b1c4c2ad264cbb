// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs test files in parallel, one isolated worker process per file, and merges the results
//! into a single report.
//!
//! This crate contains the command-line interface. The scheduling, aggregation and reporting
//! logic lives in [`partest_runner`].

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{Color, OutputContext, StderrStyles};
