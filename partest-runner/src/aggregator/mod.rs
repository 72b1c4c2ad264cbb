// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merging unit results into a single report.
//!
//! The main structure in this module is [`ResultAggregator`].

mod imp;
mod retried;
mod stats;

pub use imp::*;
pub use retried::*;
pub use stats::*;
