// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report aggregated results in various formats.

mod displayer;
pub mod events;
mod imp;
mod json;

pub use imp::*;
