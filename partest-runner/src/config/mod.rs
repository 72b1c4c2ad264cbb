// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for partest.
//!
//! Configuration is layered: the defaults embedded in partest come first, followed by
//! `.config/partest.toml` (or the file passed in explicitly). Most settings live in
//! [profiles](PartestProfile).

mod imp;
mod max_parallel;

pub use imp::*;
pub use max_parallel::*;
