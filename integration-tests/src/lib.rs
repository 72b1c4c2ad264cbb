// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers shared by partest's integration tests and test helper binaries.

pub mod partest_cli;
pub mod scenario;
