// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The unit scheduler.
//!
//! The main structure in this module is [`UnitScheduler`].

mod executor;
mod imp;
mod result;
mod retry;
#[cfg(test)]
pub(crate) mod test_helpers;

pub use executor::*;
pub use imp::*;
pub use result::*;
pub use retry::*;
