// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{config::get_num_cpus, errors::MaxParallelParseError};
use serde::Deserialize;
use std::{cmp::Ordering, fmt, str::FromStr};

/// Type for the max-parallel config key: the number of units that may run at the same time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MaxParallel {
    /// Run at most this many units at a time.
    Count(usize),

    /// Run as many units at a time as there are logical CPUs.
    NumCpus,

    /// Run every unit at once.
    #[default]
    NumUnits,
}

impl MaxParallel {
    /// Gets the actual bound for a run with `unit_count` units.
    ///
    /// The result is always at least 1.
    pub fn compute(self, unit_count: usize) -> usize {
        let n = match self {
            Self::Count(n) => n,
            Self::NumCpus => get_num_cpus(),
            Self::NumUnits => unit_count,
        };
        n.max(1)
    }

    fn from_signed(n: i64) -> Option<Self> {
        match n.cmp(&0) {
            Ordering::Greater => Some(Self::Count(n as usize)),
            Ordering::Less => Some(Self::Count((get_num_cpus() as i64 + n).max(1) as usize)),
            Ordering::Equal => None,
        }
    }
}

impl FromStr for MaxParallel {
    type Err = MaxParallelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "num-cpus" => return Ok(Self::NumCpus),
            "num-units" => return Ok(Self::NumUnits),
            _ => {}
        }

        match s.parse::<i64>() {
            Err(_) => Err(MaxParallelParseError::new(
                s,
                "expected an integer, \"num-cpus\" or \"num-units\"",
            )),
            Ok(n) => Self::from_signed(n)
                .ok_or_else(|| MaxParallelParseError::new(s, "max-parallel may not be 0")),
        }
    }
}

impl fmt::Display for MaxParallel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::NumCpus => write!(f, "num-cpus"),
            Self::NumUnits => write!(f, "num-units"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxParallel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = MaxParallel;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(
                    formatter,
                    "a non-zero integer or the string \"num-cpus\" or \"num-units\""
                )
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v {
                    "num-cpus" => Ok(MaxParallel::NumCpus),
                    "num-units" => Ok(MaxParallel::NumUnits),
                    _ => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &self,
                    )),
                }
            }

            // Note that TOML uses i64, not u64.
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                MaxParallel::from_signed(v).ok_or_else(|| {
                    serde::de::Error::invalid_value(serde::de::Unexpected::Signed(v), &self)
                })
            }
        }

        deserializer.deserialize_any(V)
    }
}
