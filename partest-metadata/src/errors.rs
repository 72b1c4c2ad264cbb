// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt};

/// An error that occurs while a worker reads its environment.
///
/// Returned by [`WorkerEnv::from_env`](crate::WorkerEnv::from_env).
#[derive(Debug)]
pub enum WorkerEnvError {
    /// A required environment variable was not set, or was not valid Unicode.
    Missing {
        /// The name of the variable.
        name: &'static str,
    },

    /// An environment variable could not be parsed as an integer.
    InvalidInteger {
        /// The name of the variable.
        name: &'static str,

        /// The value that was found.
        value: String,
    },

    /// The thread options could not be deserialized.
    ThreadOptions(serde_json::Error),
}

impl fmt::Display for WorkerEnvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Missing { name } => {
                write!(f, "environment variable `{name}` is not set")
            }
            Self::InvalidInteger { name, value } => {
                write!(
                    f,
                    "environment variable `{name}` is not a valid integer: `{value}`"
                )
            }
            Self::ThreadOptions(_) => {
                write!(f, "failed to parse thread options")
            }
        }
    }
}

impl error::Error for WorkerEnvError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Missing { .. } | Self::InvalidInteger { .. } => None,
            Self::ThreadOptions(err) => Some(err),
        }
    }
}
