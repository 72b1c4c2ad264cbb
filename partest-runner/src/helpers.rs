// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "file" if `count` is 1, otherwise "files".
    pub fn files_str(count: usize) -> &'static str {
        if count == 1 { "file" } else { "files" }
    }

    /// Returns "failure" if `count` is 1, otherwise "failures".
    pub fn failures_str(count: usize) -> &'static str {
        if count == 1 { "failure" } else { "failures" }
    }
}

/// Formats a duration the way test reporters usually do: `12ms`, or `1.2s` above a second.
pub(crate) fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}
