// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A fixed-interval retry policy.
///
/// `max_retries` does not count the first attempt: a policy with
/// `max_retries: 3` runs an always-failing operation four times. There is no
/// jitter or backoff, so the operator sees a predictable countdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Seconds to sleep between attempts; zero retries immediately.
    pub interval_secs: u64,
}

impl RetryPolicy {
    /// Fetching the node configuration during install, while the network may
    /// still be coming up.
    pub const REMOTE_CONFIG: RetryPolicy =
        RetryPolicy { max_retries: 30, interval_secs: 10 };

    /// Reaching the ping server right after the network was configured.
    pub const PING_SERVER: RetryPolicy =
        RetryPolicy { max_retries: 3, interval_secs: 2 };

    /// Run once, never retry.
    pub const NONE: RetryPolicy = RetryPolicy { max_retries: 0, interval_secs: 0 };

    pub const fn new(max_retries: u32, interval_secs: u64) -> Self {
        Self { max_retries, interval_secs }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// The total number of times an always-failing operation is invoked.
    pub fn max_attempts(&self) -> u64 {
        u64::from(self.max_retries) + 1
    }
}
