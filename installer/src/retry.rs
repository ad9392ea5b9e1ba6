// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded, fixed-interval retries.

use installer_common::RetryPolicy;
use std::future::Future;

/// Information about the attempt being made, passed to the retried operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u64,
    /// Retries left after this attempt if it fails.
    pub remaining: u32,
}

impl Attempt {
    pub fn is_last(&self) -> bool {
        self.remaining == 0
    }
}

/// Run `op` until it succeeds or `policy` is exhausted.
///
/// `op` runs at least once. After a failure, if retries remain, this sleeps
/// for the policy interval (not at all if the interval is zero) and tries
/// again. The error of the final attempt is returned once retries run out.
/// Attempts never overlap.
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let interval = policy.interval();
    let mut remaining = policy.max_retries;
    let mut number = 1;
    loop {
        match op(Attempt { number, remaining }).await {
            Ok(value) => return Ok(value),
            Err(error) if remaining == 0 => return Err(error),
            Err(_) => {
                remaining -= 1;
                number += 1;
                if !interval.is_zero() {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
}
