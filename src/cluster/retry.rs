// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! When, and how soon, to try again.
use crate::{
    error::Error,
    url::{keys, Url},
};
use std::time::Duration;

/// Decides whether a failed attempt is retried, and how long to wait first.
///
/// Implementations must not keep per-call state; one policy is shared by every call
/// through a cluster invoker.
pub trait RetryPolicy: Send + Sync {
    /// Returns true if another attempt should follow `attempts` failed attempts, the
    /// last of which failed with `last`.
    fn should_retry(&self, attempts: usize, last: &Error) -> bool;

    /// Returns how long to wait before the attempt following `attempts` failed ones.
    fn interval(&self, attempts: usize) -> Duration;
}

/// A bounded number of retries, with delays doubling from `base` up to `max`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Retries after the first attempt. Defaults to 2.
    pub max_retries: usize,

    /// The delay before the first retry. Defaults to 10ms.
    pub base: Duration,

    /// The delay ceiling. Defaults to 1 second.
    pub max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl ExponentialBackoff {
    /// Returns the default policy.
    pub const fn new() -> Self {
        Self {
            max_retries: 2,
            base: Duration::from_millis(10),
            max: Duration::from_secs(1),
        }
    }

    /// Read `retries`, `retry.interval` and `retry.max.interval` from `url`, falling
    /// back to defaults for missing values.
    pub fn from_url(url: &Url) -> Self {
        let d = Self::new();

        Self {
            max_retries: url.parse_param(keys::RETRIES).unwrap_or(d.max_retries),
            base: url.millis_param(keys::RETRY_INTERVAL).unwrap_or(d.base),
            max: url.millis_param(keys::RETRY_MAX_INTERVAL).unwrap_or(d.max),
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, attempts: usize, last: &Error) -> bool {
        last.is_retryable() && attempts <= self.max_retries
    }

    fn interval(&self, attempts: usize) -> Duration {
        let shift = attempts.saturating_sub(1).min(31) as u32;
        self.base.saturating_mul(1 << shift).min(self.max)
    }
}
