// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
use super::{Filter, FilterSpec, Scope};
use crate::{
    error::Result,
    invocation::{Invocation, RpcResult},
    invoker::Invoker,
    url::{keys, Url},
};
use log::debug;
use parking_lot::Mutex;
use std::{collections::HashMap, time::Duration};
use tokio::time::Instant;
use tonic::Status;

/// Specifies the token bucket of a [RateLimitFilter].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Calls admitted per interval.
    ///
    /// Defaults to 100.
    pub permits: u32,

    /// The refill interval. The bucket is refilled to `permits` at most once per
    /// interval.
    ///
    /// Defaults to 1 second.
    pub interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitConfig {
    /// Returns the default configuration.
    pub const fn new() -> Self {
        Self {
            permits: 100,
            interval: Duration::from_secs(1),
        }
    }

    /// Read `ratelimit.permits` and `ratelimit.interval` from `url`, falling back to
    /// defaults for missing values.
    pub fn from_url(url: &Url) -> Self {
        let d = Self::new();

        Self {
            permits: url.parse_param(keys::RATELIMIT_PERMITS).unwrap_or(d.permits),
            interval: url.millis_param(keys::RATELIMIT_INTERVAL).unwrap_or(d.interval),
        }
    }
}

struct Bucket {
    cfg: RateLimitConfig,
    tokens: u32,
    refilled: Instant,
}

impl Bucket {
    fn new(cfg: RateLimitConfig, now: Instant) -> Self {
        Self {
            cfg,
            tokens: cfg.permits,
            refilled: now,
        }
    }

    fn acquire(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.refilled) >= self.cfg.interval {
            self.tokens = self.cfg.permits;
            self.refilled = now;
        }

        if self.tokens == 0 {
            return false;
        }

        self.tokens -= 1;
        true
    }
}

/// Admits a bounded number of provider-side calls per interval, per service key.
///
/// Denied calls are answered with [Status::resource_exhausted] without reaching the
/// service.
#[derive(Default)]
pub struct RateLimitFilter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimitFilter {
    /// The identifier this filter is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::filter::RateLimitFilter";

    /// Create a filter with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    fn admit(&self, url: &Url) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        (buckets.entry(url.service_key()))
            .or_insert_with(|| Bucket::new(RateLimitConfig::from_url(url), now))
            .acquire(now)
    }
}

#[crate::async_trait]
impl Filter for RateLimitFilter {
    fn spec(&self) -> FilterSpec {
        FilterSpec::new("ratelimit", -7000, Scope::Provider)
    }

    async fn invoke(&self, next: &dyn Invoker, inv: &Invocation) -> Result<RpcResult> {
        if !self.admit(next.url()) {
            debug!("rate limited {}.{}", inv.service(), inv.method());

            return Ok(RpcResult::exception(Status::resource_exhausted(format!(
                "rate limit exceeded for {}",
                next.url().service_key()
            ))));
        }

        next.invoke(inv).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::{handler_fn, ServiceInvoker};
    use tonic::Code;

    #[test]
    fn bucket_refills_once_per_interval() {
        let cfg = RateLimitConfig {
            permits: 2,
            interval: Duration::from_millis(100),
        };
        let t0 = Instant::now();
        let mut b = Bucket::new(cfg, t0);

        assert!(b.acquire(t0));
        assert!(b.acquire(t0));
        assert!(!b.acquire(t0 + Duration::from_millis(50)));
        assert!(b.acquire(t0 + Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn denied_calls_never_reach_the_service() {
        let url = Url::new("local", "h", 0, "demo.Busy")
            .with_param(keys::RATELIMIT_PERMITS, 1)
            .with_param(keys::RATELIMIT_INTERVAL, 60_000);
        let svc =
            ServiceInvoker::new(url, handler_fn(|_: Invocation| async { RpcResult::empty() }));
        let inv = Invocation::builder("demo.Busy", "work").build();
        let filter = RateLimitFilter::new();

        assert!(!filter.invoke(&svc, &inv).await.unwrap().has_exception());

        let r = filter.invoke(&svc, &inv).await.unwrap();
        assert_eq!(Code::ResourceExhausted, r.get_exception().unwrap().code());
    }
}
