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
use log::{info, warn};
use parking_lot::Mutex;
use std::{collections::HashMap, time::Duration};
use tokio::time::Instant;
use tonic::{Code, Status};

/// Specifies when a [CircuitBreakerFilter] opens, and for how long.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    ///
    /// Must be non-zero. Defaults to 5.
    pub failures: u32,

    /// How long an open circuit rejects calls before letting a probe through.
    ///
    /// Defaults to 10 seconds.
    pub open: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfig {
    /// Returns the default configuration.
    pub const fn new() -> Self {
        Self {
            failures: 5,
            open: Duration::from_secs(10),
        }
    }

    /// Read `circuit.failures` and `circuit.open` from `url`, falling back to defaults
    /// for missing values.
    pub fn from_url(url: &Url) -> Self {
        let d = Self::new();

        Self {
            failures: (url.parse_param::<u32>(keys::CIRCUIT_FAILURES))
                .filter(|n| *n > 0)
                .unwrap_or(d.failures),
            open: url.millis_param(keys::CIRCUIT_OPEN).unwrap_or(d.open),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { since: Instant },
}

struct Circuit {
    cfg: CircuitBreakerConfig,
    state: State,
}

impl Circuit {
    fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: State::Closed { failures: 0 },
        }
    }

    /// Returns true if a call may proceed.
    fn admit(&mut self, now: Instant) -> bool {
        match self.state {
            State::Closed { .. } => true,
            State::Open { until } if now < until => false,
            // a probe whose caller gave up never reports back
            State::HalfOpen { since } if now < since + self.cfg.open => false,
            State::Open { .. } | State::HalfOpen { .. } => {
                self.state = State::HalfOpen { since: now };
                true
            }
        }
    }

    /// Record the outcome of an admitted call. Returns the new state if it changed.
    fn record(&mut self, failed: bool, now: Instant) -> Option<State> {
        let next = match (self.state, failed) {
            (State::Closed { failures: 0 }, false) => return None,
            (_, false) => State::Closed { failures: 0 },

            (State::Closed { failures }, true) if failures + 1 < self.cfg.failures => {
                self.state = State::Closed {
                    failures: failures + 1,
                };
                return None;
            }

            (State::Open { .. }, true) => return None,
            (_, true) => State::Open {
                until: now + self.cfg.open,
            },
        };

        self.state = next;
        Some(next)
    }
}

/// Stops calling an endpoint that keeps failing.
///
/// After [failures](CircuitBreakerConfig::failures) consecutive failed calls to one
/// service at one endpoint, the circuit opens and calls are answered with
/// [Status::unavailable] without being attempted. Once the open period has passed, a
/// single probe call is let through: success closes the circuit, failure reopens it.
///
/// Contract violations, and results failed with `Unavailable`, `DeadlineExceeded`,
/// `Internal`, `Unknown` or `ResourceExhausted`, count as failures.
#[derive(Default)]
pub struct CircuitBreakerFilter {
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl CircuitBreakerFilter {
    /// The identifier this filter is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::filter::CircuitBreakerFilter";

    /// Create a filter with every circuit closed.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(url: &Url) -> String {
        format!("{}@{}", url.service_key(), url.address())
    }

    fn admit(&self, url: &Url) -> bool {
        let mut circuits = self.circuits.lock();

        (circuits.entry(Self::key(url)))
            .or_insert_with(|| Circuit::new(CircuitBreakerConfig::from_url(url)))
            .admit(Instant::now())
    }

    fn record(&self, url: &Url, failed: bool) {
        let key = Self::key(url);
        let mut circuits = self.circuits.lock();

        let changed = match circuits.get_mut(&key) {
            Some(c) => c.record(failed, Instant::now()),
            None => None,
        };

        match changed {
            Some(State::Open { .. }) => warn!("circuit opened for {}", key),
            Some(State::Closed { .. }) => info!("circuit closed for {}", key),
            _ => {}
        }
    }
}

fn is_failure(result: &Result<RpcResult>) -> bool {
    match result {
        Err(_) => true,
        Ok(r) => matches!(
            r.get_exception().map(Status::code),
            Some(Code::Unavailable)
                | Some(Code::DeadlineExceeded)
                | Some(Code::Internal)
                | Some(Code::Unknown)
                | Some(Code::ResourceExhausted)
        ),
    }
}

#[crate::async_trait]
impl Filter for CircuitBreakerFilter {
    fn spec(&self) -> FilterSpec {
        FilterSpec::new("circuitbreaker", -6000, Scope::Consumer)
    }

    async fn invoke(&self, next: &dyn Invoker, inv: &Invocation) -> Result<RpcResult> {
        let url = next.url();

        if !self.admit(url) {
            return Ok(RpcResult::exception(Status::unavailable(format!(
                "circuit open for {} at {}",
                inv.service(),
                url.address()
            ))));
        }

        let result = next.invoke(inv).await;
        self.record(url, is_failure(&result));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::{handler_fn, ServiceInvoker};
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst},
        Arc,
    };

    #[test]
    fn opens_after_consecutive_failures() {
        let cfg = CircuitBreakerConfig {
            failures: 3,
            open: Duration::from_millis(100),
        };
        let t0 = Instant::now();
        let mut c = Circuit::new(cfg);

        assert!(c.admit(t0));
        assert_eq!(None, c.record(true, t0));
        assert_eq!(None, c.record(true, t0));
        // success resets the count
        assert_eq!(Some(State::Closed { failures: 0 }), c.record(false, t0));

        for _ in 0..2 {
            c.record(true, t0);
        }
        assert!(matches!(c.record(true, t0), Some(State::Open { .. })));
        assert!(!c.admit(t0 + Duration::from_millis(50)));

        // one probe at a time
        let t1 = t0 + Duration::from_millis(100);
        assert!(c.admit(t1));
        assert!(!c.admit(t1));

        assert!(matches!(c.record(true, t1), Some(State::Open { .. })));

        let t2 = t1 + Duration::from_millis(100);
        assert!(c.admit(t2));
        assert_eq!(Some(State::Closed { failures: 0 }), c.record(false, t2));
        assert!(c.admit(t2));
    }

    #[tokio::test]
    async fn open_circuits_short_circuit() {
        let healthy = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));

        let url = Url::new("local", "h", 0, "demo.Flaky")
            .with_param(keys::CIRCUIT_FAILURES, 2)
            .with_param(keys::CIRCUIT_OPEN, 60_000);

        let (h, c) = (Arc::clone(&healthy), Arc::clone(&calls));
        let svc = ServiceInvoker::new(
            url,
            handler_fn(move |_: Invocation| {
                c.fetch_add(1, SeqCst);
                let ok = h.load(SeqCst);
                async move {
                    match ok {
                        true => RpcResult::empty(),
                        false => RpcResult::exception(Status::unavailable("down")),
                    }
                }
            }),
        );

        let inv = Invocation::builder("demo.Flaky", "poke").build();
        let filter = CircuitBreakerFilter::new();

        for _ in 0..2 {
            assert!(filter.invoke(&svc, &inv).await.unwrap().has_exception());
        }
        assert_eq!(2, calls.load(SeqCst));

        healthy.store(true, SeqCst);

        let r = filter.invoke(&svc, &inv).await.unwrap();
        assert_eq!(Code::Unavailable, r.get_exception().unwrap().code());
        assert_eq!(2, calls.load(SeqCst));
    }
}
