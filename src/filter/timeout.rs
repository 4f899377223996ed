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
    url::keys,
};
use log::warn;
use std::time::Duration;
use tonic::Status;

/// Bounds consumer-side calls by a deadline.
///
/// Invocations without a deadline get one from the `timeout` url parameter of the
/// invoker, if set. A call still pending at its deadline is abandoned, and reported as
/// [Status::deadline_exceeded].
#[derive(Copy, Clone, Debug, Default)]
pub struct TimeoutFilter;

impl TimeoutFilter {
    /// The identifier this filter is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::filter::TimeoutFilter";
}

fn expired(inv: &Invocation) -> RpcResult {
    warn!("{}.{} timed out", inv.service(), inv.method());
    RpcResult::exception(Status::deadline_exceeded(format!(
        "{}.{} timed out",
        inv.service(),
        inv.method()
    )))
}

#[crate::async_trait]
impl Filter for TimeoutFilter {
    fn spec(&self) -> FilterSpec {
        FilterSpec::new("timeout", -8000, Scope::Consumer).auto()
    }

    async fn invoke(&self, next: &dyn Invoker, inv: &Invocation) -> Result<RpcResult> {
        let bounded;

        let inv = match (inv.deadline(), next.url().millis_param(keys::TIMEOUT)) {
            (None, Some(timeout)) => {
                bounded = inv.with_timeout(timeout);
                &bounded
            }
            _ => inv,
        };

        let left = match inv.remaining() {
            Some(left) => left,
            None => return next.invoke(inv).await,
        };

        if left == Duration::ZERO {
            return Ok(expired(inv));
        }

        match tokio::time::timeout(left, next.invoke(inv)).await {
            Ok(result) => result,
            Err(_) => Ok(expired(inv)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        invoker::{handler_fn, ServiceInvoker},
        url::Url,
    };
    use tonic::Code;

    fn sleepy(url: Url) -> ServiceInvoker<impl crate::invoker::RequestHandler> {
        ServiceInvoker::new(
            url,
            handler_fn(|_: Invocation| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                RpcResult::empty()
            }),
        )
    }

    #[tokio::test]
    async fn url_timeout_bounds_calls() {
        let url = Url::new("local", "h", 0, "demo.Slow").with_param(keys::TIMEOUT, 20);
        let inv = Invocation::builder("demo.Slow", "nap").build();

        let r = TimeoutFilter.invoke(&sleepy(url), &inv).await.unwrap();
        assert_eq!(Code::DeadlineExceeded, r.get_exception().unwrap().code());
    }

    #[tokio::test]
    async fn elapsed_deadlines_short_circuit() {
        let url = Url::new("local", "h", 0, "demo.Slow");
        let inv = Invocation::builder("demo.Slow", "nap")
            .timeout(Duration::ZERO)
            .build();

        let r = TimeoutFilter.invoke(&sleepy(url), &inv).await.unwrap();
        assert_eq!(Code::DeadlineExceeded, r.get_exception().unwrap().code());
    }
}
