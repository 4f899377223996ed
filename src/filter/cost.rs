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
};
use log::debug;
use tokio::time::Instant;
use tracing::{debug_span, Instrument};

/// Records the wall-clock duration of every call, inside a `tracing` span.
#[derive(Copy, Clone, Debug, Default)]
pub struct CostFilter;

impl CostFilter {
    /// The identifier this filter is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::filter::CostFilter";
}

#[crate::async_trait]
impl Filter for CostFilter {
    fn spec(&self) -> FilterSpec {
        FilterSpec::new("cost", -9000, Scope::Both).auto()
    }

    async fn invoke(&self, next: &dyn Invoker, inv: &Invocation) -> Result<RpcResult> {
        let span = debug_span!(
            "invoke",
            service = inv.service(),
            method = inv.method(),
            addr = %next.url().address(),
        );

        let start = Instant::now();
        let result = next.invoke(inv).instrument(span).await;

        debug!(
            "{}.{} took {:?}",
            inv.service(),
            inv.method(),
            start.elapsed()
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        invocation::Value,
        invoker::{handler_fn, ServiceInvoker},
        url::Url,
    };
    use tonic::{Code, Status};

    #[tokio::test]
    async fn results_pass_through_unchanged() {
        let url = Url::new("local", "h", 0, "demo.Stub");
        let svc = ServiceInvoker::new(
            url,
            handler_fn(|inv: Invocation| async move {
                match inv.method() {
                    "ok" => RpcResult::value(Value::new(7u32)),
                    _ => RpcResult::exception(Status::aborted("no")),
                }
            }),
        );

        let ok = Invocation::builder("demo.Stub", "ok").build();
        let r = CostFilter.invoke(&svc, &ok).await.unwrap();
        assert_eq!(Some(&7u32), r.get_value().and_then(|v| v.downcast_ref::<u32>()));

        let bad = Invocation::builder("demo.Stub", "bad").build();
        let r = CostFilter.invoke(&svc, &bad).await.unwrap();
        assert_eq!(Code::Aborted, r.get_exception().unwrap().code());

        svc.destroy();
        assert!(matches!(
            CostFilter.invoke(&svc, &ok).await,
            Err(Error::InvokerDestroyed { .. })
        ));
    }
}
