// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Ordered interceptors around an [Invoker].
//!
//! # Chains
//! [build_invoker_chain] wraps a terminal invoker in a list of filters, such that the
//! first filter is outermost: it observes the invocation first and the result last.
//! Each filter is applied as a [tower_layer::Layer], from the tail of the list backward.
//!
//! # Activation
//! [activate] picks the filters that apply to one side of a call, from every filter
//! known to an extension loader. A filter is picked if its [Scope] includes the role,
//! and it is either auto-activated or named in the `filter` url parameter. Names
//! prefixed with `-` in that parameter are excluded, and `-default` excludes every
//! auto-activated filter. Picked filters are stably sorted by [FilterSpec::order].
//!
//! | name             | scope    | order  | auto |
//! |------------------|----------|--------|------|
//! | `exception`      | provider | -10000 | yes  |
//! | `cost`           | both     | -9000  | yes  |
//! | `timeout`        | consumer | -8000  | yes  |
//! | `ratelimit`      | provider | -7000  | no   |
//! | `circuitbreaker` | consumer | -6000  | no   |
mod circuitbreaker;
mod cost;
mod exception;
mod ratelimit;
mod timeout;

pub use circuitbreaker::{CircuitBreakerConfig, CircuitBreakerFilter};
pub use cost::CostFilter;
pub use exception::ExceptionFilter;
pub use ratelimit::{RateLimitConfig, RateLimitFilter};
pub use timeout::TimeoutFilter;

use super::{
    error::Result,
    extension::{ExtensionLoader, ExtensionPoint},
    invocation::{Invocation, RpcResult},
    invoker::Invoker,
    url::{keys, Url},
};
use log::debug;
use std::sync::Arc;
use tower_layer::Layer;

/// The side of a call a filter runs on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The referring side.
    Consumer,
    /// The exporting side.
    Provider,
    /// Either side.
    Both,
}

impl Scope {
    /// Returns true if a filter with this scope runs in `role`.
    pub fn includes(self, role: Scope) -> bool {
        self == Scope::Both || self == role
    }
}

/// Static metadata describing a [Filter].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FilterSpec {
    /// A name for diagnostics.
    pub name: &'static str,

    /// Lower orders run earlier (further out).
    pub order: i32,

    /// Which side(s) of a call this filter runs on.
    pub scope: Scope,

    /// Whether this filter is active without being named in the `filter` url parameter.
    pub auto: bool,
}

impl FilterSpec {
    /// Returns a spec for a filter that is not auto-activated.
    pub const fn new(name: &'static str, order: i32, scope: Scope) -> Self {
        Self {
            name,
            order,
            scope,
            auto: false,
        }
    }

    /// Mark the filter as auto-activated.
    pub const fn auto(mut self) -> Self {
        self.auto = true;
        self
    }
}

/// An interceptor around an invocation.
///
/// A filter may short-circuit by returning without calling `next`.
#[crate::async_trait]
pub trait Filter: Send + Sync {
    /// Returns the metadata of this filter.
    fn spec(&self) -> FilterSpec;

    /// Intercept `invocation` on its way to `next`.
    async fn invoke(&self, next: &dyn Invoker, invocation: &Invocation) -> Result<RpcResult>;
}

impl ExtensionPoint for dyn Filter {
    const NAME: &'static str = "brisk.Filter";
    const DEFAULT: &'static str = "";
}

/// A [Layer] that places one [Filter] in front of an invoker.
#[derive(Clone)]
pub struct FilterLayer {
    filter: Arc<dyn Filter>,
}

impl FilterLayer {
    /// Create a layer for `filter`.
    pub fn new(filter: Arc<dyn Filter>) -> Self {
        Self { filter }
    }
}

impl Layer<Arc<dyn Invoker>> for FilterLayer {
    type Service = FilterInvoker;

    fn layer(&self, next: Arc<dyn Invoker>) -> FilterInvoker {
        FilterInvoker {
            filter: Arc::clone(&self.filter),
            next,
        }
    }
}

/// An invoker that routes invocations through a [Filter] before `next`.
pub struct FilterInvoker {
    filter: Arc<dyn Filter>,
    next: Arc<dyn Invoker>,
}

#[crate::async_trait]
impl Invoker for FilterInvoker {
    fn interface(&self) -> &str {
        self.next.interface()
    }

    fn url(&self) -> &Url {
        self.next.url()
    }

    fn is_available(&self) -> bool {
        self.next.is_available()
    }

    fn destroy(&self) {
        self.next.destroy()
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
        self.filter.invoke(&*self.next, invocation).await
    }
}

/// Wrap `invoker` in `filters`, such that `filters[0]` is outermost.
///
/// An empty filter list returns `invoker` itself.
pub fn build_invoker_chain(
    invoker: Arc<dyn Invoker>,
    filters: &[Arc<dyn Filter>],
) -> Arc<dyn Invoker> {
    (filters.iter().rev()).fold(invoker, |next, filter| {
        Arc::new(FilterLayer::new(Arc::clone(filter)).layer(next)) as Arc<dyn Invoker>
    })
}

/// Returns the filters that apply to `role` for a service configured by `url`, in the
/// order they should be chained.
///
/// Fails if the `filter` url parameter names a filter that does not exist.
pub fn activate(
    loader: &ExtensionLoader<dyn Filter>,
    role: Scope,
    url: &Url,
) -> Result<Vec<Arc<dyn Filter>>> {
    let (listed, excluded) = parse_filter_param(url.param(keys::FILTER));
    let no_defaults = excluded.contains(&"default");

    for name in listed.iter().filter(|n| **n != "default") {
        if !loader.has_extension(name)? {
            bail_config!("unknown filter {:?} in {}", name, url);
        }
    }

    let mut picked = Vec::new();

    for name in loader.supported_extensions()? {
        if excluded.contains(&name.as_str()) {
            continue;
        }

        let filter = loader.extension(&name)?;
        let spec = filter.spec();

        if !spec.scope.includes(role) {
            continue;
        }

        if (spec.auto && !no_defaults) || listed.contains(&name.as_str()) {
            picked.push((spec.order, filter));
        }
    }

    picked.sort_by_key(|(order, _)| *order);

    debug!(
        "activated {} {:?} filters for {}",
        picked.len(),
        role,
        url.service_key()
    );

    Ok(picked.into_iter().map(|(_, f)| f).collect())
}

/// Splits `a,-b, c` into (`[a, c]`, `[b]`).
fn parse_filter_param(param: Option<&str>) -> (Vec<&str>, Vec<&str>) {
    let mut listed = Vec::new();
    let mut excluded = Vec::new();

    for name in param.unwrap_or("").split(',').map(str::trim) {
        match name.strip_prefix('-') {
            Some(name) if !name.is_empty() => excluded.push(name),
            Some(_) => {}
            None if !name.is_empty() => listed.push(name),
            None => {}
        }
    }

    (listed, excluded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        extension::ExtensionRegistry,
        invocation::Value,
        invoker::{handler_fn, ServiceInvoker},
    };
    use parking_lot::Mutex;
    use quickcheck_macros::quickcheck;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Tracer {
        name: &'static str,
        order: i32,
        scope: Scope,
        auto: bool,
        log: Log,
    }

    #[crate::async_trait]
    impl Filter for Tracer {
        fn spec(&self) -> FilterSpec {
            let spec = FilterSpec::new(self.name, self.order, self.scope);
            if self.auto {
                spec.auto()
            } else {
                spec
            }
        }

        async fn invoke(&self, next: &dyn Invoker, inv: &Invocation) -> Result<RpcResult> {
            self.log.lock().push(format!("{}>", self.name));
            let r = next.invoke(inv).await;
            self.log.lock().push(format!("<{}", self.name));
            r
        }
    }

    fn tracer(name: &'static str, log: &Log) -> Arc<dyn Filter> {
        Arc::new(Tracer {
            name,
            order: 0,
            scope: Scope::Both,
            auto: true,
            log: Arc::clone(log),
        })
    }

    fn terminal(log: &Log) -> Arc<dyn Invoker> {
        let log = Arc::clone(log);
        let url = Url::new("local", "localhost", 0, "demo.Echo");

        Arc::new(ServiceInvoker::new(
            url,
            handler_fn(move |inv: Invocation| {
                log.lock().push("call".to_owned());
                async move { RpcResult::value(inv.arguments()[0].clone()) }
            }),
        ))
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        let log = Log::default();
        let invoker = terminal(&log);
        let chain = build_invoker_chain(Arc::clone(&invoker), &[]);

        assert!(Arc::ptr_eq(&invoker, &chain));

        let inv = Invocation::builder("demo.Echo", "echo")
            .arg(Value::new(3u8))
            .build();
        let r = chain.invoke(&inv).await.unwrap();
        assert!(r.get_value().unwrap().ptr_eq(&inv.arguments()[0]));
    }

    #[tokio::test]
    async fn first_filter_is_outermost() {
        let log = Log::default();
        let chain = build_invoker_chain(terminal(&log), &[tracer("a", &log), tracer("b", &log)]);

        let inv = Invocation::builder("demo.Echo", "echo")
            .arg(Value::new(3u8))
            .build();
        chain.invoke(&inv).await.unwrap();

        assert_eq!(vec!["a>", "b>", "call", "<b", "<a"], *log.lock());
        assert_eq!("demo.Echo", chain.interface());
    }

    #[quickcheck_async::tokio]
    async fn chains_nest_in_list_order(n: u8) {
        const NAMES: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];

        let log = Log::default();
        let names = &NAMES[..n as usize % (NAMES.len() + 1)];
        let filters: Vec<_> = names.iter().map(|&name| tracer(name, &log)).collect();
        let chain = build_invoker_chain(terminal(&log), &filters);

        let inv = Invocation::builder("demo.Echo", "echo")
            .arg(Value::new(0u8))
            .build();
        chain.invoke(&inv).await.unwrap();

        let mut expect: Vec<_> = names.iter().map(|n| format!("{}>", n)).collect();
        expect.push("call".to_owned());
        expect.extend(names.iter().rev().map(|n| format!("<{}", n)));

        assert_eq!(expect, *log.lock());
    }

    #[quickcheck]
    fn filter_param_splits_exclusions(names: Vec<u8>) -> bool {
        let param: Vec<_> = (names.iter())
            .map(|n| if n % 2 == 0 { format!("f{}", n) } else { format!("-f{}", n) })
            .collect();
        let param = param.join(",");

        let (listed, excluded) = parse_filter_param(Some(&param));

        listed.len() + excluded.len() == names.len()
            && listed.iter().all(|n| !n.starts_with('-'))
            && excluded.iter().all(|n| n.starts_with('f'))
    }

    fn make(
        name: &'static str,
        order: i32,
        scope: Scope,
        auto: bool,
        log: &Log,
    ) -> impl Fn(&ExtensionRegistry) -> Result<Arc<dyn Filter>> + Send + Sync + 'static {
        let log = Arc::clone(log);

        move |_: &ExtensionRegistry| {
            let log = Arc::clone(&log);
            let filter: Arc<dyn Filter> = Arc::new(Tracer { name, order, scope, auto, log });
            Ok(filter)
        }
    }

    fn registry(log: &Log) -> Arc<ExtensionRegistry> {
        ExtensionRegistry::builder()
            .implementation::<dyn Filter, _>("t::Late", make("late", 10, Scope::Both, true, log))
            .implementation::<dyn Filter, _>("t::Early", make("early", -10, Scope::Both, true, log))
            .implementation::<dyn Filter, _>("t::Tie", make("tie", 10, Scope::Consumer, true, log))
            .implementation::<dyn Filter, _>("t::Prov", make("prov", 0, Scope::Provider, true, log))
            .implementation::<dyn Filter, _>("t::Opt", make("opt", 5, Scope::Both, false, log))
            .manifest::<dyn Filter>(
                "late=t::Late\nearly=t::Early\ntie=t::Tie\nprov=t::Prov\nopt=t::Opt",
            )
            .build()
    }

    fn names(filters: &[Arc<dyn Filter>]) -> Vec<&'static str> {
        filters.iter().map(|f| f.spec().name).collect()
    }

    #[test]
    fn activation_filters_by_scope_and_sorts_stably() {
        let log = Log::default();
        let r = registry(&log);
        let loader = r.loader::<dyn Filter>().unwrap();
        let url = Url::new("local", "h", 0, "s");

        let consumer = activate(&loader, Scope::Consumer, &url).unwrap();
        assert_eq!(vec!["early", "late", "tie"], names(&consumer));

        let provider = activate(&loader, Scope::Provider, &url).unwrap();
        assert_eq!(vec!["early", "prov", "late"], names(&provider));
    }

    #[test]
    fn activation_honors_filter_param() {
        let log = Log::default();
        let r = registry(&log);
        let loader = r.loader::<dyn Filter>().unwrap();

        let url = Url::new("local", "h", 0, "s").with_param(keys::FILTER, "opt,-late");
        let picked = activate(&loader, Scope::Consumer, &url).unwrap();
        assert_eq!(vec!["early", "opt", "tie"], names(&picked));

        let url = url.with_param(keys::FILTER, "-default,opt");
        let picked = activate(&loader, Scope::Consumer, &url).unwrap();
        assert_eq!(vec!["opt"], names(&picked));

        let url = url.with_param(keys::FILTER, "nope");
        assert!(activate(&loader, Scope::Consumer, &url).is_err());
    }
}
