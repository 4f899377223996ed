// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Callable handles to service implementations.
use super::{
    error::{Error, Result},
    invocation::{Invocation, RpcResult},
    url::Url,
};
use futures::FutureExt;
use log::{debug, error};
use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc,
    },
};
use tonic::Status;

/// A callable implementation of one interface, located somewhere.
///
/// `invoke` never fails for business-level reasons; those are captured in the
/// exception slot of the returned [RpcResult]. It returns an [Error] only for contract
/// violations, such as invoking a destroyed invoker.
///
/// Dropping the future returned by `invoke` abandons the call.
#[crate::async_trait]
pub trait Invoker: Send + Sync {
    /// Returns the bound interface name.
    fn interface(&self) -> &str;

    /// Returns the url this invoker was created from.
    fn url(&self) -> &Url;

    /// Returns true if this invoker may currently accept calls.
    fn is_available(&self) -> bool;

    /// Irreversibly mark this invoker as unusable. Idempotent.
    fn destroy(&self);

    /// Execute an invocation.
    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult>;
}

/// An invoker that forwards everything to another invoker.
///
/// This is the composition primitive for invokers: it adds nothing observable beyond
/// delegation, so stacking delegates composes predictably.
#[derive(Clone)]
pub struct Delegate {
    inner: Arc<dyn Invoker>,
}

impl Delegate {
    /// Wrap an invoker.
    pub fn new(inner: Arc<dyn Invoker>) -> Self {
        Self { inner }
    }

    /// Returns the wrapped invoker.
    pub fn inner(&self) -> &Arc<dyn Invoker> {
        &self.inner
    }
}

#[crate::async_trait]
impl Invoker for Delegate {
    fn interface(&self) -> &str {
        self.inner.interface()
    }

    fn url(&self) -> &Url {
        self.inner.url()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn destroy(&self) {
        self.inner.destroy()
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
        self.inner.invoke(invocation).await
    }
}

/// Server-side business logic: turns a decoded invocation into a result.
#[crate::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one invocation.
    async fn handle(&self, invocation: &Invocation) -> RpcResult;
}

/// A [RequestHandler] backed by a closure. See [handler_fn].
pub struct FnHandler<F>(F);

/// Create a [RequestHandler] from a closure.
///
/// # Examples
/// ```
/// use brisk::{handler_fn, Invocation, Status};
///
/// let echo = handler_fn(|inv: Invocation| async move {
///     match inv.arguments().first() {
///         Some(arg) => Ok(arg.clone()),
///         None => Err(Status::invalid_argument("nothing to echo")),
///     }
/// });
/// ```
pub fn handler_fn<F, Fut, R>(f: F) -> FnHandler<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Into<RpcResult> + Send,
{
    FnHandler(f)
}

#[crate::async_trait]
impl<F, Fut, R> RequestHandler for FnHandler<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Into<RpcResult> + Send,
{
    async fn handle(&self, invocation: &Invocation) -> RpcResult {
        (self.0)(invocation.clone()).await.into()
    }
}

#[crate::async_trait]
impl<H: RequestHandler + ?Sized> RequestHandler for Arc<H> {
    async fn handle(&self, invocation: &Invocation) -> RpcResult {
        (**self).handle(invocation).await
    }
}

/// The terminal invoker on the provider side: binds a [RequestHandler] to an interface.
///
/// A panicking handler is reported as a [Status::internal] result rather than tearing
/// down the caller.
pub struct ServiceInvoker<H> {
    interface: String,
    url: Url,
    handler: H,
    destroyed: AtomicBool,
}

impl<H: RequestHandler> ServiceInvoker<H> {
    /// Bind `handler` to the interface named by the path of `url`.
    pub fn new(url: Url, handler: H) -> Self {
        Self {
            interface: url.path().to_owned(),
            url,
            handler,
            destroyed: AtomicBool::new(false),
        }
    }
}

#[crate::async_trait]
impl<H: RequestHandler> Invoker for ServiceInvoker<H> {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(SeqCst)
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, SeqCst) {
            debug!("destroyed service invoker for {}", self.url);
        }
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
        if !self.is_available() {
            return Err(Error::InvokerDestroyed {
                interface: self.interface.clone(),
            });
        }

        let call = AssertUnwindSafe(self.handler.handle(invocation)).catch_unwind();

        match call.await {
            Ok(result) => Ok(result),
            Err(_) => {
                error!(
                    "handler for {}.{} panicked",
                    invocation.service(),
                    invocation.method()
                );
                Ok(RpcResult::exception(Status::internal("service handler panicked")))
            }
        }
    }
}
