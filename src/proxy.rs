// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! The consumer-facing end of a reference.
use super::{
    error::{Error, Result},
    invocation::{Invocation, Value},
    invoker::Invoker,
};
use std::sync::Arc;

/// Builds invocations against one referred invoker, and unwraps their results.
///
/// Typed stubs are written on top of a proxy:
///
/// ```
/// use brisk::{Proxy, Result, Value};
///
/// struct Greeter(Proxy);
///
/// impl Greeter {
///     async fn greet(&self, name: &str) -> Result<String> {
///         let reply = self.0.call("greet", vec![Value::new(name.to_owned())]).await?;
///
///         Ok(reply
///             .and_then(|v| v.downcast_ref::<String>().cloned())
///             .unwrap_or_default())
///     }
/// }
/// ```
#[derive(Clone)]
pub struct Proxy {
    invoker: Arc<dyn Invoker>,
}

impl Proxy {
    /// Create a proxy that calls through `invoker`.
    pub fn new(invoker: Arc<dyn Invoker>) -> Self {
        Self { invoker }
    }

    /// Returns the invoker behind this proxy.
    pub fn invoker(&self) -> &Arc<dyn Invoker> {
        &self.invoker
    }

    /// Call `method` with `args`.
    ///
    /// A failure carried by the result is returned as [Error::Remote].
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>> {
        let mut builder = Invocation::builder(self.invoker.interface(), method);

        for arg in args {
            builder = builder.arg(arg);
        }

        self.invoke(builder.build()).await
    }

    /// Send a prepared invocation.
    ///
    /// A failure carried by the result is returned as [Error::Remote].
    pub async fn invoke(&self, invocation: Invocation) -> Result<Option<Value>> {
        (self.invoker.invoke(&invocation).await?)
            .into_result()
            .map_err(Error::Remote)
    }
}
