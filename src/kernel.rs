// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Bootstrapping services and references.
//!
//! A [Kernel] ties the extension points together: services described by a
//! [ServiceConfig] are exported through the protocol named by their url scheme, and
//! references described by a [ReferenceConfig] are resolved into a [Directory], joined
//! through a [Cluster] and handed out as a [Proxy].
//!
//! ```
//! use brisk::{handler_fn, ExtensionRegistry, Invocation, Kernel, ReferenceConfig, ServiceConfig};
//! use brisk::{Status, Value};
//!
//! #[tokio::main]
//! async fn main() -> brisk::Result<()> {
//!     let kernel = Kernel::new(ExtensionRegistry::with_builtins())?;
//!
//!     let hello = handler_fn(|inv: Invocation| async move {
//!         match inv.arguments().first().and_then(|v| v.downcast_ref::<String>()) {
//!             Some(name) => Ok(Value::new(format!("hello, {}", name))),
//!             None => Err(Status::invalid_argument("missing name")),
//!         }
//!     });
//!
//!     let _exporter = kernel.export(&ServiceConfig::new("demo.Greeter"), hello)?;
//!
//!     let greeter = kernel.refer(&ReferenceConfig::new("demo.Greeter"))?;
//!     let reply = greeter.call("greet", vec![Value::new(String::from("world"))]).await?;
//!
//!     assert_eq!(
//!         Some("hello, world"),
//!         reply.as_ref().and_then(|v| v.downcast_ref::<String>()).map(String::as_str),
//!     );
//!
//!     kernel.destroy();
//!     Ok(())
//! }
//! ```
use super::{
    cluster::{
        directory::{Directory, StaticDirectory},
        registry::{Registry, RegistryDirectory},
        Cluster,
    },
    error::Result,
    extension::{AdaptiveExtension, ExtensionRegistry},
    invoker::{Invoker, RequestHandler, ServiceInvoker},
    protocol::{AdaptiveProtocol, Exporter, Protocol},
    proxy::Proxy,
    url::{keys, Url},
};
use log::{info, warn};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};

/// Describes a service to export.
///
/// Defaults to the `local` protocol at `localhost:0`.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    url: Url,
}

impl ServiceConfig {
    /// Describe a service implementing `interface`.
    pub fn new<S: Into<String>>(interface: S) -> Self {
        Self {
            url: Url::new("local", "localhost", 0, interface),
        }
    }

    /// Export through the protocol named `protocol`.
    pub fn protocol<P: Into<String>>(mut self, protocol: P) -> Self {
        self.url = self.url.with_protocol(protocol);
        self
    }

    /// Listen at `host:port`.
    pub fn address<H: Into<String>>(mut self, host: H, port: u16) -> Self {
        let url = Url::new(self.url.protocol(), host, port, self.url.path());
        self.url = url.with_params_of(&self.url);
        self
    }

    /// Set the service group.
    pub fn group<G: ToString>(self, group: G) -> Self {
        self.param(keys::GROUP, group)
    }

    /// Set the service version.
    pub fn version<V: ToString>(self, version: V) -> Self {
        self.param(keys::VERSION, version)
    }

    /// Set an arbitrary url parameter.
    pub fn param<K: Into<String>, V: ToString>(mut self, key: K, val: V) -> Self {
        self.url = self.url.with_param(key, val);
        self
    }

    /// Returns the provider url this config describes.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Describes a reference to a service.
///
/// Without direct urls, providers are discovered through the kernel's [Registry] if it
/// has one, and referred at the reference url itself otherwise.
#[derive(Clone, Debug)]
pub struct ReferenceConfig {
    url: Url,
    direct: Vec<Url>,
}

impl ReferenceConfig {
    /// Describe a reference to `interface`.
    pub fn new<S: Into<String>>(interface: S) -> Self {
        Self {
            url: Url::new("local", "localhost", 0, interface),
            direct: Vec::new(),
        }
    }

    /// Refer through the protocol named `protocol`.
    pub fn protocol<P: Into<String>>(mut self, protocol: P) -> Self {
        self.url = self.url.with_protocol(protocol);
        self
    }

    /// Refer to the provider at `host:port`.
    pub fn address<H: Into<String>>(mut self, host: H, port: u16) -> Self {
        let url = Url::new(self.url.protocol(), host, port, self.url.path());
        self.url = url.with_params_of(&self.url);
        self
    }

    /// Connect directly to the provider at `url`, bypassing discovery. May be called
    /// more than once.
    pub fn direct(mut self, url: Url) -> Self {
        self.direct.push(url);
        self
    }

    /// Set the service group.
    pub fn group<G: ToString>(self, group: G) -> Self {
        self.param(keys::GROUP, group)
    }

    /// Set the service version.
    pub fn version<V: ToString>(self, version: V) -> Self {
        self.param(keys::VERSION, version)
    }

    /// Join providers with the cluster strategy named `cluster`.
    pub fn cluster<C: ToString>(self, cluster: C) -> Self {
        self.param(keys::CLUSTER, cluster)
    }

    /// Pick providers with the selector named `selector`.
    pub fn selector<S: ToString>(self, selector: S) -> Self {
        self.param(keys::SELECTOR, selector)
    }

    /// Set the number of retries after a failed attempt.
    pub fn retries(self, retries: usize) -> Self {
        self.param(keys::RETRIES, retries)
    }

    /// Bound each call to a provider by `timeout`.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.param(keys::TIMEOUT, timeout.as_millis())
    }

    /// Set an arbitrary url parameter.
    pub fn param<K: Into<String>, V: ToString>(mut self, key: K, val: V) -> Self {
        self.url = self.url.with_param(key, val);
        self
    }

    /// Returns the consumer url this config describes.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the direct provider urls.
    pub fn direct_urls(&self) -> &[Url] {
        &self.direct
    }
}

/// Exports services and refers to them, through the extensions of one registry.
pub struct Kernel {
    extensions: Arc<ExtensionRegistry>,
    protocol: AdaptiveProtocol,
    clusters: AdaptiveExtension<dyn Cluster>,
    registry: Option<Arc<dyn Registry>>,
    registered: Mutex<Vec<Url>>,
    joined: Mutex<Vec<Arc<dyn Invoker>>>,
}

impl Kernel {
    /// Create a kernel over `extensions`, without service discovery.
    pub fn new(extensions: Arc<ExtensionRegistry>) -> Result<Self> {
        Ok(Self {
            protocol: AdaptiveProtocol::new(&extensions)?,
            clusters: extensions.adaptive::<dyn Cluster>(keys::CLUSTER)?,
            extensions,
            registry: None,
            registered: Mutex::default(),
            joined: Mutex::default(),
        })
    }

    /// Register exported services in `registry`, and discover providers through it.
    pub fn with_registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Returns the extension registry this kernel resolves extensions from.
    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    /// Export `handler` as the service described by `cfg`.
    ///
    /// The returned exporter also withdraws the service from the registry when
    /// unexported.
    pub fn export<H: RequestHandler>(
        &self,
        cfg: &ServiceConfig,
        handler: H,
    ) -> Result<Box<dyn Exporter>> {
        let url = cfg.url().clone();
        let exporter = (self.protocol).export(Arc::new(ServiceInvoker::new(url.clone(), handler)))?;

        let registry = match &self.registry {
            Some(registry) => Arc::clone(registry),
            None => return Ok(exporter),
        };

        if let Err(e) = registry.register(&url) {
            exporter.unexport();
            return Err(e);
        }

        info!("registered {}", url);
        self.registered.lock().push(url.clone());

        Ok(Box::new(RegisteredExporter {
            inner: exporter,
            registry,
            url,
        }))
    }

    /// Refer to the service described by `cfg`.
    pub fn refer(&self, cfg: &ReferenceConfig) -> Result<Proxy> {
        let url = cfg.url();
        let interface = url.path();

        let directory: Arc<dyn Directory> = if !cfg.direct_urls().is_empty() {
            let invokers = (cfg.direct_urls().iter())
                .map(|direct| {
                    let direct = direct.clone().with_path(interface).with_params_of(url);
                    self.protocol.refer(interface, &direct)
                })
                .collect::<Result<Vec<_>>>()?;

            Arc::new(StaticDirectory::new(interface, url.clone(), invokers))
        } else if let Some(registry) = &self.registry {
            let protocol: Arc<dyn Protocol> = Arc::new(self.protocol.clone());
            let directory = Arc::new(RegistryDirectory::new(interface, url.clone(), protocol));
            directory.subscribe(&**registry)?;
            directory
        } else {
            let invoker = self.protocol.refer(interface, url)?;
            Arc::new(StaticDirectory::new(interface, url.clone(), vec![invoker]))
        };

        let invoker = self.clusters.resolve(url)?.join(directory)?;
        self.joined.lock().push(Arc::clone(&invoker));

        Ok(Proxy::new(invoker))
    }

    /// Destroy every reference handed out, unregister every exported service, and
    /// destroy every protocol in use.
    pub fn destroy(&self) {
        for invoker in self.joined.lock().drain(..) {
            invoker.destroy();
        }

        if let Some(registry) = &self.registry {
            for url in self.registered.lock().drain(..) {
                if let Err(e) = registry.unregister(&url) {
                    warn!("failed to unregister {}: {}", url, e);
                }
            }
        }

        self.protocol.destroy();
    }
}

struct RegisteredExporter {
    inner: Box<dyn Exporter>,
    registry: Arc<dyn Registry>,
    url: Url,
}

impl Exporter for RegisteredExporter {
    fn invoker(&self) -> &Arc<dyn Invoker> {
        self.inner.invoker()
    }

    fn unexport(&self) {
        if let Err(e) = self.registry.unregister(&self.url) {
            warn!("failed to unregister {}: {}", self.url, e);
        }

        self.inner.unexport();
    }
}
