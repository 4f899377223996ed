// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Fault tolerance over a dynamic set of candidate invokers.
//!
//! A [Cluster] joins a [Directory] into one [Invoker]. Every attempt re-lists the
//! directory and re-selects from scratch, so a refresh between retries is observed by
//! the next attempt. A recently failed candidate may be selected again.
//!
//! | strategy   | on failure                                                      |
//! |------------|-----------------------------------------------------------------|
//! | `failfast` | returns the first result as is                                  |
//! | `failover` | retries per a [RetryPolicy], then fails with [Error::ClusterExhausted] |
//! | `failsafe` | swallows the failure, returning an empty result                 |
//! | `adaptive` | dispatches per call by the `cluster` invocation attachment      |
//!
//! # Failsafe
//! A failsafe cluster reports success for calls that failed. Only use it for
//! best-effort calls whose outcome the caller does not depend on. Calls through a destroyed
//! or misconfigured failsafe cluster still fail.
pub mod directory;
pub mod registry;
pub mod retry;
pub mod select;

use directory::Directory;
use retry::{ExponentialBackoff, RetryPolicy};
use select::Selector;

use super::{
    error::{Error, Result},
    extension::{AdaptiveExtension, ExtensionLoader, ExtensionPoint, ExtensionRegistry},
    invocation::{copy_status, Invocation, RpcResult},
    invoker::Invoker,
    url::{keys, Url},
};
use log::{debug, warn};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

/// Joins a [Directory] into one fault-tolerant [Invoker].
pub trait Cluster: Send + Sync {
    /// Returns an invoker that routes every call to candidates of `directory`.
    fn join(&self, directory: Arc<dyn Directory>) -> Result<Arc<dyn Invoker>>;
}

impl ExtensionPoint for dyn Cluster {
    const NAME: &'static str = "brisk.Cluster";
    const DEFAULT: &'static str = "failover";
}

/// A directory paired with a selector.
struct Joined {
    directory: Arc<dyn Directory>,
    selector: Arc<dyn Selector>,
}

impl Joined {
    fn select(&self, invocation: &Invocation) -> Result<Arc<dyn Invoker>> {
        let invokers = self.directory.list(invocation)?;
        self.selector.select(&invokers, invocation)
    }
}

macro_rules! delegate_to_directory {
    () => {
        fn interface(&self) -> &str {
            self.joined.directory.interface()
        }

        fn url(&self) -> &Url {
            self.joined.directory.url()
        }

        fn is_available(&self) -> bool {
            self.joined.directory.is_available()
        }

        fn destroy(&self) {
            self.joined.directory.destroy()
        }
    };
}

/// Invokes one selected candidate, and returns its result as is.
pub struct FailfastInvoker {
    joined: Joined,
}

impl FailfastInvoker {
    /// Join `directory` with `selector`.
    pub fn new(directory: Arc<dyn Directory>, selector: Arc<dyn Selector>) -> Self {
        Self {
            joined: Joined {
                directory,
                selector,
            },
        }
    }
}

#[crate::async_trait]
impl Invoker for FailfastInvoker {
    delegate_to_directory!();

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
        self.joined.select(invocation)?.invoke(invocation).await
    }
}

/// Retries failed calls on freshly selected candidates, as a [RetryPolicy] allows.
pub struct FailoverInvoker {
    joined: Joined,
    policy: Arc<dyn RetryPolicy>,
}

impl FailoverInvoker {
    /// Join `directory` with `selector`, retrying per `policy`.
    pub fn new(
        directory: Arc<dyn Directory>,
        selector: Arc<dyn Selector>,
        policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        Self {
            joined: Joined {
                directory,
                selector,
            },
            policy,
        }
    }

    /// Make one attempt, sorting its outcome into success, a failure worth retrying,
    /// or a failure to report as is.
    async fn attempt(
        &self,
        invocation: &Invocation,
    ) -> Result<std::result::Result<RpcResult, Error>> {
        let invoker = match self.joined.select(invocation) {
            Ok(invoker) => invoker,
            Err(e) if e.is_retryable() => return Ok(Err(e)),
            Err(e) => return Err(e),
        };

        match invoker.invoke(invocation).await {
            Ok(r) => {
                if let Some(status) = r.get_exception() {
                    Ok(Err(Error::Remote(copy_status(status))))
                } else {
                    Ok(Ok(r))
                }
            }
            Err(e) if e.is_retryable() => Ok(Err(e)),
            Err(e) => Err(e),
        }
    }
}

#[crate::async_trait]
impl Invoker for FailoverInvoker {
    delegate_to_directory!();

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
        if !self.is_available() {
            return Err(Error::InvokerDestroyed {
                interface: self.interface().to_owned(),
            });
        }

        let mut attempts = 0;

        loop {
            attempts += 1;

            let failure = match self.attempt(invocation).await? {
                Ok(r) => return Ok(r),
                Err(e) => e,
            };

            if !self.policy.should_retry(attempts, &failure) {
                return Err(Error::ClusterExhausted {
                    attempts,
                    last: Box::new(failure),
                });
            }

            let wait = self.policy.interval(attempts);

            if let Some(left) = invocation.remaining() {
                if left <= wait {
                    debug!("not retrying {}: deadline too close", invocation.service());
                    return Err(Error::DeadlineExceeded);
                }
            }

            warn!(
                "attempt {} of {}.{} failed, retrying in {:?}: {}",
                attempts,
                invocation.service(),
                invocation.method(),
                wait,
                failure
            );

            tokio::time::sleep(wait).await;
        }
    }
}

/// Swallows business failures and empty candidate lists, returning an empty result in
/// their place. Destroyed invokers and configuration errors are still reported.
pub struct FailsafeInvoker {
    joined: Joined,
}

impl FailsafeInvoker {
    /// Join `directory` with `selector`.
    pub fn new(directory: Arc<dyn Directory>, selector: Arc<dyn Selector>) -> Self {
        Self {
            joined: Joined {
                directory,
                selector,
            },
        }
    }
}

#[crate::async_trait]
impl Invoker for FailsafeInvoker {
    delegate_to_directory!();

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
        if !self.is_available() {
            return Err(Error::InvokerDestroyed {
                interface: self.interface().to_owned(),
            });
        }

        let result = match self.joined.select(invocation) {
            Ok(invoker) => invoker.invoke(invocation).await,
            Err(e) => Err(e),
        };

        let failure = match result {
            Ok(r) => match r.get_exception() {
                Some(status) => status.to_string(),
                None => return Ok(r),
            },
            Err(e @ Error::NoAvailableInvoker { .. }) | Err(e @ Error::ServiceNotFound { .. }) => {
                e.to_string()
            }
            Err(e) => return Err(e),
        };

        warn!(
            "ignoring failed {}.{}: {}",
            invocation.service(),
            invocation.method(),
            failure
        );

        Ok(RpcResult::empty())
    }
}

/// Resolves the selector named by the `selector` url parameter of a directory.
struct Selectors(AdaptiveExtension<dyn Selector>);

impl Selectors {
    fn new(registry: &ExtensionRegistry) -> Result<Self> {
        registry.adaptive::<dyn Selector>(keys::SELECTOR).map(Self)
    }

    fn resolve(&self, directory: &dyn Directory) -> Result<Arc<dyn Selector>> {
        self.0.resolve(directory.url())
    }
}

/// Joins directories into [FailfastInvoker]s.
pub struct FailfastCluster {
    selectors: Selectors,
}

impl FailfastCluster {
    /// The identifier this cluster is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::cluster::FailfastCluster";

    /// Create a cluster resolving selectors through `registry`.
    pub fn new(registry: &ExtensionRegistry) -> Result<Self> {
        Ok(Self {
            selectors: Selectors::new(registry)?,
        })
    }
}

impl Cluster for FailfastCluster {
    fn join(&self, directory: Arc<dyn Directory>) -> Result<Arc<dyn Invoker>> {
        let selector = self.selectors.resolve(&*directory)?;
        Ok(Arc::new(FailfastInvoker::new(directory, selector)))
    }
}

/// Joins directories into [FailoverInvoker]s.
///
/// Unless constructed with a fixed policy, each joined invoker retries per an
/// [ExponentialBackoff] read from the directory url.
pub struct FailoverCluster {
    selectors: Selectors,
    policy: Option<Arc<dyn RetryPolicy>>,
}

impl FailoverCluster {
    /// The identifier this cluster is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::cluster::FailoverCluster";

    /// Create a cluster resolving selectors through `registry`.
    pub fn new(registry: &ExtensionRegistry) -> Result<Self> {
        Ok(Self {
            selectors: Selectors::new(registry)?,
            policy: None,
        })
    }

    /// Use `policy` for every joined invoker.
    pub fn with_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl Cluster for FailoverCluster {
    fn join(&self, directory: Arc<dyn Directory>) -> Result<Arc<dyn Invoker>> {
        let selector = self.selectors.resolve(&*directory)?;
        let policy = match &self.policy {
            Some(policy) => Arc::clone(policy),
            None => Arc::new(ExponentialBackoff::from_url(directory.url())),
        };

        Ok(Arc::new(FailoverInvoker::new(directory, selector, policy)))
    }
}

/// Joins directories into [FailsafeInvoker]s.
pub struct FailsafeCluster {
    selectors: Selectors,
}

impl FailsafeCluster {
    /// The identifier this cluster is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::cluster::FailsafeCluster";

    /// Create a cluster resolving selectors through `registry`.
    pub fn new(registry: &ExtensionRegistry) -> Result<Self> {
        Ok(Self {
            selectors: Selectors::new(registry)?,
        })
    }
}

impl Cluster for FailsafeCluster {
    fn join(&self, directory: Arc<dyn Directory>) -> Result<Arc<dyn Invoker>> {
        let selector = self.selectors.resolve(&*directory)?;
        Ok(Arc::new(FailsafeInvoker::new(directory, selector)))
    }
}

/// Joins directories into invokers that pick a strategy per call.
pub struct AdaptiveCluster {
    clusters: Arc<ExtensionLoader<dyn Cluster>>,
}

impl AdaptiveCluster {
    /// The identifier this cluster is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::cluster::AdaptiveCluster";

    /// The extension name of this cluster.
    pub const NAME: &'static str = "adaptive";

    /// Create a cluster resolving strategies through `registry`.
    pub fn new(registry: &ExtensionRegistry) -> Result<Self> {
        Ok(Self {
            clusters: registry.loader::<dyn Cluster>()?,
        })
    }
}

impl Cluster for AdaptiveCluster {
    fn join(&self, directory: Arc<dyn Directory>) -> Result<Arc<dyn Invoker>> {
        Ok(Arc::new(AdaptiveInvoker {
            directory,
            clusters: Arc::clone(&self.clusters),
            joined: RwLock::default(),
        }))
    }
}

/// Dispatches each call to the strategy named by its `cluster` attachment, or to
/// failover if there is none.
///
/// Naming an unknown strategy fails the call with [Error::Configuration].
pub struct AdaptiveInvoker {
    directory: Arc<dyn Directory>,
    clusters: Arc<ExtensionLoader<dyn Cluster>>,
    joined: RwLock<HashMap<String, Arc<dyn Invoker>>>,
}

impl AdaptiveInvoker {
    fn strategy(&self, name: &str) -> Result<Arc<dyn Invoker>> {
        if let Some(invoker) = self.joined.read().get(name) {
            return Ok(Arc::clone(invoker));
        }

        if name == AdaptiveCluster::NAME {
            bail_config!("cluster strategy {:?} cannot dispatch to itself", name);
        }

        let invoker = self.clusters.extension(name)?.join(Arc::clone(&self.directory))?;

        let mut joined = self.joined.write();
        Ok(Arc::clone(joined.entry(name.to_owned()).or_insert(invoker)))
    }
}

#[crate::async_trait]
impl Invoker for AdaptiveInvoker {
    fn interface(&self) -> &str {
        self.directory.interface()
    }

    fn url(&self) -> &Url {
        self.directory.url()
    }

    fn is_available(&self) -> bool {
        self.directory.is_available()
    }

    fn destroy(&self) {
        self.directory.destroy()
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
        if !self.is_available() {
            return Err(Error::InvokerDestroyed {
                interface: self.interface().to_owned(),
            });
        }

        let name = (invocation.attachment(keys::CLUSTER))
            .filter(|n| !n.is_empty())
            .unwrap_or(<dyn Cluster as ExtensionPoint>::DEFAULT);

        self.strategy(name)?.invoke(invocation).await
    }
}
