// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Service discovery.
//!
//! A [Registry] tracks the provider urls of each service key. A [RegistryDirectory]
//! subscribes to one service key, and turns every change notification into a single
//! atomic swap of its candidate list.
use super::directory::{Directory, Snapshot, SwapDirectory};
use crate::{
    error::Result,
    extension::ExtensionPoint,
    invocation::Invocation,
    invoker::Invoker,
    protocol::{refer_key, Protocol},
    url::Url,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// Receives the complete provider list of a service whenever it changes.
pub trait NotifyListener: Send + Sync {
    /// Called with every provider url currently registered for the subscribed key.
    fn notify(&self, urls: &[Url]);
}

/// A service registry.
///
/// No registry backend ships with this crate; see [ExtensionRegistry][crate::ExtensionRegistry]
/// for registering one.
pub trait Registry: Send + Sync {
    /// Register a provider url under its service key.
    fn register(&self, url: &Url) -> Result<()>;

    /// Remove a provider url.
    fn unregister(&self, url: &Url) -> Result<()>;

    /// Returns the provider urls registered under `service_key`.
    fn lookup(&self, service_key: &str) -> Result<Vec<Url>>;

    /// Notify `listener` of every change to the providers of `service_key`.
    fn subscribe(&self, service_key: &str, listener: Arc<dyn NotifyListener>) -> Result<()>;
}

impl ExtensionPoint for dyn Registry {
    const NAME: &'static str = "brisk.Registry";
    const DEFAULT: &'static str = "";
}

/// A directory kept up to date by registry notifications.
///
/// Provider urls are referred through a [Protocol], with the consumer url's parameters
/// layered on top. Invokers for urls that survive a notification are reused, and
/// invokers for urls that disappear are destroyed.
pub struct RegistryDirectory {
    inner: SwapDirectory,
    protocol: Arc<dyn Protocol>,
    referred: Mutex<HashMap<Url, Arc<dyn Invoker>>>,
}

impl RegistryDirectory {
    /// Create an empty directory for `interface`, referred with the consumer `url`.
    pub fn new<S: Into<String>>(interface: S, url: Url, protocol: Arc<dyn Protocol>) -> Self {
        Self {
            inner: SwapDirectory::new(interface, url, Vec::new()),
            protocol,
            referred: Mutex::default(),
        }
    }

    /// Returns the service key this directory subscribes to.
    pub fn service_key(&self) -> String {
        refer_key(self.inner.interface(), self.inner.url())
    }

    /// Populate this directory from `registry`, and subscribe to later changes.
    pub fn subscribe(self: &Arc<Self>, registry: &dyn Registry) -> Result<()> {
        let key = self.service_key();

        self.notify(&registry.lookup(&key)?);
        registry.subscribe(&key, Arc::clone(self) as Arc<dyn NotifyListener>)?;

        info!("subscribed to {}", key);
        Ok(())
    }

    /// Returns the current candidate list, including unavailable invokers.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshot()
    }

    fn refer(&self, provider: &Url) -> Option<Arc<dyn Invoker>> {
        let url = provider.clone().with_params_of(self.inner.url());

        match self.protocol.refer(self.inner.interface(), &url) {
            Ok(invoker) => Some(invoker),
            Err(e) => {
                warn!("failed to refer {}: {}", provider, e);
                None
            }
        }
    }
}

impl NotifyListener for RegistryDirectory {
    fn notify(&self, urls: &[Url]) {
        let mut referred = self.referred.lock();

        if !self.inner.is_available() {
            return;
        }

        let mut next = HashMap::with_capacity(urls.len());
        let mut invokers = Vec::with_capacity(urls.len());

        for url in urls {
            if next.contains_key(url) {
                continue;
            }

            let invoker = match referred.remove(url) {
                Some(invoker) => invoker,
                None => match self.refer(url) {
                    Some(invoker) => invoker,
                    None => continue,
                },
            };

            invokers.push(Arc::clone(&invoker));
            next.insert(url.clone(), invoker);
        }

        self.inner.refresh(invokers);

        for (url, stale) in referred.drain() {
            debug!("destroying invoker for removed provider {}", url);
            stale.destroy();
        }

        *referred = next;
    }
}

impl Directory for RegistryDirectory {
    fn interface(&self) -> &str {
        self.inner.interface()
    }

    fn url(&self) -> &Url {
        self.inner.url()
    }

    fn list(&self, invocation: &Invocation) -> Result<Vec<Arc<dyn Invoker>>> {
        self.inner.list(invocation)
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn destroy(&self) {
        let mut referred = self.referred.lock();
        self.inner.destroy();
        referred.clear();
    }
}
