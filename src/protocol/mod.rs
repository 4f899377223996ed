// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Publishing invokers and resolving references to them.
//!
//! A [Protocol] exports invokers under a service key (`group/interface:version`) and
//! refers to exported services by interface and [Url]. Re-exporting a service key that
//! is already exported replaces the earlier exporter; unexporting the replaced exporter
//! afterwards leaves the replacement in place.
mod frame;
mod local;
mod remote;
mod wrapper;

pub use local::LocalProtocol;
pub use remote::RemoteProtocol;
pub use wrapper::{FilterWrapper, LoggingWrapper};

use super::{
    error::Result,
    extension::{ExtensionLoader, ExtensionPoint, ExtensionRegistry},
    invoker::Invoker,
    url::{self, keys, Url},
};
use log::{debug, warn};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering::SeqCst},
        Arc,
    },
};

/// Publishes and resolves services.
pub trait Protocol: Send + Sync {
    /// Publish `invoker` under the service key derived from its interface and url.
    fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Box<dyn Exporter>>;

    /// Resolve a reference to `interface` at `url`.
    fn refer(&self, interface: &str, url: &Url) -> Result<Arc<dyn Invoker>>;

    /// Unexport everything this protocol exported, and destroy every invoker it
    /// referred.
    fn destroy(&self);
}

impl ExtensionPoint for dyn Protocol {
    const NAME: &'static str = "brisk.Protocol";
    const DEFAULT: &'static str = "local";
}

/// A handle on one published invoker.
pub trait Exporter: Send + Sync {
    /// Returns the published invoker.
    fn invoker(&self) -> &Arc<dyn Invoker>;

    /// Reverse the publication. Idempotent.
    fn unexport(&self);
}

/// Returns the service key an exported invoker is published under.
pub fn export_key(invoker: &dyn Invoker) -> String {
    refer_key(invoker.interface(), invoker.url())
}

/// Returns the service key a reference to `interface` at `url` resolves.
pub fn refer_key(interface: &str, url: &Url) -> String {
    url::service_key(url.param(keys::GROUP), interface, url.param(keys::VERSION))
}

struct Published {
    generation: u64,
    invoker: Arc<dyn Invoker>,
}

/// Service key → exported invoker, shared between a protocol and its exporters.
#[derive(Clone, Default)]
pub(crate) struct ExporterMap {
    inner: Arc<MapInner>,
}

#[derive(Default)]
struct MapInner {
    generation: AtomicU64,
    map: RwLock<HashMap<String, Published>>,
}

impl ExporterMap {
    /// Publish `invoker` under `key`, replacing whatever was published there.
    pub(crate) fn publish(&self, key: String, invoker: Arc<dyn Invoker>) -> MapExporter {
        let generation = self.inner.generation.fetch_add(1, SeqCst);
        let published = Published {
            generation,
            invoker: Arc::clone(&invoker),
        };

        if self.inner.map.write().insert(key.clone(), published).is_some() {
            warn!("replaced exported service {}", key);
        } else {
            debug!("exported service {}", key);
        }

        MapExporter {
            map: self.clone(),
            key,
            generation,
            invoker,
            unexported: AtomicBool::new(false),
        }
    }

    /// Returns the invoker published under `key`.
    pub(crate) fn get(&self, key: &str) -> Option<Arc<dyn Invoker>> {
        (self.inner.map.read().get(key)).map(|p| Arc::clone(&p.invoker))
    }

    /// Returns true if something is published under `key`.
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.inner.map.read().contains_key(key)
    }

    fn withdraw(&self, key: &str, generation: u64) -> bool {
        let mut map = self.inner.map.write();

        match map.get(key) {
            Some(p) if p.generation == generation => {
                map.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Withdraw everything, returning the invokers that were published.
    pub(crate) fn clear(&self) -> Vec<Arc<dyn Invoker>> {
        (self.inner.map.write().drain())
            .map(|(_, p)| p.invoker)
            .collect()
    }
}

/// An [Exporter] backed by an [ExporterMap] entry.
pub(crate) struct MapExporter {
    map: ExporterMap,
    key: String,
    generation: u64,
    invoker: Arc<dyn Invoker>,
    unexported: AtomicBool,
}

impl Exporter for MapExporter {
    fn invoker(&self) -> &Arc<dyn Invoker> {
        &self.invoker
    }

    fn unexport(&self) {
        if self.unexported.swap(true, SeqCst) {
            return;
        }

        if self.map.withdraw(&self.key, self.generation) {
            debug!("unexported service {}", self.key);
        } else {
            debug!("exporter for {} was already replaced", self.key);
        }
    }
}

/// A [Protocol] that picks the concrete protocol per call, by url scheme.
#[derive(Clone)]
pub struct AdaptiveProtocol {
    loader: Arc<ExtensionLoader<dyn Protocol>>,
}

impl AdaptiveProtocol {
    /// Create an adaptive protocol over the protocols known to `registry`.
    pub fn new(registry: &ExtensionRegistry) -> Result<Self> {
        let loader = registry.loader::<dyn Protocol>()?;
        Ok(Self { loader })
    }

    fn by_scheme(&self, url: &Url) -> Result<Arc<dyn Protocol>> {
        self.loader.extension(url.protocol())
    }
}

impl Protocol for AdaptiveProtocol {
    fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Box<dyn Exporter>> {
        self.by_scheme(invoker.url())?.export(invoker)
    }

    fn refer(&self, interface: &str, url: &Url) -> Result<Arc<dyn Invoker>> {
        self.by_scheme(url)?.refer(interface, url)
    }

    fn destroy(&self) {
        for protocol in self.loader.loaded_extensions() {
            protocol.destroy();
        }
    }
}
