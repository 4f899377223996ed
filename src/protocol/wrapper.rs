// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Decorators applied to every protocol.
use super::{export_key, refer_key, Exporter, Protocol};
use crate::{
    error::Result,
    extension::{ExtensionLoader, ExtensionRegistry},
    filter::{self, build_invoker_chain, Filter, Scope},
    invoker::Invoker,
    url::Url,
};
use log::info;
use std::sync::Arc;

/// Places the activated provider filters in front of exported invokers, and the
/// activated consumer filters in front of referred invokers.
pub struct FilterWrapper {
    inner: Arc<dyn Protocol>,
    filters: Arc<ExtensionLoader<dyn Filter>>,
}

impl FilterWrapper {
    /// The identifier this wrapper is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::protocol::FilterWrapper";

    /// Wrap `inner`, activating filters known to `registry`.
    pub fn new(registry: &ExtensionRegistry, inner: Arc<dyn Protocol>) -> Result<Self> {
        Ok(Self {
            inner,
            filters: registry.loader::<dyn Filter>()?,
        })
    }
}

impl Protocol for FilterWrapper {
    fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Box<dyn Exporter>> {
        let filters = filter::activate(&self.filters, Scope::Provider, invoker.url())?;
        self.inner.export(build_invoker_chain(invoker, &filters))
    }

    fn refer(&self, interface: &str, url: &Url) -> Result<Arc<dyn Invoker>> {
        let filters = filter::activate(&self.filters, Scope::Consumer, url)?;
        Ok(build_invoker_chain(self.inner.refer(interface, url)?, &filters))
    }

    fn destroy(&self) {
        self.inner.destroy()
    }
}

/// Logs every export and reference.
pub struct LoggingWrapper {
    inner: Arc<dyn Protocol>,
}

impl LoggingWrapper {
    /// The identifier this wrapper is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::protocol::LoggingWrapper";

    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn Protocol>) -> Self {
        Self { inner }
    }
}

impl Protocol for LoggingWrapper {
    fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Box<dyn Exporter>> {
        info!("exporting {} at {}", export_key(&*invoker), invoker.url());
        self.inner.export(invoker)
    }

    fn refer(&self, interface: &str, url: &Url) -> Result<Arc<dyn Invoker>> {
        info!("referring {} at {}", refer_key(interface, url), url);
        self.inner.refer(interface, url)
    }

    fn destroy(&self) {
        info!("destroying protocol");
        self.inner.destroy()
    }
}
