// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! In-process publication.
use super::{export_key, refer_key, Exporter, ExporterMap, Protocol};
use crate::{
    error::{Error, Result},
    invocation::{Invocation, RpcResult},
    invoker::Invoker,
    url::Url,
};
use log::debug;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering::SeqCst},
    Arc, Weak,
};

/// A [Protocol] whose references call exported invokers directly, in process.
///
/// References look the exported invoker up on every call, so a reference observes
/// re-exports, and fails with [Error::ServiceNotFound] once the service is unexported.
#[derive(Default)]
pub struct LocalProtocol {
    exporters: ExporterMap,
    referred: Mutex<Vec<Weak<LocalInvoker>>>,
}

impl LocalProtocol {
    /// The identifier this protocol is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::protocol::LocalProtocol";

    /// Create a protocol with nothing exported.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Protocol for LocalProtocol {
    fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Box<dyn Exporter>> {
        let key = export_key(&*invoker);
        Ok(Box::new(self.exporters.publish(key, invoker)))
    }

    fn refer(&self, interface: &str, url: &Url) -> Result<Arc<dyn Invoker>> {
        let key = refer_key(interface, url);

        if !self.exporters.contains(&key) {
            return Err(Error::ServiceNotFound { service_key: key });
        }

        let invoker = Arc::new(LocalInvoker {
            interface: interface.to_owned(),
            url: url.clone(),
            key,
            exporters: self.exporters.clone(),
            destroyed: AtomicBool::new(false),
        });

        let mut referred = self.referred.lock();
        referred.retain(|r| r.strong_count() > 0);
        referred.push(Arc::downgrade(&invoker));

        Ok(invoker)
    }

    fn destroy(&self) {
        for invoker in self.exporters.clear() {
            invoker.destroy();
        }

        for invoker in self.referred.lock().drain(..) {
            if let Some(invoker) = invoker.upgrade() {
                invoker.destroy();
            }
        }
    }
}

/// A reference to a service exported by a [LocalProtocol].
struct LocalInvoker {
    interface: String,
    url: Url,
    key: String,
    exporters: ExporterMap,
    destroyed: AtomicBool,
}

#[crate::async_trait]
impl Invoker for LocalInvoker {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(SeqCst)
            && (self.exporters.get(&self.key)).map_or(false, |i| i.is_available())
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, SeqCst) {
            debug!("destroyed local reference to {}", self.key);
        }
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
        if self.destroyed.load(SeqCst) {
            return Err(Error::InvokerDestroyed {
                interface: self.interface.clone(),
            });
        }

        match self.exporters.get(&self.key) {
            Some(exported) => exported.invoke(invocation).await,
            None => Err(Error::ServiceNotFound {
                service_key: self.key.clone(),
            }),
        }
    }
}
