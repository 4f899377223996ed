// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Candidate sets for one logical service.
use crate::{
    error::{Error, Result},
    invocation::Invocation,
    invoker::Invoker,
    url::Url,
};
use arc_swap::ArcSwap;
use log::debug;
use std::sync::{
    atomic::{AtomicBool, Ordering::SeqCst},
    Arc,
};

/// The invokers currently serving one logical service.
pub trait Directory: Send + Sync {
    /// Returns the interface of the service.
    fn interface(&self) -> &str;

    /// Returns the consumer url the service is referred with. Cluster configuration
    /// (retries, selector, ...) is read from here.
    fn url(&self) -> &Url;

    /// Returns the currently available candidates for `invocation`, in order.
    ///
    /// The list is taken from one consistent snapshot, and may be empty.
    fn list(&self, invocation: &Invocation) -> Result<Vec<Arc<dyn Invoker>>>;

    /// Returns true if this directory has not been destroyed.
    fn is_available(&self) -> bool;

    /// Destroy this directory, and every invoker it owns. Idempotent.
    fn destroy(&self);
}

/// A snapshot of candidate invokers.
pub type Snapshot = Arc<Vec<Arc<dyn Invoker>>>;

/// A directory whose candidates are replaced wholesale by [refresh](SwapDirectory::refresh).
///
/// Readers always observe either the previous or the new candidate list in full.
pub struct SwapDirectory {
    interface: String,
    url: Url,
    invokers: ArcSwap<Vec<Arc<dyn Invoker>>>,
    destroyed: AtomicBool,
}

impl SwapDirectory {
    /// Create a directory for `interface`, referred with `url`, holding `invokers`.
    pub fn new<S: Into<String>>(interface: S, url: Url, invokers: Vec<Arc<dyn Invoker>>) -> Self {
        Self {
            interface: interface.into(),
            url,
            invokers: ArcSwap::from_pointee(invokers),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Replace the candidate list, returning the previous one.
    pub fn refresh(&self, invokers: Vec<Arc<dyn Invoker>>) -> Snapshot {
        debug!("refreshing {} with {} candidates", self.interface, invokers.len());
        self.invokers.swap(Arc::new(invokers))
    }

    /// Returns the current candidate list, including unavailable invokers.
    pub fn snapshot(&self) -> Snapshot {
        self.invokers.load_full()
    }
}

impl Directory for SwapDirectory {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn list(&self, _: &Invocation) -> Result<Vec<Arc<dyn Invoker>>> {
        if self.destroyed.load(SeqCst) {
            return Err(Error::InvokerDestroyed {
                interface: self.interface.clone(),
            });
        }

        let snapshot = self.invokers.load();

        Ok((snapshot.iter())
            .filter(|i| i.is_available())
            .cloned()
            .collect())
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(SeqCst)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, SeqCst) {
            return;
        }

        for invoker in self.refresh(Vec::new()).iter() {
            invoker.destroy();
        }
    }
}

/// A directory whose candidates never change, for direct connections.
pub struct StaticDirectory {
    inner: SwapDirectory,
}

impl StaticDirectory {
    /// Create a directory for `interface`, referred with `url`, holding `invokers`.
    pub fn new<S: Into<String>>(interface: S, url: Url, invokers: Vec<Arc<dyn Invoker>>) -> Self {
        Self {
            inner: SwapDirectory::new(interface, url, invokers),
        }
    }
}

impl Directory for StaticDirectory {
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
        self.inner.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        invocation::RpcResult,
        invoker::{handler_fn, ServiceInvoker},
    };
    use std::thread;

    fn stub(port: u16) -> Arc<dyn Invoker> {
        Arc::new(ServiceInvoker::new(
            Url::new("local", "h", port, "demo.Stub"),
            handler_fn(|_: Invocation| async { RpcResult::empty() }),
        ))
    }

    fn ports(list: &[Arc<dyn Invoker>]) -> Vec<u16> {
        list.iter().map(|i| i.url().port()).collect()
    }

    #[test]
    fn unavailable_invokers_are_not_listed() {
        let dir = StaticDirectory::new("demo.Stub", Url::new("local", "h", 0, "demo.Stub"), vec![
            stub(1),
            stub(2),
            stub(3),
        ]);
        let inv = Invocation::builder("demo.Stub", "m").build();

        dir.list(&inv).unwrap()[1].destroy();
        assert_eq!(vec![1, 3], ports(&dir.list(&inv).unwrap()));

        dir.destroy();
        assert!(dir.list(&inv).is_err());
    }

    #[test]
    fn readers_never_observe_torn_lists() {
        let dir = Arc::new(SwapDirectory::new(
            "demo.Stub",
            Url::new("local", "h", 0, "demo.Stub"),
            vec![stub(1), stub(1), stub(1)],
        ));

        let writer = {
            let dir = Arc::clone(&dir);
            thread::spawn(move || {
                for i in 0..500u16 {
                    let port = 2 + i % 2;
                    dir.refresh(vec![stub(port), stub(port), stub(port)]);
                }
            })
        };

        let inv = Invocation::builder("demo.Stub", "m").build();

        for _ in 0..500 {
            let seen = ports(&dir.list(&inv).unwrap());
            assert_eq!(3, seen.len());
            assert!(seen.iter().all(|p| *p == seen[0]), "torn read: {:?}", seen);
        }

        writer.join().unwrap();
    }
}
