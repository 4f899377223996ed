// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! An in-process network with simulated faults.
use super::{FrameHandler, Transport};
use crate::{error::Result, url::Url};
use bytes::Bytes;
use log::debug;
use parking_lot::Mutex;
use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    sync::Arc,
};
use tonic::Status;

/// An in-process [Transport], keyed by `host:port`.
///
/// Clones share the same network, so a clone registered with one extension registry can
/// be used to inject faults into it:
///
/// ```
/// use brisk::{transport::LoopbackTransport, ExtensionRegistry, Transport};
/// use std::sync::Arc;
///
/// let net = LoopbackTransport::new();
/// let handle = net.clone();
///
/// let registry = ExtensionRegistry::builder()
///     .with_builtins()
///     .implementation::<dyn Transport, _>(LoopbackTransport::IDENTIFIER, move |_| {
///         Ok(Arc::new(handle.clone()))
///     })
///     .build();
///
/// net.block("10.0.0.1:7000");
/// ```
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    listeners: HashMap<String, Arc<dyn FrameHandler>>,
    blocked: HashSet<String>,
}

impl LoopbackTransport {
    /// The identifier this transport is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::transport::LoopbackTransport";

    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block requests to `addr` (`host:port`).
    pub fn block(&self, addr: &str) {
        self.inner.lock().blocked.insert(addr.to_owned());
    }

    /// Allow requests to `addr` (`host:port`).
    pub fn allow(&self, addr: &str) {
        self.inner.lock().blocked.remove(addr);
    }

    /// Returns true if something is listening at `addr`.
    pub fn is_listening(&self, addr: &str) -> bool {
        self.inner.lock().listeners.contains_key(addr)
    }
}

#[crate::async_trait]
impl Transport for LoopbackTransport {
    async fn request(&self, target: &Url, frame: Bytes) -> std::result::Result<Bytes, Status> {
        let addr = target.address();

        let handler = {
            let inner = self.inner.lock();

            if inner.blocked.contains(&addr) {
                return Err(Status::unavailable(format!("{}: blocked by simulation", addr)));
            }

            match inner.listeners.get(&addr) {
                Some(h) => Arc::clone(h),
                None => return Err(Status::unavailable(format!("{}: connection refused", addr))),
            }
        };

        Ok(handler.handle(frame).await)
    }

    fn listen(&self, local: &Url, handler: Arc<dyn FrameHandler>) -> Result<()> {
        let addr = local.address();

        match self.inner.lock().listeners.entry(addr) {
            Entry::Vacant(v) => {
                debug!("listening at {}", v.key());
                v.insert(handler);
                Ok(())
            }

            Entry::Occupied(o) => bail_config!("addr in use: {}", o.key()),
        }
    }

    fn close(&self, local: &Url) {
        if self.inner.lock().listeners.remove(&local.address()).is_some() {
            debug!("closed {}", local.address());
        }
    }
}
