// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Load balancing across candidate invokers.
use crate::{
    error::{Error, Result},
    extension::ExtensionPoint,
    invocation::Invocation,
    invoker::Invoker,
};
use rand::{thread_rng, Rng};
use std::sync::{
    atomic::{AtomicUsize, Ordering::Relaxed},
    Arc,
};

/// Picks one invoker out of a candidate list.
pub trait Selector: Send + Sync {
    /// Select one of `invokers`. Fails with [Error::NoAvailableInvoker] if there are none.
    fn select(
        &self,
        invokers: &[Arc<dyn Invoker>],
        invocation: &Invocation,
    ) -> Result<Arc<dyn Invoker>>;
}

impl ExtensionPoint for dyn Selector {
    const NAME: &'static str = "brisk.Selector";
    const DEFAULT: &'static str = "roundrobin";
}

fn none_available(invocation: &Invocation) -> Error {
    Error::NoAvailableInvoker {
        service: invocation.service().to_owned(),
    }
}

/// Cycles through candidates with a counter shared by every call.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl RoundRobinSelector {
    /// The identifier this selector is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::cluster::RoundRobinSelector";

    /// Create a selector that starts at the first candidate.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for RoundRobinSelector {
    fn select(
        &self,
        invokers: &[Arc<dyn Invoker>],
        invocation: &Invocation,
    ) -> Result<Arc<dyn Invoker>> {
        if invokers.is_empty() {
            return Err(none_available(invocation));
        }

        // fetch_add wraps on overflow
        let i = self.next.fetch_add(1, Relaxed);
        Ok(Arc::clone(&invokers[i % invokers.len()]))
    }
}

/// Picks candidates uniformly at random.
#[derive(Copy, Clone, Debug, Default)]
pub struct RandomSelector;

impl RandomSelector {
    /// The identifier this selector is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::cluster::RandomSelector";
}

impl Selector for RandomSelector {
    fn select(
        &self,
        invokers: &[Arc<dyn Invoker>],
        invocation: &Invocation,
    ) -> Result<Arc<dyn Invoker>> {
        if invokers.is_empty() {
            return Err(none_available(invocation));
        }

        let i = thread_rng().gen_range(0..invokers.len());
        Ok(Arc::clone(&invokers[i]))
    }
}
