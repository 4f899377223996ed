// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! A microkernel rpc framework with pluggable protocols, filters and cluster strategies.
//!
//! # Overview
//! `brisk` turns a local service implementation into a remotely callable service, and a
//! local proxy into a network call. The core is small, and each cross-cutting concern is
//! supplied as a named extension resolved through an [ExtensionRegistry].
//!
//! # Invocation Pipeline
//! Every call is an [Invocation] handed to an [Invoker], which produces an [RpcResult].
//! Business failures travel inside the result as a [Status]; only contract violations
//! (a destroyed invoker, bad configuration, an empty directory) surface as an [Error].
//!
//! * A [Protocol] publishes invokers as [Exporter]s, and resolves references into
//!   invokers.
//! * A [Filter] chain wraps an invoker with ordered interceptors.
//! * A [Cluster] joins a [Directory] of candidate invokers into a single fault-tolerant
//!   invoker.
//!
//! # Extensions
//! Extension points are plain traits implementing [ExtensionPoint]. Implementations are
//! registered in a table of factories, and selected by name through line-oriented
//! manifests (`name=identifier`). See the [extension] module for details.
//!
//! [Status]: tonic::Status
#![warn(rust_2018_idioms, missing_docs)]
#![doc(
    issue_tracker_base_url = "https://github.com/nytopop/brisk/issues/",
    html_root_url = "https://docs.rs/brisk/0.1.0",
    test(
        no_crate_inject,
        attr(
            deny(rust_2018_idioms, unused_imports, unused_mut),
            allow(unused_variables)
        )
    )
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(test)]
#[test]
fn test_html_root_url() {
    version_sync::assert_html_root_url_updated!("src/lib.rs");
}

#[macro_use]
mod macros;

pub mod cluster;
pub mod codec;
pub mod error;
pub mod extension;
pub mod filter;
pub mod invocation;
pub mod invoker;
pub mod kernel;
pub mod protocol;
pub mod proxy;
pub mod transport;
pub mod url;

#[doc(inline)]
pub use cluster::{
    directory::{Directory, StaticDirectory, SwapDirectory},
    registry::{NotifyListener, Registry, RegistryDirectory},
    retry::{ExponentialBackoff, RetryPolicy},
    select::{RandomSelector, RoundRobinSelector, Selector},
    AdaptiveCluster, Cluster, FailfastCluster, FailoverCluster, FailsafeCluster,
};
#[doc(inline)]
pub use codec::Codec;
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use extension::{
    AdaptiveExtension, ExtensionLoader, ExtensionPoint, ExtensionRegistry, RegistryBuilder,
};
#[doc(inline)]
pub use filter::{build_invoker_chain, Filter, FilterSpec, Scope};
#[doc(inline)]
pub use invocation::{Invocation, RpcResult, Value};
#[doc(inline)]
pub use invoker::{handler_fn, Delegate, Invoker, RequestHandler, ServiceInvoker};
#[doc(inline)]
pub use kernel::{Kernel, ReferenceConfig, ServiceConfig};
#[doc(inline)]
pub use protocol::{AdaptiveProtocol, Exporter, Protocol};
#[doc(inline)]
pub use proxy::Proxy;
#[doc(inline)]
pub use transport::{FrameHandler, Transport};
#[doc(inline)]
pub use url::Url;

/// A re-export of [async_trait] for convenience.
///
/// [async_trait]: https://docs.rs/async-trait/latest/async_trait/attr.async_trait.html
#[doc(inline)]
pub use tonic::async_trait;

/// A re-export of [tonic::Status], the failure type carried by [RpcResult].
pub use tonic::{Code, Status};
