// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Extensions shipped with the crate.
use super::RegistryBuilder;
use crate::{
    cluster::{
        registry::Registry,
        select::{RandomSelector, RoundRobinSelector, Selector},
        AdaptiveCluster, Cluster, FailfastCluster, FailoverCluster, FailsafeCluster,
    },
    codec::{Codec, RawCodec},
    filter::{
        CircuitBreakerFilter, CostFilter, ExceptionFilter, Filter, RateLimitFilter, TimeoutFilter,
    },
    protocol::{FilterWrapper, LocalProtocol, LoggingWrapper, Protocol, RemoteProtocol},
    transport::{LoopbackTransport, Transport},
};
use std::sync::Arc;

impl RegistryBuilder {
    /// Register every built-in extension, and add the built-in manifests as the next
    /// discovery locations.
    ///
    /// Locations added earlier take precedence over the built-in manifests, so a name
    /// bound before calling this cannot be rebound by it. To replace the implementation
    /// behind a built-in identifier, register the identifier again afterwards.
    pub fn with_builtins(self) -> Self {
        self.implementation::<dyn Protocol, _>(LocalProtocol::IDENTIFIER, |_| {
            Ok(Arc::new(LocalProtocol::new()))
        })
        .implementation::<dyn Protocol, _>(RemoteProtocol::IDENTIFIER, |r| {
            Ok(Arc::new(RemoteProtocol::new(r)?))
        })
        .wrapper::<dyn Protocol, _>(FilterWrapper::IDENTIFIER, |r, inner| {
            Ok(Arc::new(FilterWrapper::new(r, inner)?))
        })
        .wrapper::<dyn Protocol, _>(LoggingWrapper::IDENTIFIER, |_, inner| {
            Ok(Arc::new(LoggingWrapper::new(inner)))
        })
        .manifest::<dyn Protocol>(include_str!("../../resources/extensions/brisk.Protocol"))
        // filters
        .implementation::<dyn Filter, _>(ExceptionFilter::IDENTIFIER, |_| {
            Ok(Arc::new(ExceptionFilter))
        })
        .implementation::<dyn Filter, _>(CostFilter::IDENTIFIER, |_| Ok(Arc::new(CostFilter)))
        .implementation::<dyn Filter, _>(TimeoutFilter::IDENTIFIER, |_| Ok(Arc::new(TimeoutFilter)))
        .implementation::<dyn Filter, _>(RateLimitFilter::IDENTIFIER, |_| {
            Ok(Arc::new(RateLimitFilter::new()))
        })
        .implementation::<dyn Filter, _>(CircuitBreakerFilter::IDENTIFIER, |_| {
            Ok(Arc::new(CircuitBreakerFilter::new()))
        })
        .manifest::<dyn Filter>(include_str!("../../resources/extensions/brisk.Filter"))
        // clusters
        .implementation::<dyn Cluster, _>(FailoverCluster::IDENTIFIER, |r| {
            Ok(Arc::new(FailoverCluster::new(r)?))
        })
        .implementation::<dyn Cluster, _>(FailfastCluster::IDENTIFIER, |r| {
            Ok(Arc::new(FailfastCluster::new(r)?))
        })
        .implementation::<dyn Cluster, _>(FailsafeCluster::IDENTIFIER, |r| {
            Ok(Arc::new(FailsafeCluster::new(r)?))
        })
        .implementation::<dyn Cluster, _>(AdaptiveCluster::IDENTIFIER, |r| {
            Ok(Arc::new(AdaptiveCluster::new(r)?))
        })
        .manifest::<dyn Cluster>(include_str!("../../resources/extensions/brisk.Cluster"))
        // selectors
        .implementation::<dyn Selector, _>(RoundRobinSelector::IDENTIFIER, |_| {
            Ok(Arc::new(RoundRobinSelector::new()))
        })
        .implementation::<dyn Selector, _>(RandomSelector::IDENTIFIER, |_| {
            Ok(Arc::new(RandomSelector))
        })
        .manifest::<dyn Selector>(include_str!("../../resources/extensions/brisk.Selector"))
        // codecs & transports
        .implementation::<dyn Codec, _>(RawCodec::IDENTIFIER, |_| Ok(Arc::new(RawCodec)))
        .manifest::<dyn Codec>(include_str!("../../resources/extensions/brisk.Codec"))
        .implementation::<dyn Transport, _>(LoopbackTransport::IDENTIFIER, |_| {
            Ok(Arc::new(LoopbackTransport::new()))
        })
        .manifest::<dyn Transport>(include_str!("../../resources/extensions/brisk.Transport"))
        .declare::<dyn Registry>()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        cluster::Cluster, codec::Codec, extension::ExtensionRegistry, filter::Filter,
        protocol::Protocol, Selector, Transport,
    };

    #[test]
    fn builtins_are_discoverable() {
        let r = ExtensionRegistry::with_builtins();

        let names = |v: Vec<String>| v.join(",");

        assert_eq!(
            "local,remote",
            names(r.loader::<dyn Protocol>().unwrap().supported_extensions().unwrap())
        );
        assert_eq!(
            "exception,cost,timeout,ratelimit,circuitbreaker",
            names(r.loader::<dyn Filter>().unwrap().supported_extensions().unwrap())
        );
        assert_eq!(
            "failover,failfast,failsafe,adaptive",
            names(r.loader::<dyn Cluster>().unwrap().supported_extensions().unwrap())
        );
        assert_eq!(
            "roundrobin,random",
            names(r.loader::<dyn Selector>().unwrap().supported_extensions().unwrap())
        );
        assert!(r.extension::<dyn Codec>("raw").is_ok());
        assert!(r.extension::<dyn Transport>("loopback").is_ok());
    }

    #[test]
    fn every_builtin_constructs() {
        let r = ExtensionRegistry::with_builtins();

        for name in ["local", "remote"].iter() {
            assert!(r.extension::<dyn Protocol>(name).is_ok(), "{}", name);
        }

        for name in ["failover", "failfast", "failsafe", "adaptive"].iter() {
            assert!(r.extension::<dyn Cluster>(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn registry_is_declared_without_backends() {
        use crate::cluster::registry::Registry;

        let r = ExtensionRegistry::with_builtins();
        let loader = r.loader::<dyn Registry>().unwrap();

        assert!(loader.supported_extensions().unwrap().is_empty());
        assert!(loader.default_extension().is_err());
    }
}
