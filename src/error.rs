// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Errors raised across the [Invoker][crate::Invoker] boundary.
//!
//! Business failures never show up here while a call is in flight; they are carried in
//! the exception slot of an [RpcResult][crate::RpcResult] as a [Status]. The variants of
//! [Error] are reserved for contract violations and routing failures, plus
//! [Error::Remote] which a [Proxy][crate::Proxy] produces when it unwraps a failed
//! result at the consumer-facing edge.
use std::result;
use thiserror::Error;
use tonic::Status;

/// A specialized result type for fallible operations in this crate.
pub type Result<T> = result::Result<T, Error>;

/// The error type for invoker, protocol, registry and cluster operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing extension configuration, or an unrecognized routing key.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An invocation was attempted on an invoker that has been destroyed.
    #[error("invoker for {interface} has been destroyed")]
    InvokerDestroyed {
        /// The interface the destroyed invoker was bound to.
        interface: String,
    },

    /// Selection was attempted over an empty candidate list.
    #[error("no available invoker for {service}")]
    NoAvailableInvoker {
        /// The service that had no candidates.
        service: String,
    },

    /// Failover ran out of retries.
    #[error("cluster exhausted after {attempts} attempts: {last}")]
    ClusterExhausted {
        /// Total number of attempts made, including the first.
        attempts: usize,
        /// The failure observed on the final attempt.
        #[source]
        last: Box<Error>,
    },

    /// A local reference could not find an exported service.
    #[error("no exported service for key {service_key}")]
    ServiceNotFound {
        /// The `group/interface:version` key that was looked up.
        service_key: String,
    },

    /// The invocation deadline passed before the call could complete.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A url could not be parsed.
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A business or remote failure, unwrapped from an [RpcResult][crate::RpcResult].
    #[error("remote failure: {0}")]
    Remote(#[from] Status),
}

impl Error {
    /// Returns true if a failover cluster may recover from this error by selecting again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NoAvailableInvoker { .. }
                | Error::InvokerDestroyed { .. }
                | Error::ServiceNotFound { .. }
                | Error::Remote(_)
        )
    }

    /// Convert this error into a [Status], for transmission in an
    /// [RpcResult][crate::RpcResult].
    pub fn into_status(self) -> Status {
        match self {
            Error::Remote(status) => status,
            Error::DeadlineExceeded => Status::deadline_exceeded("deadline exceeded"),
            e @ Error::ServiceNotFound { .. } => Status::not_found(e.to_string()),
            e @ Error::NoAvailableInvoker { .. } => Status::unavailable(e.to_string()),
            e @ Error::InvokerDestroyed { .. } => Status::unavailable(e.to_string()),
            e @ Error::Configuration(_) => Status::failed_precondition(e.to_string()),
            e @ Error::InvalidUrl { .. } => Status::invalid_argument(e.to_string()),
            e @ Error::ClusterExhausted { .. } => Status::unavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn exhausted_reports_source() {
        let e = Error::ClusterExhausted {
            attempts: 3,
            last: Box::new(Error::Remote(Status::internal("boom"))),
        };

        assert!(e.to_string().contains("3 attempts"));
        assert!(std::error::Error::source(&e).is_some());
        assert_eq!(Code::Unavailable, e.into_status().code());
    }

    #[test]
    fn configuration_is_not_retryable() {
        assert!(!Error::Configuration("x".into()).is_retryable());
        assert!(Error::NoAvailableInvoker { service: "x".into() }.is_retryable());
    }
}
