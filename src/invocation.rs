// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Request and response value objects.
use super::url::keys;
use bytes::Bytes;
use std::{
    any::{type_name, Any},
    collections::HashMap,
    fmt,
    sync::Arc,
    time::Duration,
};
use tokio::time::Instant;
use tonic::Status;

/// A type-erased, cheaply cloneable value tagged with its type descriptor.
#[derive(Clone)]
pub struct Value {
    ty: &'static str,
    val: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", self.ty)
    }
}

impl Value {
    /// Wrap a value. Its type descriptor is [type_name] of `T`.
    pub fn new<T: Any + Send + Sync>(val: T) -> Self {
        Self {
            ty: type_name::<T>(),
            val: Arc::new(val),
        }
    }

    /// Returns the type descriptor of the wrapped value.
    pub fn type_name(&self) -> &'static str {
        self.ty
    }

    /// Returns true if the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.val.is::<T>()
    }

    /// Borrow the wrapped value as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.val.downcast_ref()
    }

    /// Returns true if both values share the same allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.val, &other.val)
    }
}

struct Call {
    service: String,
    method: String,
    parameter_types: Vec<String>,
    arguments: Vec<Value>,
}

/// One call: method identity, positional arguments and string attachments.
///
/// An invocation is immutable once built. Interceptors that need to propagate extra
/// metadata derive a new invocation with [with_attachment](Invocation::with_attachment),
/// which shares the arguments of the original.
#[derive(Clone)]
pub struct Invocation {
    call: Arc<Call>,
    attachments: Arc<HashMap<String, String>>,
    deadline: Option<Instant>,
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("service", &self.call.service)
            .field("method", &self.call.method)
            .field("parameter_types", &self.call.parameter_types)
            .field("attachments", &self.attachments)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Invocation {
    /// Start building an invocation of `service.method`.
    pub fn builder<S: Into<String>, M: Into<String>>(service: S, method: M) -> Builder {
        Builder {
            service: service.into(),
            method: method.into(),
            parameter_types: Vec::new(),
            arguments: Vec::new(),
            attachments: HashMap::new(),
            deadline: None,
        }
    }

    /// Returns the service (interface) name.
    pub fn service(&self) -> &str {
        &self.call.service
    }

    /// Returns the method name.
    pub fn method(&self) -> &str {
        &self.call.method
    }

    /// Returns parameter type descriptors, positionally matched to
    /// [arguments](Invocation::arguments).
    pub fn parameter_types(&self) -> &[String] {
        &self.call.parameter_types
    }

    /// Returns the arguments.
    pub fn arguments(&self) -> &[Value] {
        &self.call.arguments
    }

    /// Returns all attachments.
    pub fn attachments(&self) -> &HashMap<String, String> {
        &self.attachments
    }

    /// Returns the value of an attachment.
    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    /// Returns the point in time after which this invocation should be abandoned.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left until the deadline. `None` means there is no deadline,
    /// and `Some(Duration::ZERO)` means it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Derive an invocation with an extra attachment. Arguments are shared.
    pub fn with_attachment<K: Into<String>, V: Into<String>>(&self, key: K, val: V) -> Self {
        let mut attachments = (*self.attachments).clone();
        attachments.insert(key.into(), val.into());

        Self {
            call: Arc::clone(&self.call),
            attachments: Arc::new(attachments),
            deadline: self.deadline,
        }
    }

    /// Derive an invocation that must complete within `timeout`. The timeout is mirrored
    /// into the `timeout` attachment so it survives a remote hop. An earlier existing
    /// deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;

        match self.deadline {
            Some(d) if d <= deadline => self.clone(),
            _ => {
                let mut inv = self.with_attachment(keys::TIMEOUT, timeout.as_millis().to_string());
                inv.deadline = Some(deadline);
                inv
            }
        }
    }
}

/// A builder for [Invocation]s.
pub struct Builder {
    service: String,
    method: String,
    parameter_types: Vec<String>,
    arguments: Vec<Value>,
    attachments: HashMap<String, String>,
    deadline: Option<Instant>,
}

impl Builder {
    /// Append an argument, typed by its own descriptor.
    pub fn arg(mut self, val: Value) -> Self {
        self.parameter_types.push(val.type_name().to_owned());
        self.arguments.push(val);
        self
    }

    /// Append an argument with an explicit parameter type descriptor.
    pub fn typed_arg<T: Into<String>>(mut self, ty: T, val: Value) -> Self {
        self.parameter_types.push(ty.into());
        self.arguments.push(val);
        self
    }

    /// Add an attachment.
    pub fn attachment<K: Into<String>, V: Into<String>>(mut self, key: K, val: V) -> Self {
        self.attachments.insert(key.into(), val.into());
        self
    }

    /// Add many attachments.
    pub fn attachments<I: IntoIterator<Item = (String, String)>>(mut self, iter: I) -> Self {
        self.attachments.extend(iter);
        self
    }

    /// Set a timeout, starting now.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        (self.attachments).insert(keys::TIMEOUT.to_owned(), timeout.as_millis().to_string());
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Finish building. If no timeout was set but a `timeout` attachment is present, a
    /// deadline is derived from it.
    pub fn build(self) -> Invocation {
        let deadline = self.deadline.or_else(|| {
            let ms: u64 = self.attachments.get(keys::TIMEOUT)?.parse().ok()?;
            Some(Instant::now() + Duration::from_millis(ms))
        });

        Invocation {
            call: Arc::new(Call {
                service: self.service,
                method: self.method,
                parameter_types: self.parameter_types,
                arguments: self.arguments,
            }),
            attachments: Arc::new(self.attachments),
            deadline,
        }
    }
}

/// The outcome of an [Invocation].
///
/// A result may structurally hold both a value and an exception; [has_exception] is
/// authoritative. A result holding neither represents a successful void call.
///
/// [has_exception]: RpcResult::has_exception
#[derive(Debug, Default)]
pub struct RpcResult {
    value: Option<Value>,
    exception: Option<Status>,
    attachments: HashMap<String, String>,
}

impl RpcResult {
    /// A successful result carrying `val`.
    pub fn value(val: Value) -> Self {
        Self {
            value: Some(val),
            ..Self::default()
        }
    }

    /// A failed result.
    pub fn exception(status: Status) -> Self {
        Self {
            exception: Some(status),
            ..Self::default()
        }
    }

    /// A successful void result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a copy of this result with an extra response attachment.
    pub fn with_attachment<K: Into<String>, V: Into<String>>(mut self, key: K, val: V) -> Self {
        self.attachments.insert(key.into(), val.into());
        self
    }

    /// Returns true iff the failure slot is populated.
    pub fn has_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Returns the value, if any.
    pub fn get_value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Returns the failure, if any.
    pub fn get_exception(&self) -> Option<&Status> {
        self.exception.as_ref()
    }

    /// Returns response-side attachments.
    pub fn attachments(&self) -> &HashMap<String, String> {
        &self.attachments
    }

    /// Unwrap into a call-or-throw shape.
    pub fn into_result(self) -> Result<Option<Value>, Status> {
        match self.exception {
            Some(status) => Err(status),
            None => Ok(self.value),
        }
    }
}

impl Clone for RpcResult {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            exception: self.exception.as_ref().map(copy_status),
            attachments: self.attachments.clone(),
        }
    }
}

/// Copies a [Status], keeping its code, message, details and metadata.
pub(crate) fn copy_status(s: &Status) -> Status {
    Status::with_details_and_metadata(
        s.code(),
        s.message(),
        Bytes::copy_from_slice(s.details()),
        s.metadata().clone(),
    )
}

impl From<Result<Value, Status>> for RpcResult {
    fn from(r: Result<Value, Status>) -> Self {
        match r {
            Ok(v) => RpcResult::value(v),
            Err(s) => RpcResult::exception(s),
        }
    }
}

impl From<Result<(), Status>> for RpcResult {
    fn from(r: Result<(), Status>) -> Self {
        match r {
            Ok(()) => RpcResult::empty(),
            Err(s) => RpcResult::exception(s),
        }
    }
}

impl From<Status> for RpcResult {
    fn from(s: Status) -> Self {
        RpcResult::exception(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn value_result_exposes_exact_value() {
        let v = Value::new(String::from("pong"));
        let r = RpcResult::value(v.clone());

        assert!(!r.has_exception());
        assert!(r.get_value().unwrap().ptr_eq(&v));
        assert_eq!("pong", r.get_value().unwrap().downcast_ref::<String>().unwrap());
    }

    #[test]
    fn exception_result_exposes_exact_exception() {
        let r = RpcResult::exception(Status::not_found("gone"));

        assert!(r.has_exception());
        assert_eq!(Code::NotFound, r.get_exception().unwrap().code());
        assert_eq!("gone", r.get_exception().unwrap().message());
        assert!(r.into_result().is_err());
    }

    #[test]
    fn cloned_results_keep_their_exception() {
        let r = RpcResult::exception(Status::with_details(
            Code::Aborted,
            "lost race",
            Bytes::from_static(b"retry"),
        ))
        .with_attachment("node", "a");

        let c = r.clone();
        let status = c.get_exception().unwrap();
        assert_eq!(Code::Aborted, status.code());
        assert_eq!("lost race", status.message());
        assert_eq!(b"retry", status.details());
        assert_eq!(Some(&"a".to_owned()), c.attachments().get("node"));
        assert!(r.has_exception());
    }

    #[test]
    fn empty_result_is_void_success() {
        let r = RpcResult::empty();
        assert!(!r.has_exception());
        assert!(r.into_result().unwrap().is_none());
    }

    #[test]
    fn parameter_types_follow_arguments() {
        let inv = Invocation::builder("demo.Greeter", "greet")
            .arg(Value::new(String::from("bob")))
            .typed_arg("u32", Value::new(7u32))
            .build();

        assert_eq!(2, inv.arguments().len());
        assert_eq!(type_name::<String>(), inv.parameter_types()[0]);
        assert_eq!("u32", inv.parameter_types()[1]);
    }

    #[test]
    fn derived_invocations_share_arguments() {
        let inv = Invocation::builder("s", "m").arg(Value::new(1u8)).build();
        let tagged = inv.with_attachment("trace", "abc");

        assert_eq!(None, inv.attachment("trace"));
        assert_eq!(Some("abc"), tagged.attachment("trace"));
        assert!(inv.arguments()[0].ptr_eq(&tagged.arguments()[0]));
    }

    #[tokio::test]
    async fn timeout_attachment_becomes_deadline() {
        let inv = Invocation::builder("s", "m")
            .attachment(keys::TIMEOUT, "5000")
            .build();

        let left = inv.remaining().unwrap();
        assert!(left <= Duration::from_millis(5000));
        assert!(left > Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn earlier_deadline_wins() {
        let inv = Invocation::builder("s", "m")
            .timeout(Duration::from_millis(10))
            .build();

        let relaxed = inv.with_timeout(Duration::from_secs(60));
        assert_eq!(inv.deadline(), relaxed.deadline());
        assert_eq!(Some("10"), relaxed.attachment(keys::TIMEOUT));
    }
}
