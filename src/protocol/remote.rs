// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Publication over a [Transport].
//!
//! Requests and responses travel as protobuf envelopes ([RequestFrame] and
//! [ResponseFrame]). Argument and return values inside them are encoded by the [Codec]
//! named by the `serialization` url parameter of the reference.
use super::{
    export_key,
    frame::{Failure, Payload, RequestFrame, ResponseFrame},
    refer_key, Exporter, ExporterMap, Protocol,
};
use crate::{
    codec::Codec,
    error::{Error, Result},
    extension::{AdaptiveExtension, ExtensionLoader, ExtensionRegistry},
    invocation::{Invocation, RpcResult},
    invoker::Invoker,
    transport::{FrameHandler, Transport},
    url::{keys, Url},
};
use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::Mutex;
use prost::Message;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc, Weak,
    },
};
use tonic::Status;

/// A [Protocol] that moves invocations through a [Transport].
///
/// The transport is chosen by the `transport` url parameter, and the codec by the
/// `serialization` url parameter; both fall back to their declared defaults.
pub struct RemoteProtocol {
    codecs: Arc<ExtensionLoader<dyn Codec>>,
    transports: AdaptiveExtension<dyn Transport>,
    exporters: ExporterMap,
    listening: Mutex<HashMap<String, (Url, Arc<dyn Transport>)>>,
    referred: Mutex<Vec<Weak<RemoteInvoker>>>,
}

impl RemoteProtocol {
    /// The identifier this protocol is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::protocol::RemoteProtocol";

    /// Create a protocol resolving codecs and transports through `registry`.
    pub fn new(registry: &ExtensionRegistry) -> Result<Self> {
        Ok(Self {
            codecs: registry.loader::<dyn Codec>()?,
            transports: registry.adaptive::<dyn Transport>(keys::TRANSPORT)?,
            exporters: ExporterMap::default(),
            listening: Mutex::default(),
            referred: Mutex::default(),
        })
    }
}

impl Protocol for RemoteProtocol {
    fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Box<dyn Exporter>> {
        let url = invoker.url().clone();
        let addr = url.address();

        {
            let mut listening = self.listening.lock();

            if !listening.contains_key(&addr) {
                let transport = self.transports.resolve(&url)?;
                let dispatcher = Dispatcher {
                    codecs: Arc::clone(&self.codecs),
                    exporters: self.exporters.clone(),
                    addr: addr.clone(),
                };

                transport.listen(&url, Arc::new(dispatcher))?;
                info!("remote protocol listening at {}", addr);
                listening.insert(addr.clone(), (url, transport));
            }
        }

        let key = local_key(&export_key(&*invoker), &addr);
        Ok(Box::new(self.exporters.publish(key, invoker)))
    }

    fn refer(&self, interface: &str, url: &Url) -> Result<Arc<dyn Invoker>> {
        let invoker = Arc::new(RemoteInvoker {
            interface: interface.to_owned(),
            url: url.clone(),
            key: refer_key(interface, url),
            serialization: url.param_or(keys::SERIALIZATION, "").to_owned(),
            codec: self.codecs.extension(url.param_or(keys::SERIALIZATION, ""))?,
            transport: self.transports.resolve(url)?,
            destroyed: AtomicBool::new(false),
        });

        let mut referred = self.referred.lock();
        referred.retain(|r| r.strong_count() > 0);
        referred.push(Arc::downgrade(&invoker));

        Ok(invoker)
    }

    fn destroy(&self) {
        for (_, (url, transport)) in self.listening.lock().drain() {
            transport.close(&url);
        }

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

/// Exports are keyed by address as well, so one service may be exported at several.
fn local_key(service_key: &str, addr: &str) -> String {
    format!("{}@{}", service_key, addr)
}

/// Receives request frames for every service exported at one address.
struct Dispatcher {
    codecs: Arc<ExtensionLoader<dyn Codec>>,
    exporters: ExporterMap,
    addr: String,
}

impl Dispatcher {
    fn decode(
        &self,
        req: RequestFrame,
    ) -> std::result::Result<(Invocation, Arc<dyn Codec>), Status> {
        let codec = (self.codecs.extension(&req.serialization))
            .map_err(|e| Status::failed_precondition(e.to_string()))?;

        if req.arguments.len() != req.parameter_types.len() {
            return Err(Status::invalid_argument(format!(
                "{} arguments for {} parameter types",
                req.arguments.len(),
                req.parameter_types.len()
            )));
        }

        let mut builder = Invocation::builder(req.service, req.method);

        for (ty, arg) in req.parameter_types.into_iter().zip(req.arguments) {
            let val = codec.decode(Bytes::from(arg), &ty)?;
            builder = builder.typed_arg(ty, val);
        }

        Ok((builder.attachments(req.attachments).build(), codec))
    }

    async fn dispatch(&self, frame: Bytes) -> std::result::Result<ResponseFrame, Status> {
        let req = RequestFrame::decode(frame)
            .map_err(|e| Status::invalid_argument(format!("malformed request frame: {}", e)))?;

        let invoker = match self.exporters.get(&local_key(&req.service_key, &self.addr)) {
            Some(invoker) => invoker,
            None => {
                return Err(Error::ServiceNotFound {
                    service_key: req.service_key,
                }
                .into_status())
            }
        };

        let (invocation, codec) = self.decode(req)?;
        let result = invoker.invoke(&invocation).await.map_err(Error::into_status)?;

        let value = match result.get_value() {
            Some(val) => Some(Payload {
                value_type: val.type_name().to_owned(),
                data: codec.encode(val)?.to_vec(),
            }),
            None => None,
        };

        Ok(ResponseFrame {
            value,
            failure: result.get_exception().map(Failure::from),
            attachments: result.attachments().clone(),
        })
    }
}

#[crate::async_trait]
impl FrameHandler for Dispatcher {
    async fn handle(&self, frame: Bytes) -> Bytes {
        let rsp = match self.dispatch(frame).await {
            Ok(rsp) => rsp,
            Err(status) => {
                debug!("request failed before reaching a service: {}", status);
                ResponseFrame::failed(&status)
            }
        };

        Bytes::from(rsp.encode_to_vec())
    }
}

/// A reference to a service exported by a remote [RemoteProtocol].
struct RemoteInvoker {
    interface: String,
    url: Url,
    key: String,
    serialization: String,
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
    destroyed: AtomicBool,
}

impl RemoteInvoker {
    fn encode(&self, invocation: &Invocation) -> std::result::Result<RequestFrame, Status> {
        let arguments = (invocation.arguments().iter())
            .map(|arg| self.codec.encode(arg).map(|b| b.to_vec()))
            .collect::<std::result::Result<_, _>>()?;

        Ok(RequestFrame {
            service_key: self.key.clone(),
            service: invocation.service().to_owned(),
            method: invocation.method().to_owned(),
            parameter_types: invocation.parameter_types().to_vec(),
            arguments,
            attachments: invocation.attachments().clone(),
            serialization: self.serialization.clone(),
        })
    }

    fn decode(&self, buf: Bytes) -> std::result::Result<RpcResult, Status> {
        let rsp = ResponseFrame::decode(buf)
            .map_err(|e| Status::internal(format!("malformed response frame: {}", e)))?;

        let mut result = match rsp.failure {
            Some(failure) => RpcResult::exception(failure.into()),
            None => match rsp.value {
                Some(p) => RpcResult::value(self.codec.decode(Bytes::from(p.data), &p.value_type)?),
                None => RpcResult::empty(),
            },
        };

        for (k, v) in rsp.attachments {
            result = result.with_attachment(k, v);
        }

        Ok(result)
    }

    async fn call(&self, invocation: &Invocation) -> std::result::Result<RpcResult, Status> {
        let frame = Bytes::from(self.encode(invocation)?.encode_to_vec());
        let request = self.transport.request(&self.url, frame);

        let buf = match invocation.remaining() {
            Some(left) => match tokio::time::timeout(left, request).await {
                Ok(rsp) => rsp?,
                Err(_) => {
                    return Err(Status::deadline_exceeded(format!(
                        "no response from {} in time",
                        self.url.address()
                    )))
                }
            },
            None => request.await?,
        };

        self.decode(buf)
    }
}

#[crate::async_trait]
impl Invoker for RemoteInvoker {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(SeqCst)
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, SeqCst) {
            debug!("destroyed remote reference to {} at {}", self.key, self.url.address());
        }
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
        if !self.is_available() {
            return Err(Error::InvokerDestroyed {
                interface: self.interface.clone(),
            });
        }

        match self.call(invocation).await {
            Ok(result) => Ok(result),
            Err(status) => {
                warn!(
                    "{}.{} via {} failed: {}",
                    invocation.service(),
                    invocation.method(),
                    self.url.address(),
                    status
                );
                Ok(RpcResult::exception(status))
            }
        }
    }
}
