// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Protobuf envelopes exchanged by the remote protocol.
use std::collections::HashMap;
use tonic::{Code, Status};

/// One invocation on the wire. Arguments are encoded by the codec named in
/// `serialization`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct RequestFrame {
    #[prost(string, tag = "1")]
    pub service_key: String,
    #[prost(string, tag = "2")]
    pub service: String,
    #[prost(string, tag = "3")]
    pub method: String,
    #[prost(string, repeated, tag = "4")]
    pub parameter_types: Vec<String>,
    #[prost(bytes = "vec", repeated, tag = "5")]
    pub arguments: Vec<Vec<u8>>,
    #[prost(map = "string, string", tag = "6")]
    pub attachments: HashMap<String, String>,
    #[prost(string, tag = "7")]
    pub serialization: String,
}

/// One result on the wire.
#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ResponseFrame {
    #[prost(message, optional, tag = "1")]
    pub value: Option<Payload>,
    #[prost(message, optional, tag = "2")]
    pub failure: Option<Failure>,
    #[prost(map = "string, string", tag = "3")]
    pub attachments: HashMap<String, String>,
}

/// An encoded return value and its type descriptor.
#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct Payload {
    #[prost(string, tag = "1")]
    pub value_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// A failure status.
#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct Failure {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

impl From<&Status> for Failure {
    fn from(s: &Status) -> Self {
        Self {
            code: s.code() as i32,
            message: s.message().to_owned(),
        }
    }
}

impl From<Failure> for Status {
    fn from(f: Failure) -> Self {
        Status::new(Code::from_i32(f.code), f.message)
    }
}

impl ResponseFrame {
    /// A response carrying only a failure.
    pub(crate) fn failed(status: &Status) -> Self {
        Self {
            failure: Some(status.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn failures_keep_code_and_message() {
        let frame = ResponseFrame::failed(&Status::resource_exhausted("slow down"));
        let buf = frame.encode_to_vec();

        let status: Status = ResponseFrame::decode(&*buf)
            .unwrap()
            .failure
            .unwrap()
            .into();

        assert_eq!(Code::ResourceExhausted, status.code());
        assert_eq!("slow down", status.message());
    }
}
