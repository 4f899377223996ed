// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Payload serialization.
//!
//! A [Codec] turns argument and return [Value]s into bytes and back. Codecs are selected
//! by name through the extension registry, usually via the `serialization` url
//! parameter.
use super::{extension::ExtensionPoint, invocation::Value};
use bytes::Bytes;
use std::{any::type_name, convert::TryInto, mem::size_of};
use tonic::Status;

/// Encodes and decodes invocation payloads.
///
/// Failures are reported as [Status] values, since they are carried in the exception
/// slot of a result like any other remote failure.
pub trait Codec: Send + Sync {
    /// Encode a value.
    fn encode(&self, val: &Value) -> Result<Bytes, Status>;

    /// Decode a value of the type described by `ty`.
    fn decode(&self, buf: Bytes, ty: &str) -> Result<Value, Status>;
}

impl ExtensionPoint for dyn Codec {
    const NAME: &'static str = "brisk.Codec";
    const DEFAULT: &'static str = "raw";
}

/// A codec for byte buffers, strings, integers, booleans and `()`.
///
/// Integers are encoded in little endian.
#[derive(Copy, Clone, Debug, Default)]
pub struct RawCodec;

impl RawCodec {
    /// The identifier this codec is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::codec::RawCodec";
}

macro_rules! encode_ints {
    ($val:expr, $($ty:ty),+) => {
        $(if let Some(n) = $val.downcast_ref::<$ty>() {
            return Ok(Bytes::copy_from_slice(&n.to_le_bytes()));
        })+
    };
}

macro_rules! decode_ints {
    ($buf:expr, $ty:expr, $($t:ty),+) => {
        $(if $ty == type_name::<$t>() {
            let raw: [u8; size_of::<$t>()] = ($buf.as_ref())
                .try_into()
                .map_err(|_| malformed($ty, $buf.len()))?;
            return Ok(Value::new(<$t>::from_le_bytes(raw)));
        })+
    };
}

fn malformed(ty: &str, len: usize) -> Status {
    Status::invalid_argument(format!("malformed {} ({} bytes)", ty, len))
}

impl Codec for RawCodec {
    fn encode(&self, val: &Value) -> Result<Bytes, Status> {
        if let Some(b) = val.downcast_ref::<Bytes>() {
            return Ok(b.clone());
        }
        if let Some(b) = val.downcast_ref::<Vec<u8>>() {
            return Ok(Bytes::copy_from_slice(b));
        }
        if let Some(s) = val.downcast_ref::<String>() {
            return Ok(Bytes::copy_from_slice(s.as_bytes()));
        }
        if let Some(b) = val.downcast_ref::<bool>() {
            return Ok(Bytes::copy_from_slice(&[*b as u8]));
        }
        if val.is::<()>() {
            return Ok(Bytes::new());
        }

        encode_ints!(val, u8, u16, u32, u64, i8, i16, i32, i64);

        Err(Status::invalid_argument(format!(
            "raw codec cannot encode {}",
            val.type_name()
        )))
    }

    fn decode(&self, buf: Bytes, ty: &str) -> Result<Value, Status> {
        if ty == type_name::<Bytes>() {
            return Ok(Value::new(buf));
        }
        if ty == type_name::<Vec<u8>>() {
            return Ok(Value::new(buf.to_vec()));
        }
        if ty == type_name::<String>() {
            return String::from_utf8(buf.to_vec())
                .map(Value::new)
                .map_err(|_| malformed(ty, buf.len()));
        }
        if ty == type_name::<bool>() {
            return match buf.as_ref() {
                [0] => Ok(Value::new(false)),
                [1] => Ok(Value::new(true)),
                _ => Err(malformed(ty, buf.len())),
            };
        }
        if ty == type_name::<()>() {
            return Ok(Value::new(()));
        }

        decode_ints!(buf, ty, u8, u16, u32, u64, i8, i16, i32, i64);

        Err(Status::invalid_argument(format!("raw codec cannot decode {}", ty)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use tonic::Code;

    fn cycle<T: Clone + PartialEq + Send + Sync + 'static>(val: T) -> bool {
        let v = Value::new(val.clone());
        let buf = RawCodec.encode(&v).unwrap();
        let out = RawCodec.decode(buf, v.type_name()).unwrap();
        out.downcast_ref::<T>() == Some(&val)
    }

    #[quickcheck]
    fn strings_survive(s: String) -> bool {
        cycle(s)
    }

    #[quickcheck]
    fn integers_survive(a: u64, b: i32, c: i8) -> bool {
        cycle(a) && cycle(b) && cycle(c)
    }

    #[test]
    fn short_integer_buffers_are_rejected() {
        let err = RawCodec
            .decode(Bytes::from_static(&[1, 2]), type_name::<u32>())
            .unwrap_err();
        assert_eq!(Code::InvalidArgument, err.code());
    }

    #[test]
    fn unknown_types_are_rejected() {
        struct Opaque;

        let err = RawCodec.encode(&Value::new(Opaque)).unwrap_err();
        assert_eq!(Code::InvalidArgument, err.code());
        assert!(RawCodec.decode(Bytes::new(), "demo::Opaque").is_err());
    }

    #[test]
    fn unit_and_bool() {
        assert!(cycle(()));
        assert!(cycle(true));
        assert!(RawCodec
            .decode(Bytes::from_static(&[7]), type_name::<bool>())
            .is_err());
    }
}
