// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! The byte-moving boundary beneath remote protocols.
//!
//! A [Transport] owns connections, framing and reconnection. Protocols only hand it
//! opaque request frames and expect opaque response frames back.
mod loopback;

pub use loopback::LoopbackTransport;

use super::{error::Result, extension::ExtensionPoint, url::Url};
use bytes::Bytes;
use std::sync::Arc;
use tonic::Status;

/// Server-side receiver of request frames.
#[crate::async_trait]
pub trait FrameHandler: Send + Sync {
    /// Handle one request frame, producing one response frame.
    async fn handle(&self, frame: Bytes) -> Bytes;
}

/// Moves frames between endpoints.
#[crate::async_trait]
pub trait Transport: Send + Sync {
    /// Send a request frame to the endpoint at `target` and wait for its response.
    ///
    /// Unreachable endpoints are reported as [Status::unavailable].
    async fn request(&self, target: &Url, frame: Bytes) -> std::result::Result<Bytes, Status>;

    /// Start accepting request frames at the endpoint `local`.
    fn listen(&self, local: &Url, handler: Arc<dyn FrameHandler>) -> Result<()>;

    /// Stop accepting request frames at the endpoint `local`. Idempotent.
    fn close(&self, local: &Url);
}

impl ExtensionPoint for dyn Transport {
    const NAME: &'static str = "brisk.Transport";
    const DEFAULT: &'static str = "loopback";
}
