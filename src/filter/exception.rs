// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
use super::{Filter, FilterSpec, Scope};
use crate::{
    error::Result,
    invocation::{Invocation, RpcResult},
    invoker::Invoker,
};
use log::{error, warn};

/// Logs failures on the provider side. Never suppresses them.
#[derive(Copy, Clone, Debug, Default)]
pub struct ExceptionFilter;

impl ExceptionFilter {
    /// The identifier this filter is registered under by
    /// [with_builtins](crate::RegistryBuilder::with_builtins).
    pub const IDENTIFIER: &'static str = "brisk::filter::ExceptionFilter";
}

#[crate::async_trait]
impl Filter for ExceptionFilter {
    fn spec(&self) -> FilterSpec {
        FilterSpec::new("exception", -10000, Scope::Provider).auto()
    }

    async fn invoke(&self, next: &dyn Invoker, inv: &Invocation) -> Result<RpcResult> {
        let result = next.invoke(inv).await;

        match &result {
            Ok(r) => {
                if let Some(status) = r.get_exception() {
                    warn!(
                        "{}.{} failed: {:?}: {}",
                        inv.service(),
                        inv.method(),
                        status.code(),
                        status.message()
                    );
                }
            }

            Err(e) => error!("{}.{} raised: {}", inv.service(), inv.method(), e),
        }

        result
    }
}
