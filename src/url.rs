// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! The configuration carrier.
//!
//! Every extension-selection decision and registry operation is keyed off values read
//! from a [Url]. The textual form is `protocol://host:port/path?key=value&...`, where
//! `path` names the service interface.
use super::error::{Error, Result};
use http::Uri;
use log::warn;
use std::{
    collections::BTreeMap,
    convert::TryFrom,
    fmt,
    str::FromStr,
    time::Duration,
};

/// Well-known parameter keys.
pub mod keys {
    /// Service group; part of the service key.
    pub const GROUP: &str = "group";
    /// Service version; part of the service key.
    pub const VERSION: &str = "version";
    /// Per-call timeout in milliseconds.
    pub const TIMEOUT: &str = "timeout";
    /// Name of the [Codec][crate::Codec] extension to use.
    pub const SERIALIZATION: &str = "serialization";
    /// Name of the [Transport][crate::Transport] extension to use.
    pub const TRANSPORT: &str = "transport";
    /// Name of the [Cluster][crate::Cluster] extension to use.
    pub const CLUSTER: &str = "cluster";
    /// Name of the [Selector][crate::Selector] extension to use.
    pub const SELECTOR: &str = "selector";
    /// Maximum number of retries after the first failed attempt.
    pub const RETRIES: &str = "retries";
    /// Base retry interval in milliseconds.
    pub const RETRY_INTERVAL: &str = "retry.interval";
    /// Upper bound on the retry interval in milliseconds.
    pub const RETRY_MAX_INTERVAL: &str = "retry.max.interval";
    /// Comma separated filter names to activate (or deactivate, with a `-` prefix).
    pub const FILTER: &str = "filter";
    /// Permits granted per rate limiting interval.
    pub const RATELIMIT_PERMITS: &str = "ratelimit.permits";
    /// Rate limiting interval in milliseconds.
    pub const RATELIMIT_INTERVAL: &str = "ratelimit.interval";
    /// Consecutive failures that open a circuit.
    pub const CIRCUIT_FAILURES: &str = "circuit.failures";
    /// Milliseconds a circuit stays open before a probe is let through.
    pub const CIRCUIT_OPEN: &str = "circuit.open";
}

/// A parsed configuration url.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Url {
    protocol: String,
    host: String,
    port: u16,
    path: String,
    params: BTreeMap<String, String>,
}

impl Url {
    /// Create a url without any parameters.
    pub fn new<P, H, S>(protocol: P, host: H, port: u16, path: S) -> Self
    where
        P: Into<String>,
        H: Into<String>,
        S: Into<String>,
    {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            path: path.into().trim_start_matches('/').to_owned(),
            params: BTreeMap::new(),
        }
    }

    /// Returns a copy of this url with `key` set to `val`.
    pub fn with_param<K: Into<String>, V: ToString>(mut self, key: K, val: V) -> Self {
        self.params.insert(key.into(), val.to_string());
        self
    }

    /// Returns a copy of this url with every parameter of `other` set, overriding
    /// parameters of the same name.
    pub fn with_params_of(mut self, other: &Url) -> Self {
        (self.params).extend(other.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Returns a copy of this url with a different protocol.
    pub fn with_protocol<P: Into<String>>(mut self, protocol: P) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Returns a copy of this url with a different path.
    pub fn with_path<S: Into<String>>(mut self, path: S) -> Self {
        self.path = path.into().trim_start_matches('/').to_owned();
        self
    }

    /// Returns the protocol scheme.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Returns the host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `host:port`, which identifies one physical endpoint.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the path, which names the service interface.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns all parameters.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Returns the value of a parameter, if it is set and non-empty.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Returns the value of a parameter, or `default` if it is unset.
    pub fn param_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.param(key).unwrap_or(default)
    }

    /// Parse the value of a parameter. Unparseable values are logged and treated as unset.
    pub fn parse_param<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.param(key)?;

        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("ignoring unparseable url parameter: {}={}", key, raw);
                None
            }
        }
    }

    /// Parse a parameter holding a number of milliseconds.
    pub fn millis_param(&self, key: &str) -> Option<Duration> {
        self.parse_param(key).map(Duration::from_millis)
    }

    /// Returns the `group/path:version` key that identifies one logical service. The
    /// group and version parts are omitted when unset.
    pub fn service_key(&self) -> String {
        service_key(
            self.param(keys::GROUP),
            &self.path,
            self.param(keys::VERSION),
        )
    }
}

/// Build a `group/interface:version` service key.
pub fn service_key(group: Option<&str>, interface: &str, version: Option<&str>) -> String {
    let mut key = String::with_capacity(interface.len() + 16);

    if let Some(group) = group.filter(|g| !g.is_empty()) {
        key.push_str(group);
        key.push('/');
    }

    key.push_str(interface);

    if let Some(version) = version.filter(|v| !v.is_empty()) {
        key.push(':');
        key.push_str(version);
    }

    key
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}/{}", self.protocol, self.host, self.port, self.path)?;

        for (i, (k, v)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, k, v)?;
        }

        Ok(())
    }
}

impl FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidUrl {
            url: s.to_owned(),
            reason,
        };

        let uri: Uri = s.parse().map_err(|e| invalid(format!("{}", e)))?;

        let protocol = uri
            .scheme_str()
            .ok_or_else(|| invalid("missing protocol".into()))?;
        let host = uri.host().ok_or_else(|| invalid("missing host".into()))?;
        let port = uri.port_u16().unwrap_or(0);

        let mut url = Url::new(protocol, host, port, uri.path());

        for pair in uri.query().unwrap_or("").split('&') {
            if let Some((k, v)) = parse_pair(pair) {
                url.params.insert(k.to_owned(), v.to_owned());
            }
        }

        Ok(url)
    }
}

fn parse_pair(pair: &str) -> Option<(&str, &str)> {
    let mut it = pair.splitn(2, '=');
    let k = it.next()?;
    guard!(!k.is_empty());
    Some((k, it.next().unwrap_or("")))
}

impl TryFrom<&str> for Url {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn parses_all_parts() {
        let url: Url = "remote://10.0.0.1:7000/demo.Greeter?group=blue&version=1.0&timeout=30"
            .parse()
            .unwrap();

        assert_eq!("remote", url.protocol());
        assert_eq!("10.0.0.1", url.host());
        assert_eq!(7000, url.port());
        assert_eq!("demo.Greeter", url.path());
        assert_eq!("10.0.0.1:7000", url.address());
        assert_eq!(Some(Duration::from_millis(30)), url.millis_param(keys::TIMEOUT));
        assert_eq!("blue/demo.Greeter:1.0", url.service_key());
    }

    #[test]
    fn service_key_omits_unset_parts() {
        let url = Url::new("local", "localhost", 0, "/demo.Greeter");
        assert_eq!("demo.Greeter", url.service_key());
        assert_eq!("demo.Greeter:2", url.with_param(keys::VERSION, 2).service_key());
    }

    #[test]
    fn layered_params_override() {
        let provider = Url::new("remote", "p", 1, "demo.Greeter")
            .with_param(keys::TIMEOUT, 100)
            .with_param(keys::SERIALIZATION, "raw");
        let consumer = Url::new("local", "c", 0, "demo.Greeter").with_param(keys::TIMEOUT, 5);

        let url = provider.with_params_of(&consumer);
        assert_eq!("remote://p:1/demo.Greeter?serialization=raw&timeout=5", url.to_string());
    }

    #[test]
    fn rejects_missing_host() {
        assert!(matches!(
            "demo.Greeter".parse::<Url>(),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[test]
    fn bad_numbers_are_unset() {
        let url = Url::new("local", "h", 0, "s").with_param(keys::RETRIES, "many");
        assert_eq!(None, url.parse_param::<usize>(keys::RETRIES));
    }

    #[quickcheck]
    fn param_order_is_irrelevant(params: BTreeMap<u8, u16>) -> bool {
        let pairs: Vec<_> = (params.iter())
            .map(|(k, v)| format!("k{}={}", k, v))
            .collect();
        let rev: Vec<_> = pairs.iter().rev().cloned().collect();

        let a: Url = format!("local://h:1/s?{}", pairs.join("&")).parse().unwrap();
        let b: Url = format!("local://h:1/s?{}", rev.join("&")).parse().unwrap();

        a == b && a.params().len() == params.len() && a.to_string().parse::<Url>().unwrap() == a
    }
}
