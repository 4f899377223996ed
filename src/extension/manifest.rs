// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Manifest locations and the `name=identifier` line format.
use crate::error::{Error, Result};
use log::debug;
use std::{borrow::Cow, fmt, fs, io, path::PathBuf};

/// A place manifests may be read from.
pub(crate) enum Location {
    /// Manifest text for a single extension point.
    Inline {
        point: &'static str,
        text: Cow<'static, str>,
    },

    /// A directory holding one file per extension point.
    Dir(PathBuf),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Inline { point, .. } => write!(f, "<inline {}>", point),
            Location::Dir(dir) => write!(f, "{}", dir.display()),
        }
    }
}

impl Location {
    /// Read the manifest for `point`, if this location has one.
    pub(crate) fn read(&self, point: &str) -> Result<Option<Cow<'_, str>>> {
        match self {
            Location::Inline { point: p, text } if *p == point => {
                Ok(Some(Cow::Borrowed(text.as_ref())))
            }
            Location::Inline { .. } => Ok(None),

            Location::Dir(dir) => match fs::read_to_string(dir.join(point)) {
                Ok(text) => Ok(Some(Cow::Owned(text))),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::Configuration(format!(
                    "failed to read manifest for {} in {}: {}",
                    point,
                    dir.display(),
                    e
                ))),
            },
        }
    }
}

/// One `name=identifier` binding.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Entry<'a> {
    /// 1-based line number.
    pub line: usize,
    pub name: &'a str,
    pub identifier: &'a str,
}

/// Parse manifest text. Comments (`#` to end of line) and blank lines are skipped, as
/// are lines without an `=`.
pub(crate) fn parse(text: &str) -> Vec<Entry<'_>> {
    (text.lines().enumerate())
        .filter_map(|(i, raw)| {
            let line = raw.split('#').next().unwrap_or("").trim();

            if line.is_empty() {
                return None;
            }

            let (name, identifier) = match line.find('=') {
                Some(at) => (&line[..at], &line[at + 1..]),
                None => {
                    debug!("skipping manifest line {} without '=': {:?}", i + 1, raw);
                    return None;
                }
            };

            Some(Entry {
                line: i + 1,
                name: name.trim(),
                identifier: identifier.trim(),
            })
        })
        .collect()
}
