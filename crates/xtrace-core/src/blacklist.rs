// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hosts exempt from cross-process context propagation.
//!
//! A blacklisted host still gets its local span recorded, but no `X-Trace` header is
//! sent to it and none is adopted from its responses.
//!
//! Matching rule: a host matches when any pattern is an ASCII case-insensitive
//! substring of it. The host may be a bare host, a `host:port` authority or a full URL
//! prefix such as `http://127.0.0.4:8101`. Empty patterns never match.

use serde::Deserialize;
use tracing::debug;

/// Ordered, deduplicated host patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Blacklist {
    patterns: Vec<String>,
}

impl Blacklist {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a blacklist from a comma separated list, ignoring blank entries.
    #[must_use]
    pub fn from_env_string(value: &str) -> Self {
        value
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Adds a trimmed pattern. Blank and already present patterns are skipped.
    pub fn add(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        let pattern = pattern.trim();
        if pattern.is_empty() {
            debug!("Ignoring empty blacklist pattern");
            return;
        }
        if !self.patterns.iter().any(|p| p == pattern) {
            self.patterns.push(pattern.to_string());
        }
    }

    /// Removes every pattern.
    pub fn clear(&mut self) {
        self.patterns.clear();
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether any pattern occurs in `host`, ignoring ASCII case.
    ///
    /// Does not allocate.
    #[must_use]
    pub fn blacklisted(&self, host: &str) -> bool {
        if host.is_empty() {
            return false;
        }
        self.patterns
            .iter()
            .any(|p| contains_ignore_ascii_case(host.as_bytes(), p.as_bytes()))
    }
}

fn contains_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}

impl FromIterator<String> for Blacklist {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        let mut blacklist = Blacklist::new();
        for pattern in iter {
            blacklist.add(pattern);
        }
        blacklist
    }
}
