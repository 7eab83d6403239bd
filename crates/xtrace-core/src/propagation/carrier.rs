// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Carriers the `X-Trace` header is written to and read from.
//!
//! Keys are case-insensitive: they are stored and looked up lowercased, so
//! `X-Trace`, `x-trace` and `X-TRACE` all name the same header.

use std::collections::HashMap;

use serde_json::Value;

/// Write side of a carrier, e.g. outgoing request headers.
pub trait Injector {
    fn set(&mut self, key: &str, value: String);
}

/// Read side of a carrier, e.g. response headers.
pub trait Extractor {
    fn get(&self, key: &str) -> Option<&str>;

    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        let lowered = key.to_lowercase();
        if let Some(value) = HashMap::get(self, &lowered) {
            return Some(value.as_str());
        }
        // maps built directly by callers may keep the original casing
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        HashMap::keys(self).map(String::as_str).collect::<Vec<_>>()
    }
}

/// Only `Value::Object` carries headers; other variants ignore writes.
impl Injector for Value {
    fn set(&mut self, key: &str, value: String) {
        if let Value::Object(map) = self {
            map.insert(key.to_lowercase(), Value::String(value));
        }
    }
}

impl Extractor for Value {
    fn get(&self, key: &str) -> Option<&str> {
        let Value::Object(map) = self else {
            return None;
        };
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        if let Value::Object(map) = self {
            map.keys().map(String::as_str).collect::<Vec<_>>()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_map_get() {
        let mut carrier = HashMap::new();
        carrier.set("X-Trace", "value".to_string());

        assert_eq!(
            Extractor::get(&carrier, "X-TRACE"),
            Some("value"),
            "case insensitive extraction"
        );
    }

    #[test]
    fn hash_map_get_original_casing() {
        let carrier = HashMap::from([("X-Trace".to_string(), "value".to_string())]);
        assert_eq!(Extractor::get(&carrier, "x-trace"), Some("value"));
    }

    #[test]
    fn hash_map_keys() {
        let mut carrier = HashMap::new();
        carrier.set("X-Trace", "value1".to_string());
        carrier.set("Content-Type", "value2".to_string());

        let got = Extractor::keys(&carrier);
        assert_eq!(got.len(), 2);
        assert!(got.contains(&"x-trace"));
        assert!(got.contains(&"content-type"));
    }

    #[test]
    fn serde_value_get() {
        let mut carrier = Value::Object(serde_json::Map::new());
        carrier.set("X-Trace", "value".to_string());

        assert_eq!(
            Extractor::get(&carrier, "x-TRACE"),
            Some("value"),
            "case insensitive extraction"
        );
    }

    #[test]
    fn serde_value_non_object() {
        let mut carrier = Value::Null;
        carrier.set("X-Trace", "value".to_string());
        assert_eq!(Extractor::get(&carrier, "X-Trace"), None);
        assert!(Extractor::keys(&carrier).is_empty());
    }
}
