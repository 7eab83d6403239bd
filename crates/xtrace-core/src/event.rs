// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event records.
//!
//! An event is a flat key/value map on the wire. The four keys every consumer relies
//! on are typed fields here; everything an instrumentation point adds goes into the
//! open `kvs` map:
//!
//! ```text
//! {"Layer":"faraday","Label":"entry","X-Trace":"2B...01","Edge":"A1B2C3D4E5F6A7B8","IsService":1}
//! ```
//!
//! The root event of a trace has no `Edge`.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::io::BufRead;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::xtrace::{OpId, TaskId, XTrace};

/// Reserved key names of an event record.
pub const LAYER_KEY: &str = "Layer";
pub const LABEL_KEY: &str = "Label";
pub const X_TRACE_KEY: &str = "X-Trace";
pub const EDGE_KEY: &str = "Edge";

const RESERVED_KEYS: [&str; 4] = [LAYER_KEY, LABEL_KEY, X_TRACE_KEY, EDGE_KEY];

/// Kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Entry,
    Exit,
    Info,
    Error,
}

impl Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Label::Entry => "entry",
            Label::Exit => "exit",
            Label::Info => "info",
            Label::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// Value of an extension key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(BTreeMap<String, Value>),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

/// Extension key/values attached by an instrumentation point.
pub type Kvs = BTreeMap<String, Value>;

/// A single recorded event, serialized as one flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "Layer")]
    layer: String,
    #[serde(rename = "Label")]
    label: Label,
    #[serde(rename = "X-Trace")]
    x_trace: XTrace,
    #[serde(rename = "Edge", default, skip_serializing_if = "Option::is_none")]
    edge: Option<OpId>,
    #[serde(flatten)]
    kvs: Kvs,
}

impl Event {
    /// Builds an event. Extension keys that shadow a well-known key are dropped.
    #[must_use]
    pub fn new(
        layer: impl Into<String>,
        label: Label,
        x_trace: XTrace,
        edge: Option<OpId>,
        mut kvs: Kvs,
    ) -> Self {
        for key in RESERVED_KEYS {
            if kvs.remove(key).is_some() {
                debug!("Dropping reserved key {key} from event key/values");
            }
        }

        Self {
            layer: layer.into(),
            label,
            x_trace,
            edge,
            kvs,
        }
    }

    #[must_use]
    pub fn layer(&self) -> &str {
        &self.layer
    }

    #[must_use]
    pub fn label(&self) -> Label {
        self.label
    }

    #[must_use]
    pub fn x_trace(&self) -> &XTrace {
        &self.x_trace
    }

    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        self.x_trace.task_id()
    }

    /// Op id of this event, which later events name as their `Edge`.
    #[must_use]
    pub fn op_id(&self) -> &OpId {
        self.x_trace.op_id()
    }

    /// The op this event follows, `None` for a root.
    #[must_use]
    pub fn edge(&self) -> Option<&OpId> {
        self.edge.as_ref()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.edge.is_none()
    }

    #[must_use]
    pub fn kvs(&self) -> &Kvs {
        &self.kvs
    }

    /// An extension key/value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.kvs.get(key)
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parses a JSON-lines event stream. Blank lines are skipped.
pub fn read_events(reader: impl BufRead) -> Result<Vec<Event>, Error> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.map_err(|e| Error::MalformedEvent {
            line: line_number,
            message: e.to_string(),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str::<Event>(&line).map_err(|e| Error::MalformedEvent {
            line: line_number,
            message: e.to_string(),
        })?;
        events.push(event);
    }
    Ok(events)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const X_TRACE: &str = "2B0123456789ABCDEF0123456789ABCDEF01234567A1B2C3D4E5F6A7B801";

    fn xtrace() -> XTrace {
        XTrace::decode(X_TRACE).unwrap()
    }

    #[test]
    fn test_serialize_root_event_omits_edge() {
        let mut kvs = Kvs::new();
        kvs.insert("IsService".to_string(), Value::from(1));
        let event = Event::new("faraday", Label::Entry, xtrace(), None, kvs);

        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["Layer"], "faraday");
        assert_eq!(json["Label"], "entry");
        assert_eq!(json["X-Trace"], X_TRACE);
        assert_eq!(json["IsService"], 1);
        assert!(json.get("Edge").is_none());
    }

    #[test]
    fn test_reserved_keys_are_dropped() {
        let mut kvs = Kvs::new();
        kvs.insert("Layer".to_string(), Value::from("spoofed"));
        kvs.insert("Edge".to_string(), Value::from("0000000000000001"));
        kvs.insert("RemoteHost".to_string(), Value::from("127.0.0.1"));

        let event = Event::new("cassandra", Label::Info, xtrace(), None, kvs);
        assert_eq!(event.layer(), "cassandra");
        assert!(event.edge().is_none());
        assert_eq!(event.kvs().len(), 1);
        assert_eq!(event.get("RemoteHost"), Some(&Value::from("127.0.0.1")));
    }

    #[test]
    fn test_deserialize_event_with_nested_kvs() {
        let line = format!(
            r#"{{"Layer":"cassandra","Label":"exit","X-Trace":"{X_TRACE}","Edge":"00F067AA0BA902B7","Query":{{"keyspace":"ks","count":2}},"Blacklisted":true}}"#
        );
        let event: Event = serde_json::from_str(&line).unwrap();

        assert_eq!(event.label(), Label::Exit);
        assert_eq!(event.edge().unwrap().to_string(), "00F067AA0BA902B7");
        assert_eq!(event.get("Blacklisted"), Some(&Value::Bool(true)));
        match event.get("Query").unwrap() {
            Value::Map(map) => assert_eq!(map.get("count"), Some(&Value::Int(2))),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_read_events_skips_blank_lines() {
        let first = Event::new("a", Label::Entry, xtrace(), None, Kvs::new());
        let second_id = xtrace().with_new_op_id();
        let second = Event::new("a", Label::Exit, second_id, Some(*xtrace().op_id()), Kvs::new());
        let stream = format!(
            "{}\n\n{}\n",
            first.to_json().unwrap(),
            second.to_json().unwrap()
        );

        let events = read_events(Cursor::new(stream)).unwrap();
        assert_eq!(events, vec![first, second]);
    }

    #[test]
    fn test_read_events_reports_line_number() {
        let first = Event::new("a", Label::Entry, xtrace(), None, Kvs::new());
        let stream = format!(
            "{}\n{{\"Layer\":\"a\",\"Label\":\"entry\",\"X-Trace\":\"2B00\"}}\n",
            first.to_json().unwrap()
        );

        match read_events(Cursor::new(stream)) {
            Err(Error::MalformedEvent { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
