// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event recording.
//!
//! The [`Recorder`] stamps events with the identifier of the [`Context`] it is given,
//! moves the context to a fresh op id and hands sampled events to an [`EventSink`].
//! Every event gets its own op id and links back, through `Edge`, to the op id of the
//! event recorded just before it in the same context:
//!
//! ```text
//! entry  outer  op A  (no edge: trace root)
//! entry  inner  op B  edge A
//! exit   inner  op C  edge B
//! exit   outer  op D  edge C
//! ```
//!
//! Events of unsampled traces are not emitted, but the context still moves through
//! the same entries and exits so nesting stays balanced.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::context::Context;
use crate::event::{Event, Kvs, Label, Value};
use crate::xtrace::{OpId, XTrace};

/// Receives finished events in creation order.
pub trait EventSink: Send + Sync {
    fn append(&self, event: Event);
}

/// Sink that keeps events in memory, for tests and in-process inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn append(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Stamps events with the identifier of a [`Context`] and hands them to a sink.
///
/// Cheap to clone; clones share the sink.
#[derive(Clone)]
pub struct Recorder {
    sink: Arc<dyn EventSink>,
}

impl Recorder {
    /// Records into `sink`. Events are handed to the sink as they are created.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Opens a span: records an `entry` event and pushes a new op id onto `context`.
    ///
    /// # Arguments
    ///
    /// * `context` - The unit of work the span belongs to
    /// * `layer` - Name of the instrumented component, e.g. `faraday`
    /// * `kvs` - Extension key/values for the entry event
    ///
    /// # Returns
    ///
    /// The emitted event, or `None` when the trace is unsampled. Returns `None`
    /// without touching the context when no trace is active.
    pub fn record_entry(&self, context: &mut Context, layer: &str, kvs: Kvs) -> Option<Event> {
        let Some(previous) = context.current().copied() else {
            trace!("No active trace, skipping {layer} entry");
            return None;
        };
        let edge = context.edge();
        let next = previous.with_new_op_id();
        let sampled = next.is_sampled();
        context.enter_span(next, layer, sampled);

        if !sampled {
            return None;
        }
        Some(self.emit(layer, Label::Entry, next, edge, kvs))
    }

    /// Closes the innermost span opened by [`Recorder::record_entry`].
    ///
    /// The `exit` event links to the last event recorded inside the span, so nested
    /// spans in between keep the chain connected. A span whose entry was emitted
    /// always gets its exit, even when a downstream service turned sampling off
    /// while it was open.
    pub fn record_exit(&self, context: &mut Context, layer: &str, kvs: Kvs) -> Option<Event> {
        let Some(last) = context.current().copied() else {
            trace!("No active trace, skipping {layer} exit");
            return None;
        };
        let edge = context.edge();
        let Ok(entry_emitted) = context.exit_span(layer) else {
            return None;
        };
        if !entry_emitted {
            return None;
        }

        let next = last.with_new_op_id();
        context.advance(next);

        Some(self.emit(layer, Label::Exit, next, edge, kvs))
    }

    /// Records a single `info` event inside whatever span is open.
    ///
    /// Unsampled traces emit nothing and keep their current op id, so a later
    /// exit still links to an emitted event.
    pub fn record_info(&self, context: &mut Context, layer: &str, kvs: Kvs) -> Option<Event> {
        self.record_single(context, layer, Label::Info, kvs)
    }

    /// Records an `error` event for a failure observed in `layer`, carrying
    /// `ErrorClass` and `ErrorMsg`.
    pub fn record_error(
        &self,
        context: &mut Context,
        layer: &str,
        error_class: &str,
        message: &str,
    ) -> Option<Event> {
        let mut kvs = Kvs::new();
        kvs.insert("ErrorClass".to_string(), Value::from(error_class));
        kvs.insert("ErrorMsg".to_string(), Value::from(message));
        self.record_single(context, layer, Label::Error, kvs)
    }

    /// Copies `context` for another unit of work.
    ///
    /// A trace originated here that has not recorded anything yet gets its root
    /// event first, as an `info` event for `layer`, so that the parent and the fork
    /// both link to it instead of each starting a root of their own.
    pub fn fork(&self, context: &mut Context, layer: &str) -> Context {
        if context.root_pending() {
            debug!("Recording the {layer} root before handing the trace off");
            self.record_single(context, layer, Label::Info, Kvs::new());
        }
        context.fork()
    }

    fn record_single(
        &self,
        context: &mut Context,
        layer: &str,
        label: Label,
        kvs: Kvs,
    ) -> Option<Event> {
        let Some(previous) = context.current().copied() else {
            trace!("No active trace, skipping {layer} {label}");
            return None;
        };
        if !previous.is_sampled() {
            return None;
        }
        let edge = context.edge();
        let next = previous.with_new_op_id();
        context.advance(next);

        Some(self.emit(layer, label, next, edge, kvs))
    }

    fn emit(
        &self,
        layer: &str,
        label: Label,
        x_trace: XTrace,
        edge: Option<OpId>,
        kvs: Kvs,
    ) -> Event {
        let event = Event::new(layer, label, x_trace, edge, kvs);
        debug!("Recorded {label} event for {layer}: {x_trace}");
        self.sink.append(event.clone());
        event
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn recorder() -> (Recorder, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (Recorder::new(sink.clone()), sink)
    }

    #[test]
    fn test_no_trace_records_nothing() {
        let (recorder, sink) = recorder();
        let mut context = Context::new();

        assert!(recorder.record_entry(&mut context, "a", Kvs::new()).is_none());
        assert!(recorder.record_info(&mut context, "a", Kvs::new()).is_none());
        assert!(recorder.record_exit(&mut context, "a", Kvs::new()).is_none());
        assert!(sink.is_empty());
        assert_eq!(context.depth(), 0);
    }

    #[test]
    fn test_nested_spans_chain_edges() {
        let (recorder, sink) = recorder();
        let mut context = Context::new();
        context.start_root(true);

        let root_entry = recorder.record_entry(&mut context, "outer", Kvs::new()).unwrap();
        let inner_entry = recorder.record_entry(&mut context, "inner", Kvs::new()).unwrap();
        let inner_exit = recorder.record_exit(&mut context, "inner", Kvs::new()).unwrap();
        let root_exit = recorder.record_exit(&mut context, "outer", Kvs::new()).unwrap();

        assert!(root_entry.is_root());
        assert_eq!(inner_entry.edge(), Some(root_entry.op_id()));
        assert_eq!(inner_exit.edge(), Some(inner_entry.op_id()));
        assert_eq!(root_exit.edge(), Some(inner_exit.op_id()));

        let events = sink.events();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.task_id() == root_entry.task_id()));
        assert_eq!(context.depth(), 0);
    }

    #[test]
    fn test_info_links_to_current_op() {
        let (recorder, _sink) = recorder();
        let mut context = Context::new();
        context.start_root(true);

        let entry = recorder.record_entry(&mut context, "a", Kvs::new()).unwrap();
        let info = recorder.record_info(&mut context, "a", Kvs::new()).unwrap();
        let exit = recorder.record_exit(&mut context, "a", Kvs::new()).unwrap();

        assert_eq!(info.label(), Label::Info);
        assert_eq!(info.edge(), Some(entry.op_id()));
        assert_eq!(exit.edge(), Some(info.op_id()));
    }

    #[test]
    fn test_error_event_kvs() {
        let (recorder, _sink) = recorder();
        let mut context = Context::new();
        context.start_root(true);
        recorder.record_entry(&mut context, "a", Kvs::new());

        let error = recorder
            .record_error(&mut context, "a", "Timeout", "read timed out")
            .unwrap();
        assert_eq!(error.label(), Label::Error);
        assert_eq!(error.get("ErrorClass"), Some(&Value::from("Timeout")));
        assert_eq!(error.get("ErrorMsg"), Some(&Value::from("read timed out")));
    }

    #[test]
    fn test_unsampled_trace_emits_nothing_but_stays_balanced() {
        let (recorder, sink) = recorder();
        let mut context = Context::new();
        let root = *context.start_root(false);

        assert!(recorder.record_entry(&mut context, "a", Kvs::new()).is_none());
        assert_eq!(context.depth(), 1);
        assert!(recorder.record_exit(&mut context, "a", Kvs::new()).is_none());
        assert_eq!(context.depth(), 0);
        assert!(sink.is_empty());
        assert_eq!(context.current().unwrap().task_id(), root.task_id());
    }

    #[test]
    fn test_unmatched_exit_self_heals() {
        let (recorder, sink) = recorder();
        let mut context = Context::new();
        context.start_root(true);

        assert!(recorder.record_exit(&mut context, "a", Kvs::new()).is_none());
        assert!(!context.is_active());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_remote_parent_becomes_first_edge() {
        let (recorder, _sink) = recorder();
        let upstream = XTrace::new_root(true);
        let mut context = Context::from_xtrace(upstream);

        let entry = recorder.record_entry(&mut context, "a", Kvs::new()).unwrap();
        assert_eq!(entry.edge(), Some(upstream.op_id()));
        assert_eq!(entry.task_id(), upstream.task_id());
    }

    #[test]
    fn test_memory_sink_take() {
        let (recorder, sink) = recorder();
        let mut context = Context::new();
        context.start_root(true);
        recorder.record_info(&mut context, "a", Kvs::new());

        assert_eq!(sink.take().len(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_sampling_turned_off_mid_span_still_closes_open_spans() {
        let (recorder, sink) = recorder();
        let mut context = Context::new();
        context.start_root(true);

        recorder.record_entry(&mut context, "rack", Kvs::new()).unwrap();
        recorder.record_entry(&mut context, "faraday", Kvs::new()).unwrap();
        context.set_sampled_flag(false);

        assert!(recorder.record_info(&mut context, "faraday", Kvs::new()).is_none());
        assert!(recorder.record_entry(&mut context, "nested", Kvs::new()).is_none());
        assert!(recorder.record_exit(&mut context, "nested", Kvs::new()).is_none());
        let faraday_exit = recorder.record_exit(&mut context, "faraday", Kvs::new()).unwrap();
        let rack_exit = recorder.record_exit(&mut context, "rack", Kvs::new()).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 4);
        assert_eq!(faraday_exit.edge(), Some(events[1].op_id()));
        assert_eq!(rack_exit.edge(), Some(faraday_exit.op_id()));
        assert!(crate::edge_graph::validate_edges(&events).is_valid());
        assert_eq!(context.depth(), 0);
    }

    #[test]
    fn test_fork_before_first_event_records_single_root() {
        let (recorder, sink) = recorder();
        let mut context = Context::new();
        context.start_root(true);

        let mut forked = recorder.fork(&mut context, "job");
        recorder.record_entry(&mut forked, "worker", Kvs::new()).unwrap();
        recorder.record_exit(&mut forked, "worker", Kvs::new()).unwrap();
        recorder.record_entry(&mut context, "job", Kvs::new()).unwrap();
        recorder.record_exit(&mut context, "job", Kvs::new()).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 5);
        let report = crate::edge_graph::validate_edges(&events);
        assert!(report.is_valid());
        assert_eq!(report.roots(), &[0]);
        assert_eq!(events[1].edge(), Some(events[0].op_id()));
        assert_eq!(events[3].edge(), Some(events[0].op_id()));
    }

    #[test]
    fn test_fork_after_first_event_records_nothing_extra() {
        let (recorder, sink) = recorder();
        let mut context = Context::new();
        context.start_root(true);
        let entry = recorder.record_entry(&mut context, "job", Kvs::new()).unwrap();

        let forked = recorder.fork(&mut context, "job");
        assert_eq!(sink.len(), 1);
        assert_eq!(forked.current(), Some(entry.x_trace()));
        assert_eq!(forked.depth(), 0);
    }
}
