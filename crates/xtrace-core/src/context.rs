// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The active X-Trace of one unit of work.
//!
//! A [`Context`] is an owned value, not a global: each thread or async task that does
//! traced work holds its own and passes it by `&mut` to the recorder and the
//! propagation helpers. Handing work to another unit means copying the identifier
//! into a new context with [`Recorder::fork`](crate::recorder::Recorder::fork), never
//! sharing the cell.
//!
//! Entries and exits nest. [`Context::enter`] saves the identifier that was active
//! and [`Context::exit`] restores it; an exit with nothing to pop is a bug in the
//! caller, reported as [`Error::ContextUnderflow`], and resets the context to
//! "no trace" instead of carrying a corrupted stack forward.

use tracing::{debug, error, warn};

use crate::config::tracing_mode::TracingMode;
use crate::error::Error;
use crate::sampling::SamplingPolicy;
use crate::xtrace::{OpId, XTrace};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    saved: Option<XTrace>,
    layer: Option<String>,
    /// The entry event of this span reached the sink, so its exit must too.
    emitted: bool,
}

/// The active X-Trace of one unit of work, plus the identifiers to restore
/// as its spans close.
///
/// A context belongs to one thread of execution. Work handed to another
/// thread gets its own copy through [`crate::Tracer::fork`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Context {
    current: Option<XTrace>,
    /// Set while the current identifier was originated here and no event has been
    /// recorded with it yet, so the next event is the trace root and carries no edge.
    root_pending: bool,
    frames: Vec<Frame>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A context continuing `xtrace`, as received from another unit of work.
    #[must_use]
    pub fn from_xtrace(xtrace: XTrace) -> Self {
        Self {
            current: Some(xtrace),
            root_pending: false,
            frames: Vec::new(),
        }
    }

    /// The identifier of the last recorded event, or `None` outside a trace.
    #[must_use]
    pub fn current(&self) -> Option<&XTrace> {
        self.current.as_ref()
    }

    /// Encoded form of the current identifier, as sent in the `X-Trace` header.
    #[must_use]
    pub fn to_header(&self) -> Option<String> {
        self.current.map(|x| x.encode())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// A trace is active and sampled.
    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.current.is_some_and(|x| x.is_sampled())
    }

    /// Number of entered spans not yet exited.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The op id the next recorded event links back to; `None` for the trace root.
    #[must_use]
    pub fn edge(&self) -> Option<OpId> {
        if self.root_pending {
            return None;
        }
        self.current.map(|x| *x.op_id())
    }

    /// Originates a fresh trace with the given sampling decision.
    pub fn start_root(&mut self, sampled: bool) -> &XTrace {
        self.frames.clear();
        self.root_pending = true;
        self.current.insert(XTrace::new_root(sampled))
    }

    /// Continues a trace that started elsewhere. Its op id becomes the edge of the
    /// next event.
    pub fn adopt(&mut self, xtrace: XTrace) {
        self.frames.clear();
        self.root_pending = false;
        self.current = Some(xtrace);
    }

    /// Sets up the context at the start of a unit of work.
    ///
    /// A valid `incoming` header is continued with its sampled flag honored. A missing
    /// or malformed one is treated as absent: a fresh root is originated when `policy`
    /// allows it, otherwise the context is left empty.
    pub fn inherit(&mut self, incoming: Option<&str>, policy: &SamplingPolicy) -> Option<&XTrace> {
        if policy.tracing_mode == TracingMode::Never {
            self.clear();
            return None;
        }

        if let Some(header) = incoming {
            match XTrace::decode(header.trim()) {
                Ok(xtrace) => {
                    let sampled = policy.should_sample_incoming(Some(&xtrace));
                    self.adopt(xtrace.with_sampled(sampled));
                    return self.current.as_ref();
                }
                Err(e) => debug!("Ignoring incoming X-Trace {header:?}: {e}"),
            }
        }

        if policy.may_originate() {
            let sampled = policy.should_sample(false, false);
            return Some(self.start_root(sampled));
        }

        self.clear();
        None
    }

    /// Makes `xtrace` current, saving the previous identifier for [`Context::exit`].
    pub fn enter(&mut self, xtrace: XTrace) {
        self.push(xtrace, None, false);
    }

    /// Restores the identifier saved by the matching [`Context::enter`].
    ///
    /// # Errors
    ///
    /// [`Error::ContextUnderflow`] when nothing was entered; the context is reset.
    pub fn exit(&mut self) -> Result<Option<XTrace>, Error> {
        self.pop(None)?;
        Ok(self.current)
    }

    /// Reconciles a downstream sampling decision into every saved identifier, so the
    /// rest of the trace follows it.
    pub fn set_sampled_flag(&mut self, sampled: bool) {
        if let Some(current) = self.current.as_mut() {
            *current = current.with_sampled(sampled);
        }
        for frame in &mut self.frames {
            if let Some(saved) = frame.saved.as_mut() {
                *saved = saved.with_sampled(sampled);
            }
        }
    }

    /// A copy of the current identifier for another unit of work. Open spans stay
    /// with `self`. The pending root, if any, must be recorded first.
    #[must_use]
    pub(crate) fn fork(&self) -> Context {
        Self {
            current: self.current,
            root_pending: self.root_pending,
            frames: Vec::new(),
        }
    }

    /// Drops the identifier and every open span.
    pub fn clear(&mut self) {
        self.current = None;
        self.root_pending = false;
        self.frames.clear();
    }

    /// The next recorded event will be the edge-less root of the trace.
    pub(crate) fn root_pending(&self) -> bool {
        self.root_pending
    }

    pub(crate) fn enter_span(&mut self, xtrace: XTrace, layer: &str, emitted: bool) {
        self.push(xtrace, Some(layer.to_string()), emitted);
    }

    /// Pops the innermost span and returns whether its entry was emitted.
    pub(crate) fn exit_span(&mut self, layer: &str) -> Result<bool, Error> {
        self.pop(Some(layer)).map(|frame| frame.emitted)
    }

    /// Moves to the identifier of an event just recorded outside of span bracketing.
    pub(crate) fn advance(&mut self, xtrace: XTrace) {
        self.current = Some(xtrace);
        self.root_pending = false;
    }

    fn push(&mut self, xtrace: XTrace, layer: Option<String>, emitted: bool) {
        self.frames.push(Frame {
            saved: self.current,
            layer,
            emitted,
        });
        self.current = Some(xtrace);
        self.root_pending = false;
    }

    fn pop(&mut self, layer: Option<&str>) -> Result<Frame, Error> {
        let Some(frame) = self.frames.pop() else {
            error!("Context exit without a matching entry, resetting context");
            self.clear();
            return Err(Error::ContextUnderflow);
        };

        if let (Some(expected), Some(got)) = (frame.layer.as_deref(), layer) {
            if expected != got {
                warn!("Exiting layer {got} while {expected} is the innermost open span");
            }
        }

        self.current = frame.saved;
        Ok(frame)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sampling::SAMPLE_RATE_DENOMINATOR;
    use tracing_test::traced_test;

    fn always(rate: u32) -> SamplingPolicy {
        SamplingPolicy::new(TracingMode::Always, rate)
    }

    #[test]
    fn test_new_context_has_no_trace() {
        let context = Context::new();
        assert!(context.current().is_none());
        assert!(!context.is_active());
        assert!(!context.is_sampled());
        assert_eq!(context.depth(), 0);
        assert_eq!(context.edge(), None);
    }

    #[test]
    fn test_start_root_has_no_edge() {
        let mut context = Context::new();
        let root = *context.start_root(true);
        assert!(root.is_sampled());
        assert_eq!(context.edge(), None);

        context.advance(root.with_new_op_id());
        assert!(context.edge().is_some());
    }

    #[test]
    fn test_enter_exit_nesting() {
        let mut context = Context::new();
        let root = *context.start_root(true);
        let a = root.with_new_op_id();
        let b = a.with_new_op_id();

        context.enter(a);
        context.enter(b);
        assert_eq!(context.depth(), 2);
        assert_eq!(context.current(), Some(&b));

        assert_eq!(context.exit().unwrap(), Some(a));
        assert_eq!(context.exit().unwrap(), Some(root));
        assert_eq!(context.depth(), 0);
    }

    #[test]
    #[traced_test]
    fn test_unmatched_exit_resets_context() {
        let mut context = Context::new();
        context.start_root(true);

        assert_eq!(context.exit(), Err(Error::ContextUnderflow));
        assert!(context.current().is_none());
        assert!(logs_contain("Context exit without a matching entry"));
    }

    #[test]
    #[traced_test]
    fn test_exit_span_layer_mismatch_is_reported() {
        let mut context = Context::new();
        let root = *context.start_root(true);
        context.enter_span(root.with_new_op_id(), "outer", true);

        assert_eq!(context.exit_span("inner"), Ok(true));
        assert!(logs_contain("Exiting layer inner while outer"));
    }

    #[test]
    fn test_inherit_valid_header() {
        let upstream = XTrace::new_root(true);
        let mut context = Context::new();

        let adopted = *context
            .inherit(Some(&upstream.encode()), &always(0))
            .unwrap();
        assert_eq!(adopted, upstream);
        assert_eq!(context.edge(), Some(*upstream.op_id()));
    }

    #[test]
    fn test_inherit_honors_unsampled_upstream() {
        let upstream = XTrace::new_root(false);
        let mut context = Context::new();

        context.inherit(Some(&upstream.encode()), &always(SAMPLE_RATE_DENOMINATOR));
        assert!(context.is_active());
        assert!(!context.is_sampled());
    }

    #[test]
    #[traced_test]
    fn test_inherit_invalid_header_originates_root() {
        let mut context = Context::new();
        let root = *context
            .inherit(Some("2Bnot-a-trace"), &always(SAMPLE_RATE_DENOMINATOR))
            .unwrap();
        assert!(root.is_sampled());
        assert_eq!(context.edge(), None);
        assert!(logs_contain("Ignoring incoming X-Trace"));
    }

    #[test]
    fn test_inherit_through_without_header_starts_nothing() {
        let mut context = Context::new();
        let policy = SamplingPolicy::new(TracingMode::Through, SAMPLE_RATE_DENOMINATOR);
        assert!(context.inherit(None, &policy).is_none());
        assert!(context.inherit(Some("garbage"), &policy).is_none());

        let upstream = XTrace::new_root(true);
        assert!(context.inherit(Some(&upstream.encode()), &policy).is_some());
    }

    #[test]
    fn test_inherit_never_clears() {
        let mut context = Context::new();
        context.start_root(true);
        let policy = SamplingPolicy::new(TracingMode::Never, SAMPLE_RATE_DENOMINATOR);
        let upstream = XTrace::new_root(true);

        assert!(context.inherit(Some(&upstream.encode()), &policy).is_none());
        assert!(!context.is_active());
    }

    #[test]
    fn test_set_sampled_flag_applies_to_saved_frames() {
        let mut context = Context::new();
        let root = *context.start_root(true);
        context.enter(root.with_new_op_id());

        context.set_sampled_flag(false);
        assert!(!context.is_sampled());
        let restored = context.exit().unwrap().unwrap();
        assert!(!restored.is_sampled());
        assert_eq!(restored.task_id(), root.task_id());
    }

    #[test]
    fn test_fork_copies_identifier_not_frames() {
        let mut context = Context::new();
        let root = *context.start_root(true);
        context.enter(root.with_new_op_id());

        let mut forked = context.fork();
        assert_eq!(forked.current(), context.current());
        assert_eq!(forked.depth(), 0);

        forked.set_sampled_flag(false);
        assert!(context.is_sampled());
    }
}
