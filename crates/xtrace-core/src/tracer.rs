// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hook interface for instrumented call sites.
//!
//! A call site does not patch anything; it holds a [`Tracer`] and its own
//! [`Context`] and calls the hooks around the work it wants traced:
//!
//! ```text
//! start_trace(incoming header)
//!   span("rack")                    entry ... exit on drop
//!     before_remote_call("faraday") entry + X-Trace header on the request
//!     after_remote_call("faraday")  response header merged + exit
//! end_trace
//! ```

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::SharedConfig;
use crate::context::Context;
use crate::event::{Event, Kvs, Value};
use crate::propagation::carrier::{Extractor, Injector};
use crate::propagation::{self, Adoption};
use crate::recorder::{EventSink, Recorder};

/// Kvs added to the client span entry of a remote call.
pub const IS_SERVICE_KEY: &str = "IsService";
pub const REMOTE_HOST_KEY: &str = "RemoteHost";
pub const BLACKLISTED_KEY: &str = "Blacklisted";

/// Entry point for instrumented call sites.
///
/// Holds the live configuration and the recorder; every hook takes the caller's
/// [`Context`] explicitly. Clones share both.
#[derive(Clone)]
pub struct Tracer {
    config: SharedConfig,
    recorder: Recorder,
}

impl Tracer {
    /// Builds a tracer recording into `sink`.
    #[must_use]
    pub fn new(config: SharedConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            recorder: Recorder::new(sink),
        }
    }

    /// The live configuration. Changes apply to the next decision taken.
    #[must_use]
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// The underlying recorder, for events outside the hook set.
    #[must_use]
    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Sets up `context` for a new unit of work.
    ///
    /// # Arguments
    ///
    /// * `context` - The context of the unit of work, reset by this call
    /// * `incoming` - The `X-Trace` header of the request that started it, if any
    ///
    /// # Returns
    ///
    /// Whether the unit of work is traced and sampled.
    pub fn start_trace(&self, context: &mut Context, incoming: Option<&str>) -> bool {
        let policy = self.config.sampling_policy();
        match context.inherit(incoming, &policy) {
            Some(xtrace) => debug!("Starting unit of work with X-Trace {xtrace}"),
            None => debug!("Starting unit of work untraced ({})", policy.tracing_mode),
        }
        context.is_sampled()
    }

    /// Drops whatever trace `context` carries.
    pub fn end_trace(&self, context: &mut Context) {
        if context.depth() > 0 {
            warn!(
                "Ending trace with {} span(s) still open",
                context.depth()
            );
        }
        context.clear();
    }

    /// A sampled trace is active in `context`.
    #[must_use]
    pub fn tracing(&self, context: &Context) -> bool {
        context.is_sampled()
    }

    /// Records the entry of `layer` now and its exit when the guard is dropped.
    pub fn span<'a>(&'a self, context: &'a mut Context, layer: &str, kvs: Kvs) -> SpanGuard<'a> {
        let entry = self.recorder.record_entry(context, layer, kvs);
        let active = context.is_active();
        SpanGuard {
            tracer: self,
            context,
            layer: layer.to_string(),
            exit_kvs: Kvs::new(),
            entry,
            finished: !active,
        }
    }

    /// Records an `info` event in the innermost open span.
    pub fn info(&self, context: &mut Context, layer: &str, kvs: Kvs) -> Option<Event> {
        self.recorder.record_info(context, layer, kvs)
    }

    /// Records an `error` event for a failure observed in `layer`.
    pub fn error(
        &self,
        context: &mut Context,
        layer: &str,
        error_class: &str,
        message: &str,
    ) -> Option<Event> {
        self.recorder
            .record_error(context, layer, error_class, message)
    }

    /// Writes the `X-Trace` header for a request to `host`, unless it is blacklisted.
    pub fn inject(&self, context: &Context, host: &str, carrier: &mut dyn Injector) -> bool {
        propagation::inject(context, host, &self.config, carrier)
    }

    /// Merges the sampled bit of a response from `host`, unless it is blacklisted.
    pub fn adopt_response(
        &self,
        context: &mut Context,
        host: &str,
        carrier: &dyn Extractor,
    ) -> Adoption {
        propagation::adopt_response(context, host, &self.config, carrier)
    }

    /// Copies `context` for work handed to another thread or task.
    ///
    /// A trace that has not recorded anything yet gets its root event, an `info`
    /// for `layer`, before the copy is made.
    pub fn fork(&self, context: &mut Context, layer: &str) -> Context {
        self.recorder.fork(context, layer)
    }

    /// Opens the client span of an outgoing call to `host` and propagates the context
    /// to the request.
    ///
    /// The entry carries `IsService` and `RemoteHost`, plus `Blacklisted` when the
    /// host is blacklisted, in which case no header is written.
    pub fn before_remote_call(
        &self,
        context: &mut Context,
        layer: &str,
        host: &str,
        mut kvs: Kvs,
        carrier: &mut dyn Injector,
    ) -> Option<Event> {
        let blacklisted = self.config.blacklisted(host);
        kvs.insert(IS_SERVICE_KEY.to_string(), Value::from(1));
        kvs.insert(REMOTE_HOST_KEY.to_string(), Value::from(host));
        if blacklisted {
            kvs.insert(BLACKLISTED_KEY.to_string(), Value::from(true));
        }

        let entry = self.recorder.record_entry(context, layer, kvs);
        self.inject(context, host, carrier);
        entry
    }

    /// Closes the client span opened by [`Tracer::before_remote_call`], after
    /// folding the response's `X-Trace` header into `context`.
    pub fn after_remote_call(
        &self,
        context: &mut Context,
        layer: &str,
        host: &str,
        carrier: &dyn Extractor,
        kvs: Kvs,
    ) -> (Adoption, Option<Event>) {
        let adoption = self.adopt_response(context, host, carrier);
        debug!("Response X-Trace from {host}: {adoption}");
        let exit = self.recorder.record_exit(context, layer, kvs);
        (adoption, exit)
    }
}

/// An open span. The exit event is recorded when the guard is finished or dropped.
pub struct SpanGuard<'a> {
    tracer: &'a Tracer,
    context: &'a mut Context,
    layer: String,
    exit_kvs: Kvs,
    entry: Option<Event>,
    finished: bool,
}

impl<'a> SpanGuard<'a> {
    /// The context the span was opened on.
    #[must_use]
    pub fn context(&self) -> &Context {
        &*self.context
    }

    /// The context, for nesting spans or propagating inside this one.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut *self.context
    }

    /// The tracer that opened this span.
    #[must_use]
    pub fn tracer(&self) -> &'a Tracer {
        self.tracer
    }

    /// The entry event, `None` when the trace is unsampled or absent.
    #[must_use]
    pub fn entry(&self) -> Option<&Event> {
        self.entry.as_ref()
    }

    /// Adds a key/value to the exit event, e.g. a response status.
    pub fn add_exit_kv(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.exit_kvs.insert(key.into(), value.into());
    }

    /// Records the exit now and returns it.
    pub fn finish(mut self) -> Option<Event> {
        self.record_exit()
    }

    fn record_exit(&mut self) -> Option<Event> {
        if self.finished {
            return None;
        }
        self.finished = true;
        let kvs = std::mem::take(&mut self.exit_kvs);
        self.tracer
            .recorder
            .record_exit(&mut *self.context, &self.layer, kvs)
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        self.record_exit();
    }
}
