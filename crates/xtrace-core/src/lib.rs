// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # X-Trace core
//!
//! Trace-context propagation and validation for distributed request tracing.
//!
//! ## Overview
//!
//! Every unit of work that takes part in a trace carries an X-Trace identifier: a
//! task id shared by the whole trace, an op id unique to the last recorded event and
//! a flags byte holding the sampling decision. Instrumented call sites record entry,
//! exit, info and error events; each event links to its predecessor through `Edge`,
//! so the causal graph of the trace can be rebuilt from a flat event stream.
//!
//! - [`xtrace`]: the wire identifier and its codec
//! - [`sampling`]: the per-trace sampling decision
//! - [`blacklist`]: hosts context must never be sent to or accepted from
//! - [`context`]: the active identifier of one unit of work
//! - [`recorder`]: event creation and sinks
//! - [`propagation`]: `X-Trace` header injection and response adoption
//! - [`tracer`]: hook interface tying the above together for call sites
//! - [`edge_graph`]: offline validation of recorded streams
//! - [`config`]: shared, live-updatable configuration
//! - [`logger`]: log line formatter for binaries

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod blacklist;
pub mod config;
pub mod context;
pub mod edge_graph;
pub mod error;
pub mod event;
pub mod logger;
pub mod propagation;
pub mod recorder;
pub mod sampling;
pub mod tracer;
pub mod xtrace;

pub use config::{tracing_mode::TracingMode, Config, SharedConfig};
pub use context::Context;
pub use edge_graph::{validate_edges, EdgeReport, EdgeValidator};
pub use error::Error;
pub use event::{Event, Kvs, Label, Value};
pub use propagation::{Adoption, X_TRACE_HEADER};
pub use recorder::{EventSink, MemorySink, Recorder};
pub use sampling::{SamplingPolicy, SAMPLE_RATE_DENOMINATOR};
pub use tracer::{SpanGuard, Tracer};
pub use xtrace::{OpId, TaskId, XTrace};
