// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sampling decisions.
//!
//! A trace is sampled or dropped as a whole. The decision is rolled once, at the root
//! span of the process that originates the trace, and every later hop honors the
//! sampled bit it receives in the incoming X-Trace instead of rolling again.

use crate::config::tracing_mode::TracingMode;
use crate::xtrace::XTrace;

/// Denominator of `sample_rate`: the rate is expressed in parts per million.
pub const SAMPLE_RATE_DENOMINATOR: u32 = 1_000_000;

/// Snapshot of the sampling configuration taken under the config read lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPolicy {
    pub tracing_mode: TracingMode,
    /// Probability of sampling a new root trace, in parts per million.
    pub sample_rate: u32,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            tracing_mode: TracingMode::Always,
            sample_rate: SAMPLE_RATE_DENOMINATOR,
        }
    }
}

impl SamplingPolicy {
    /// `sample_rate` is in parts per million and is clamped to
    /// [`SAMPLE_RATE_DENOMINATOR`].
    #[must_use]
    pub fn new(tracing_mode: TracingMode, sample_rate: u32) -> Self {
        Self {
            tracing_mode,
            sample_rate,
        }
    }

    /// Whether the span about to start belongs to a sampled trace.
    ///
    /// * `never`: always `false`.
    /// * `always`: the upstream flag when there is incoming context, otherwise a roll
    ///   against `sample_rate`.
    /// * `through`: the upstream flag when there is incoming context, otherwise `false`.
    #[must_use]
    pub fn should_sample(&self, has_incoming_context: bool, incoming_is_sampled: bool) -> bool {
        match self.tracing_mode {
            TracingMode::Never => false,
            TracingMode::Always if has_incoming_context => incoming_is_sampled,
            TracingMode::Always => self.roll(),
            TracingMode::Through => has_incoming_context && incoming_is_sampled,
        }
    }

    /// [`should_sample`](Self::should_sample) for an already decoded incoming identifier.
    #[must_use]
    pub fn should_sample_incoming(&self, incoming: Option<&XTrace>) -> bool {
        self.should_sample(
            incoming.is_some(),
            incoming.is_some_and(XTrace::is_sampled),
        )
    }

    /// Whether a process with this policy may start a trace of its own.
    #[must_use]
    pub fn may_originate(&self) -> bool {
        self.tracing_mode == TracingMode::Always
    }

    fn roll(&self) -> bool {
        if self.sample_rate >= SAMPLE_RATE_DENOMINATOR {
            return true;
        }
        if self.sample_rate == 0 {
            return false;
        }
        fastrand::u32(..SAMPLE_RATE_DENOMINATOR) < self.sample_rate
    }
}
