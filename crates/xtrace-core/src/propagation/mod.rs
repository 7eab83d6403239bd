// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cross-process propagation of the `X-Trace` header.
//!
//! ```text
//! outgoing request   inject: current X-Trace -> header, unless the host is blacklisted
//!        |
//!   remote service
//!        |
//! response           adopt_response: header -> merge sampled bit, same task id only
//! ```
//!
//! Malformed headers are treated as absent and never fail the caller.

use std::fmt::{self, Display};

use tracing::{debug, warn};

use crate::blacklist::Blacklist;
use crate::config::SharedConfig;
use crate::context::Context;
use crate::xtrace::{self, XTrace};
use carrier::{Extractor, Injector};

pub mod carrier;

/// Header carrying the X-Trace on requests and responses. Matched
/// case-insensitively.
pub const X_TRACE_HEADER: &str = "X-Trace";

/// Decides which remote hosts context may flow to and from.
pub trait HostFilter {
    fn blacklisted(&self, host: &str) -> bool;
}

impl HostFilter for Blacklist {
    fn blacklisted(&self, host: &str) -> bool {
        Blacklist::blacklisted(self, host)
    }
}

impl HostFilter for SharedConfig {
    fn blacklisted(&self, host: &str) -> bool {
        SharedConfig::blacklisted(self, host)
    }
}

/// What [`adopt_response`] did with a response carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adoption {
    /// Same task: the remote sampled bit now applies to the local context.
    Merged,
    /// The host is blacklisted; the header was not looked at.
    Blacklisted,
    /// No local trace to merge into.
    NoContext,
    /// The local trace is unsampled; a response never turns sampling back on.
    Unsampled,
    /// No `X-Trace` header in the response.
    Absent,
    /// A header was present but did not decode.
    Invalid,
    /// A valid header from another task; the local context was kept.
    MismatchedTaskId,
}

impl Display for Adoption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Adoption::Merged => "merged",
            Adoption::Blacklisted => "blacklisted",
            Adoption::NoContext => "no_context",
            Adoption::Unsampled => "unsampled",
            Adoption::Absent => "absent",
            Adoption::Invalid => "invalid",
            Adoption::MismatchedTaskId => "mismatched_task_id",
        };
        write!(f, "{s}")
    }
}

/// Reads and decodes the `X-Trace` header, treating a malformed value as absent.
pub fn extract(carrier: &dyn Extractor) -> Option<XTrace> {
    let header = carrier.get(X_TRACE_HEADER)?.trim();
    match XTrace::decode(header) {
        Ok(xtrace) => Some(xtrace),
        Err(e) => {
            debug!("Ignoring X-Trace header {header:?}: {e}");
            None
        }
    }
}

/// Writes the current identifier to an outgoing request bound for `host`.
///
/// Unsampled traces are propagated too, so downstream services keep the "not sampled"
/// decision. Returns whether a header was written.
pub fn inject(
    context: &Context,
    host: &str,
    filter: &dyn HostFilter,
    carrier: &mut dyn Injector,
) -> bool {
    let Some(current) = context.current() else {
        return false;
    };
    if filter.blacklisted(host) {
        debug!("Not propagating X-Trace to blacklisted host {host}");
        return false;
    }

    carrier.set(X_TRACE_HEADER, current.encode());
    true
}

/// Folds the `X-Trace` header of a response from `host` back into `context`.
///
/// Only a sampled local trace is reconciled: the remote service may turn sampling
/// off for the rest of the call, never on, since the events that would link to it
/// were not emitted.
///
/// # Arguments
///
/// * `context` - The unit of work that made the call
/// * `host` - The remote host the response came from
/// * `filter` - Blacklist consulted before the header is looked at
/// * `carrier` - The response headers
///
/// # Returns
///
/// What was done with the header; see [`Adoption`].
pub fn adopt_response(
    context: &mut Context,
    host: &str,
    filter: &dyn HostFilter,
    carrier: &dyn Extractor,
) -> Adoption {
    if filter.blacklisted(host) {
        return Adoption::Blacklisted;
    }
    let Some(local) = context.current().copied() else {
        return Adoption::NoContext;
    };
    if !local.is_sampled() {
        return Adoption::Unsampled;
    }
    if carrier.get(X_TRACE_HEADER).is_none() {
        return Adoption::Absent;
    }
    let Some(remote) = extract(carrier) else {
        return Adoption::Invalid;
    };

    match xtrace::merge_sampled_flag(&local, &remote) {
        Ok(merged) => {
            context.set_sampled_flag(merged.is_sampled());
            Adoption::Merged
        }
        Err(e) => {
            warn!("Keeping local X-Trace {local} for response from {host}: {e}");
            Adoption::MismatchedTaskId
        }
    }
}
