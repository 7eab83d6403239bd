// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Codec for the X-Trace identifier.
//!
//! The identifier travels as a single fixed-length hex string, both in the `X-Trace`
//! request/response header and inside every recorded event:
//!
//! ```text
//! 2B 8F1C...(40 hex)...3A 5D0E...(16 hex)...C7 01
//! |  |                    |                    |
//! |  task id (20 bytes)   op id (8 bytes)      flags (low bit = sampled)
//! version
//! ```
//!
//! Decoding is total: every input is either a valid [`XTrace`] or an
//! [`Error::InvalidXTrace`] with the reason. The string accessors ([`task_id_of`],
//! [`op_id_of`], [`is_sampled`]) never panic on garbage and return a sentinel instead.

use std::fmt::{self, Display};
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;

/// Wire format revision emitted by this crate.
pub const XTRACE_VERSION: &str = "2B";

/// Total length of an encoded identifier.
pub const XTRACE_LEN: usize = 2 + TASK_ID_LEN * 2 + OP_ID_LEN * 2 + 2;

/// Id lengths in bytes.
pub const TASK_ID_LEN: usize = 20;
pub const OP_ID_LEN: usize = 8;

lazy_static! {
    /// `version`, `task_id`, `op_id` and `flags`, any hex case.
    static ref XTRACE_REGEX: Regex =
        Regex::new(r"^([0-9A-Fa-f]{2})([0-9A-Fa-f]{40})([0-9A-Fa-f]{16})([0-9A-Fa-f]{2})$")
            .expect("failed creating regex");
}

fn fill_random(buf: &mut [u8]) {
    for chunk in buf.chunks_mut(8) {
        let bytes = fastrand::u64(..).to_be_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
}

/// Identifier shared by every event of one trace.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId([u8; TASK_ID_LEN]);

impl TaskId {
    #[must_use]
    pub fn from_bytes(bytes: [u8; TASK_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// A fresh random task id, never all-zero.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; TASK_ID_LEN];
        loop {
            fill_random(&mut bytes);
            if bytes.iter().any(|b| *b != 0) {
                return Self(bytes);
            }
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TASK_ID_LEN] {
        &self.0
    }

    /// All-zero task ids are invalid.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; TASK_ID_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| Error::InvalidXTrace("task id is not 40 hex digits"))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for TaskId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskId> for String {
    fn from(value: TaskId) -> Self {
        value.to_string()
    }
}

/// Identifier of one operation (event) within a trace.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OpId([u8; OP_ID_LEN]);

impl OpId {
    #[must_use]
    pub fn from_bytes(bytes: [u8; OP_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// A fresh random op id that is neither zero nor equal to `previous`.
    #[must_use]
    pub fn random_after(previous: Option<&OpId>) -> Self {
        let mut bytes = [0u8; OP_ID_LEN];
        loop {
            fill_random(&mut bytes);
            let candidate = Self(bytes);
            if !candidate.is_zero() && Some(&candidate) != previous {
                return candidate;
            }
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; OP_ID_LEN] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl FromStr for OpId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; OP_ID_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| Error::InvalidXTrace("op id is not 16 hex digits"))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for OpId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OpId> for String {
    fn from(value: OpId) -> Self {
        value.to_string()
    }
}

/// Trailing flag byte. Only the low bit (sampled) has a meaning; the other bits are
/// carried through untouched.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    /// Bit 0, the sampling decision.
    pub const SAMPLED: u8 = 0x01;

    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn sampled(sampled: bool) -> Self {
        Self::default().with_sampled(sampled)
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_sampled(self) -> bool {
        self.0 & Self::SAMPLED != 0
    }

    /// A copy with only the sampled bit changed.
    #[must_use]
    pub fn with_sampled(self, sampled: bool) -> Self {
        if sampled {
            Self(self.0 | Self::SAMPLED)
        } else {
            Self(self.0 & !Self::SAMPLED)
        }
    }
}

/// A decoded X-Trace identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct XTrace {
    task_id: TaskId,
    op_id: OpId,
    flags: Flags,
}

impl XTrace {
    #[must_use]
    pub fn new(task_id: TaskId, op_id: OpId, flags: Flags) -> Self {
        Self {
            task_id,
            op_id,
            flags,
        }
    }

    /// Identifier for a brand new trace.
    #[must_use]
    pub fn new_root(sampled: bool) -> Self {
        Self::new(
            TaskId::random(),
            OpId::random_after(None),
            Flags::sampled(sampled),
        )
    }

    /// Parses `s`, rejecting anything that is not exactly the fixed format.
    pub fn decode(s: &str) -> Result<Self, Error> {
        if s.len() != XTRACE_LEN {
            return Err(Error::InvalidXTrace("wrong length"));
        }

        let captures = XTRACE_REGEX
            .captures(s)
            .ok_or(Error::InvalidXTrace("non-hex characters"))?;

        if !captures[1].eq_ignore_ascii_case(XTRACE_VERSION) {
            return Err(Error::InvalidXTrace("unsupported version"));
        }

        let task_id: TaskId = captures[2].parse()?;
        if task_id.is_zero() {
            return Err(Error::InvalidXTrace("`0` value for task id is invalid"));
        }

        let op_id: OpId = captures[3].parse()?;
        if op_id.is_zero() {
            return Err(Error::InvalidXTrace("`0` value for op id is invalid"));
        }

        let flags = u8::from_str_radix(&captures[4], 16)
            .map_err(|_| Error::InvalidXTrace("failed to decode flags"))?;

        Ok(Self::new(task_id, op_id, Flags::from_bits(flags)))
    }

    /// Uppercase wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    #[must_use]
    pub fn op_id(&self) -> &OpId {
        &self.op_id
    }

    #[must_use]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.flags.is_sampled()
    }

    /// Same task and flags, fresh op id. Called on every span entry.
    #[must_use]
    pub fn with_new_op_id(&self) -> Self {
        Self {
            op_id: OpId::random_after(Some(&self.op_id)),
            ..*self
        }
    }

    /// Same task and op id, other flags bits kept.
    #[must_use]
    pub fn with_sampled(&self, sampled: bool) -> Self {
        Self {
            flags: self.flags.with_sampled(sampled),
            ..*self
        }
    }
}

impl Display for XTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{XTRACE_VERSION}{}{}{:02X}",
            self.task_id,
            self.op_id,
            self.flags.bits()
        )
    }
}

impl FromStr for XTrace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl TryFrom<String> for XTrace {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value)
    }
}

impl From<XTrace> for String {
    fn from(value: XTrace) -> Self {
        value.to_string()
    }
}

#[must_use]
pub fn encode(task_id: &TaskId, op_id: &OpId, flags: Flags) -> String {
    XTrace::new(*task_id, *op_id, flags).encode()
}

/// Convenience alias for [`XTrace::decode`].
pub fn decode(s: &str) -> Result<XTrace, Error> {
    XTrace::decode(s)
}

/// Whether `s` decodes.
#[must_use]
pub fn is_valid(s: &str) -> bool {
    XTrace::decode(s).is_ok()
}

/// The task id of `s`, or `None` when `s` does not decode.
#[must_use]
pub fn task_id_of(s: &str) -> Option<TaskId> {
    XTrace::decode(s).ok().map(|x| x.task_id)
}

#[must_use]
pub fn op_id_of(s: &str) -> Option<OpId> {
    XTrace::decode(s).ok().map(|x| x.op_id)
}

/// `false` for anything that does not decode.
#[must_use]
pub fn is_sampled(s: &str) -> bool {
    XTrace::decode(s).is_ok_and(|x| x.is_sampled())
}

/// String form of [`XTrace::with_new_op_id`]; `None` when `s` is invalid.
#[must_use]
pub fn with_new_op_id(s: &str) -> Option<String> {
    XTrace::decode(s).ok().map(|x| x.with_new_op_id().encode())
}

/// Copies the sampled bit of `remote` onto `local` when both belong to the same task.
///
/// On a task id mismatch the caller keeps `local` as it was.
pub fn merge_sampled_flag(local: &XTrace, remote: &XTrace) -> Result<XTrace, Error> {
    if local.task_id != remote.task_id {
        warn!("Mismatched returned X-Trace ID: {remote}");
        return Err(Error::MismatchedTaskId {
            local: local.task_id,
            remote: remote.task_id,
        });
    }

    Ok(local.with_sampled(remote.is_sampled()))
}
