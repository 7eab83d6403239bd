// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing mode: whether this process originates, continues or ignores traces.
//!
//! Configured via `XTRACE_TRACING_MODE=always|through|never` or the `tracing_mode`
//! key of a JSON config document.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Deserializer};
use tracing::error;

/// When a unit of work takes part in a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingMode {
    /// Originate new traces (subject to the sample rate) and continue incoming ones,
    /// honoring the upstream sampling decision.
    #[default]
    Always,
    /// Only continue traces that arrive already sampled. Never starts a trace.
    Through,
    /// Tracing disabled: no context, no events, no propagation.
    Never,
}

/// Case-insensitive. Unknown values are logged and treated as `always`, so a typo in
/// the environment never stops the host application.
impl FromStr for TracingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(TracingMode::Always),
            "through" => Ok(TracingMode::Through),
            "never" => Ok(TracingMode::Never),
            _ => {
                error!("Tracing mode is invalid: {:?}, using always", s);
                Ok(TracingMode::Always)
            }
        }
    }
}

impl Display for TracingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self {
            TracingMode::Always => "always",
            TracingMode::Through => "through",
            TracingMode::Never => "never",
        };
        write!(f, "{mode}")
    }
}

impl<'de> Deserialize<'de> for TracingMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TracingMode::from_str(&s).map_err(serde::de::Error::custom)
    }
}
