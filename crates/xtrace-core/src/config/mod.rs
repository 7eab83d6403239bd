// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration consumed by the tracing core.
//!
//! Three settings drive behavior: `tracing_mode`, `sample_rate` and `blacklist`. They
//! are read on every instrumented call and written rarely, so the live copy sits
//! behind a single reader/writer lock in [`SharedConfig`].
//!
//! # Environment
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `XTRACE_TRACING_MODE` | `always` | `always`, `through` or `never` |
//! | `XTRACE_SAMPLE_RATE` | `1000000` | root sampling probability, parts per million |
//! | `XTRACE_BLACKLIST` | empty | comma separated host patterns |
//! | `XTRACE_LOG_LEVEL` | `info` | `trace`, `debug`, `info`, `warn` or `error` |

pub mod tracing_mode;

use std::env;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Deserialize;
use tracing::{debug, error};

use crate::blacklist::Blacklist;
use crate::error::Error;
use crate::sampling::{SamplingPolicy, SAMPLE_RATE_DENOMINATOR};
use tracing_mode::TracingMode;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Process-wide tracing settings. See the module docs for the environment form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracing_mode: TracingMode,
    /// Root sampling probability in parts per million.
    pub sample_rate: u32,
    pub blacklist: Blacklist,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracing_mode: TracingMode::Always,
            sample_rate: SAMPLE_RATE_DENOMINATOR,
            blacklist: Blacklist::new(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, Error> {
        let tracing_mode = env::var("XTRACE_TRACING_MODE")
            .ok()
            .and_then(|mode| TracingMode::from_str(&mode).ok())
            .unwrap_or_default();
        let sample_rate = match env::var("XTRACE_SAMPLE_RATE") {
            Ok(rate) => rate.trim().parse::<u32>().unwrap_or_else(|_| {
                error!("XTRACE_SAMPLE_RATE is not a non-negative integer: {rate:?}, using default");
                SAMPLE_RATE_DENOMINATOR
            }),
            Err(_) => SAMPLE_RATE_DENOMINATOR,
        };
        let blacklist = env::var("XTRACE_BLACKLIST")
            .map(|val| Blacklist::from_env_string(&val))
            .unwrap_or_default();
        let log_level = env::var("XTRACE_LOG_LEVEL")
            .map(|val| val.trim().to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            tracing_mode,
            sample_rate,
            blacklist,
            log_level,
        };

        config.validate()?;
        debug!(
            "Loaded config: tracing_mode={} sample_rate={} blacklist={:?}",
            config.tracing_mode,
            config.sample_rate,
            config.blacklist.patterns()
        );
        Ok(config)
    }

    /// Parses a JSON config document; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_rate > SAMPLE_RATE_DENOMINATOR {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} exceeds {SAMPLE_RATE_DENOMINATOR}",
                self.sample_rate
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// The sampling decision these settings describe.
    #[must_use]
    pub fn sampling_policy(&self) -> SamplingPolicy {
        SamplingPolicy::new(self.tracing_mode, self.sample_rate)
    }
}

/// Process-wide configuration shared by every unit of work.
///
/// Reads take the read lock and never block each other; setters take the write lock.
/// A poisoned lock is recovered rather than propagated, so reads keep returning the
/// last written value.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Config> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Config> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current settings.
    #[must_use]
    pub fn snapshot(&self) -> Config {
        self.read().clone()
    }

    #[must_use]
    pub fn sampling_policy(&self) -> SamplingPolicy {
        self.read().sampling_policy()
    }

    #[must_use]
    pub fn tracing_mode(&self) -> TracingMode {
        self.read().tracing_mode
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.read().sample_rate
    }

    /// Whether `host` matches the live blacklist.
    #[must_use]
    pub fn blacklisted(&self, host: &str) -> bool {
        self.read().blacklist.blacklisted(host)
    }

    /// Applies to traces started after the call; running units of work keep
    /// their context.
    pub fn set_tracing_mode(&self, mode: TracingMode) {
        self.write().tracing_mode = mode;
    }

    /// Rates above the denominator are clamped to it.
    pub fn set_sample_rate(&self, rate: u32) {
        if rate > SAMPLE_RATE_DENOMINATOR {
            error!("sample_rate {rate} exceeds {SAMPLE_RATE_DENOMINATOR}, clamping");
        }
        self.write().sample_rate = rate.min(SAMPLE_RATE_DENOMINATOR);
    }

    /// Replaces the blacklist.
    pub fn set_blacklist(&self, blacklist: Blacklist) {
        self.write().blacklist = blacklist;
    }

    /// Adds one pattern, see [`Blacklist::add`].
    pub fn add_blacklisted_host(&self, pattern: impl Into<String>) {
        self.write().blacklist.add(pattern);
    }

    /// After this, context is sent to and accepted from every host.
    pub fn clear_blacklist(&self) {
        self.write().blacklist.clear();
    }

    /// Runs `f` against the config under the write lock, for grouped changes.
    pub fn update<R>(&self, f: impl FnOnce(&mut Config) -> R) -> R {
        f(&mut self.write())
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}
