// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use tracing::{debug, error, info, info_span};
use tracing_subscriber::EnvFilter;

use xtrace_core::config::Config;
use xtrace_core::edge_graph::{group_by_task, render_outline, validate_edges};
use xtrace_core::event::read_events;
use xtrace_core::logger::Formatter;

pub fn main() -> ExitCode {
    let (config, config_error) = match Config::from_env() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(log_filter(&config))
        .event_format(Formatter::new().abbreviate_task_ids(true))
        .with_writer(io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {e}");
    }
    debug!("Logging subsystem enabled");

    if let Some(e) = config_error {
        error!("Ignoring invalid configuration, using defaults: {e}");
    }
    debug!(
        "Tracing mode is {}, log level is {}",
        config.tracing_mode, config.log_level
    );

    let print_outline = env::var("XTRACE_VALIDATE_OUTLINE")
        .map(|val| val.to_lowercase() == "true")
        .unwrap_or(false);

    match run(env::args().nth(1), print_outline) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

/// Log filter for the configured level, `info` when the level does not parse.
fn log_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Validates every trace in the stream and returns whether all of them are valid.
fn run(path: Option<String>, print_outline: bool) -> Result<bool> {
    let reader: Box<dyn BufRead> = match path.as_deref() {
        Some(path) if path != "-" => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open event stream {path}"))?,
        )),
        _ => Box::new(BufReader::new(io::stdin())),
    };

    let events = read_events(reader).context("Failed to read event stream")?;
    info!("Read {} events", events.len());

    let mut all_valid = true;
    for (task_id, events) in group_by_task(events) {
        let span = info_span!("trace", task_id = %task_id);
        let _entered = span.enter();

        let report = validate_edges(&events);
        for unresolved in report.unresolved() {
            error!("Unresolved edge: {unresolved}");
        }

        let status = if report.is_valid() { "valid" } else { "invalid" };
        println!(
            "{task_id}: {status} ({} events, {} roots, {} unresolved edges)",
            report.event_count(),
            report.roots().len(),
            report.unresolved().len()
        );
        if print_outline {
            print!("{}", render_outline(&events));
        }

        all_valid &= report.is_valid();
    }

    Ok(all_valid)
}
