// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line formatter for processes embedding the tracing core.
//!
//! ```text
//! XTRACE | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```
//!
//! The library itself never installs a subscriber; binaries plug this in with
//! `FmtSubscriber::builder().event_format(Formatter::new())`.
//!
//! Task ids are 40 hex digits and usually repeat on every line of a trace, so
//! [`Formatter::abbreviate_task_ids`] shortens them to their first 8 digits
//! followed by `..`. Full `X-Trace` headers are left untouched.

use std::borrow::Cow;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

pub const LOG_PREFIX: &str = "XTRACE";

lazy_static! {
    /// A standalone run of exactly 40 hex digits.
    static ref TASK_ID_REGEX: Regex =
        Regex::new(r"(?-u:\b)([0-9A-Fa-f]{8})[0-9A-Fa-f]{32}(?-u:\b)")
            .expect("failed creating regex");
}

/// Event formatter producing `XTRACE | LEVEL | ...` lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct Formatter {
    abbreviate_task_ids: bool,
}

impl Formatter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shortens task ids in span and event fields, e.g. `0A1B2C3D..`.
    #[must_use]
    pub fn abbreviate_task_ids(mut self, abbreviate: bool) -> Self {
        self.abbreviate_task_ids = abbreviate;
        self
    }

    fn render<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.abbreviate_task_ids {
            abbreviate_task_ids(text)
        } else {
            Cow::Borrowed(text)
        }
    }
}

fn abbreviate_task_ids(text: &str) -> Cow<'_, str> {
    TASK_ID_REGEX.replace_all(text, "${1}..")
}

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                // the fmt layer stores span fields on `new_span`
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{}}}", self.render(fields))?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        let mut fields = String::new();
        ctx.field_format()
            .format_fields(format::Writer::new(&mut fields), event)?;

        writeln!(writer, "{}", self.render(&fields))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Buffer {
        type Writer = Buffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        capture_with(Formatter::new(), f)
    }

    fn capture_with(formatter: Formatter, f: impl FnOnce()) -> String {
        let buffer = Buffer::default();
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_ansi(false)
            .event_format(formatter)
            .with_writer(buffer.clone())
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        buffer.contents()
    }

    #[test]
    fn test_prefix_and_level() {
        let output = capture(|| tracing::warn!("Mismatched returned X-Trace ID"));
        assert_eq!(output, "XTRACE | WARN | Mismatched returned X-Trace ID\n");
    }

    #[test]
    fn test_span_context_and_fields() {
        let output = capture(|| {
            let span = tracing::info_span!("validate", task = "ABC");
            let _entered = span.enter();
            tracing::error!(events = 3, "Unresolved edge");
        });
        assert!(output.starts_with("XTRACE | ERROR | validate{task=\"ABC\"}: "));
        assert!(output.contains("Unresolved edge"));
        assert!(output.contains("events=3"));
    }

    const TASK_ID: &str = "0A1B2C3D4E5F60718293A4B5C6D7E8F901234567";

    #[test]
    fn test_task_ids_kept_by_default() {
        let output = capture(|| tracing::info!(task_id = TASK_ID, "Read 2 events"));
        assert!(output.contains(TASK_ID));
    }

    #[test]
    fn test_abbreviated_task_ids_in_span_and_event_fields() {
        let formatter = Formatter::new().abbreviate_task_ids(true);
        let output = capture_with(formatter, || {
            let span = tracing::info_span!("trace", task_id = TASK_ID);
            let _entered = span.enter();
            tracing::error!("Unresolved edge in {}", TASK_ID);
        });
        assert_eq!(
            output,
            "XTRACE | ERROR | trace{task_id=\"0A1B2C3D..\"}: Unresolved edge in 0A1B2C3D..\n"
        );
    }

    #[test]
    fn test_full_header_is_not_abbreviated() {
        let header = format!("2B{TASK_ID}0123456789ABCDEF01");
        assert_eq!(abbreviate_task_ids(&header), header);
        assert_eq!(abbreviate_task_ids(&format!("{TASK_ID}0")), format!("{TASK_ID}0"));
        assert_eq!(abbreviate_task_ids(&format!("id:{TASK_ID}.")), "id:0A1B2C3D...");
    }
}
