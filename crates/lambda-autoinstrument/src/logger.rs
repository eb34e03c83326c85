// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for the agent.
//!
//! Every line is prefixed with `ASSERTS_LAYER` so agent output can be told apart from the
//! function's own output in the same log stream. Lines emitted by dependencies carry the
//! crate they come from:
//!
//! ```text
//! ASSERTS_LAYER | INFO | Handler index.handler instrumented
//! ASSERTS_LAYER | WARN | flush{attempt=2}: Remote write failed status=503
//! ASSERTS_LAYER | DEBUG | [reqwest] starting new connection
//! ```

use crate::config::is_valid_log_level;
use std::fmt;
use tracing::{debug, warn};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const AGENT_CRATES: [&str; 2] = ["lambda_autoinstrument", "lambda_metrics"];

/// Formatter producing `ASSERTS_LAYER | LEVEL | [crate] spans: message fields` lines.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

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
        write!(&mut writer, "ASSERTS_LAYER | {} | ", metadata.level())?;

        let origin = source_crate(metadata.target());
        if !AGENT_CRATES.contains(&origin) {
            write!(writer, "[{origin}] ")?;
        }

        for span in ctx.event_scope().into_iter().flat_map(|scope| scope.from_root()) {
            let ext = span.extensions();
            match ext.get::<FormattedFields<N>>() {
                Some(fields) if !fields.is_empty() => {
                    write!(writer, "{}{{{fields}}}: ", span.name())?
                }
                _ => write!(writer, "{}: ", span.name())?,
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn source_crate(target: &str) -> &str {
    target.split("::").next().unwrap_or(target)
}

/// Filter directive for `log_level`, keeping the HTTP stack quiet.
pub fn env_filter(log_level: &str) -> String {
    format!("h2=off,hyper=off,rustls=off,{log_level}")
}

/// Filter for `log_level`, `info` when the level is not one of the known levels.
///
/// An unknown word would otherwise parse as a target directive and silence every line.
pub fn filter_for(log_level: &str) -> EnvFilter {
    let level = if is_valid_log_level(log_level) {
        log_level
    } else {
        "info"
    };
    EnvFilter::try_new(env_filter(level)).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. A second call leaves the first subscriber in place.
pub fn init(log_level: &str) {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter_for(log_level))
        .with_ansi(false)
        .event_format(Formatter)
        .finish();

    match tracing::subscriber::set_global_default(subscriber) {
        Ok(()) => {
            debug!("Logging subsystem enabled");
            if !is_valid_log_level(log_level) {
                warn!("Unknown log level '{}', logging at info", log_level);
            }
        }
        Err(_) => debug!("Logging subsystem already initialized"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::{debug, error, info, info_span, warn};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().expect("lock poisoned").clone()).expect("utf8 logs")
        }
    }

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("lock poisoned").extend_from_slice(buf);
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

    fn capture(log_level: &str, emit: impl FnOnce()) -> String {
        let buffer = Buffer::default();
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(filter_for(log_level))
            .with_ansi(false)
            .event_format(Formatter)
            .with_writer(buffer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        buffer.contents()
    }

    #[test]
    fn test_prefix_and_level() {
        let logs = capture("info", || info!("Handler index.handler instrumented"));
        assert_eq!(logs, "ASSERTS_LAYER | INFO | Handler index.handler instrumented\n");
    }

    #[test]
    fn test_span_context_and_fields() {
        let logs = capture("info", || {
            let span = info_span!("flush", attempt = 2);
            let _guard = span.enter();
            warn!(status = 503, "Remote write failed");
        });
        assert_eq!(
            logs,
            "ASSERTS_LAYER | WARN | flush{attempt=2}: Remote write failed status=503\n"
        );
    }

    #[test]
    fn test_level_filtering() {
        let logs = capture("warn", || info!("not shown"));
        assert!(logs.is_empty());
    }

    #[test]
    fn test_unknown_level_logs_at_info() {
        let logs = capture("verbose", || {
            error!("flush interval must be greater than 0");
            info!("Handler index.handler instrumented");
            debug!("not shown");
        });
        assert_eq!(
            logs,
            "ASSERTS_LAYER | ERROR | flush interval must be greater than 0\n\
             ASSERTS_LAYER | INFO | Handler index.handler instrumented\n"
        );
    }

    #[test]
    fn test_dependency_lines_name_their_crate() {
        let logs = capture("debug", || {
            debug!(target: "reqwest::connect", "starting new connection");
            debug!(target: "lambda_metrics::remote_writer", "Flushing 12 bytes");
        });
        assert_eq!(
            logs,
            "ASSERTS_LAYER | DEBUG | [reqwest] starting new connection\n\
             ASSERTS_LAYER | DEBUG | Flushing 12 bytes\n"
        );
    }

    #[test]
    fn test_filter_for_known_levels() {
        for level in crate::config::VALID_LOG_LEVELS {
            assert_eq!(
                filter_for(level).to_string(),
                EnvFilter::new(env_filter(level)).to_string()
            );
        }
        assert_eq!(
            filter_for("verbose").to_string(),
            EnvFilter::new(env_filter("info")).to_string()
        );
    }

    #[test]
    fn test_env_filter_directive() {
        assert_eq!(env_filter("debug"), "h2=off,hyper=off,rustls=off,debug");
    }
}
