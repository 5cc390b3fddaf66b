//! Custom tracing formatter for agent diagnostics.
//!
//! Prefixes every line with `TAILPIPE` so agent output is easy to separate
//! from the logs of the service being tailed when both land in the same
//! stream. Span context is rendered as a dotted path with each span's
//! recorded fields in parentheses:
//!
//! ```text
//! TAILPIPE | INFO  | starting agent parser=postgresql
//! TAILPIPE | DEBUG | tail(path=/var/log/postgresql.log): rotation detected
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

/// Log formatter producing `TAILPIPE | LEVEL | span.path(fields): message`.
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
        // Level is padded so messages line up regardless of severity.
        write!(writer, "TAILPIPE | {:<5} | ", event.metadata().level())?;

        // Collapse the active spans, outermost first, into one dotted
        // path. A span's recorded fields ride along in parentheses.
        let mut context = String::new();
        if let Some(scope) = ctx.event_scope() {
            for frame in scope.from_root() {
                if !context.is_empty() {
                    context.push('.');
                }
                context.push_str(frame.name());

                let recorded = frame.extensions();
                if let Some(values) = recorded.get::<FormattedFields<N>>() {
                    if !values.fields.is_empty() {
                        context.push('(');
                        context.push_str(&values.fields);
                        context.push(')');
                    }
                }
            }
        }
        if !context.is_empty() {
            write!(writer, "{context}: ")?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Installs the global subscriber. `debug` raises the max level to DEBUG.
pub fn init(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = tracing_subscriber::fmt()
        .event_format(Formatter)
        .with_max_level(level)
        .finish();
    // Tests may install their own subscriber first; losing that race is fine.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
