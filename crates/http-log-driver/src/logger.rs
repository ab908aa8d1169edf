// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing setup for hosts embedding the driver.
//!
//! Driver logs share the host's output with the application logs being
//! shipped, so every line carries an `HTTP_LOG_DRIVER` prefix:
//!
//! ```text
//! HTTP_LOG_DRIVER | INFO | LOGS | Started logging c1
//! HTTP_LOG_DRIVER | WARN | flush{records=3}: LOGS | Attempt 1/3 failed
//! ```

use std::error::Error;
use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Event formatter prefixing every line with `HTTP_LOG_DRIVER | LEVEL | `.
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
        write!(&mut writer, "HTTP_LOG_DRIVER | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn env_filter(log_level: &str) -> Result<EnvFilter, Box<dyn Error>> {
    let directives = format!("h2=off,hyper=off,rustls=off,{}", log_level.to_lowercase());
    Ok(EnvFilter::try_new(directives)?)
}

/// Installs a global subscriber logging at `log_level` (e.g. `info`, `debug`).
///
/// Fails if the level cannot be parsed or a global subscriber is already set.
pub fn init(log_level: &str) -> Result<(), Box<dyn Error>> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(log_level)?)
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    tracing::debug!("LOGS | Logging subsystem enabled");
    Ok(())
}
