//! Logging setup for the probe tool.
//!
//! Under systemd the events go to journald. Otherwise they go to stdout as
//! one line per event: local time, level, short target, message, fields.

use std::{env, fmt};

use colored::Colorize;
use time::{macros::format_description, OffsetDateTime};
use tracing::{field::Field, Event, Level, Subscriber};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence; without it the level is INFO, or DEBUG
/// when `debug` is set.
pub fn init(debug: bool) {
    let default_level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    if env::var("JOURNAL_STREAM").is_ok() {
        match tracing_journald::layer() {
            Ok(layer) => {
                tracing_subscriber::registry()
                    .with(filter(default_level))
                    .with(layer)
                    .init();
            }
            Err(e) => {
                use_stdout(default_level);
                tracing::error!(error = %e, "Failed to initialize journald logging, using stdout");
            }
        }
    } else {
        use_stdout(default_level);
    }
}

fn filter(default_level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy()
}

fn use_stdout(default_level: LevelFilter) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(tracing_subscriber::fmt::layer().event_format(LineFormatter))
        .init();
}

struct LineFormatter;

#[derive(Default)]
struct Fields {
    message: String,
    rest: Vec<(&'static str, String)>,
}

impl tracing::field::Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.rest.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.rest.push((field.name(), format!("{:?}", value)));
        }
    }
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = Fields::default();
        event.record(&mut fields);

        LocalTimer.format_time(&mut writer)?;

        let level = match *event.metadata().level() {
            Level::ERROR => "ERROR".red(),
            Level::WARN => "WARN ".yellow(),
            Level::INFO => "INFO ".green(),
            Level::DEBUG => "DEBUG".blue(),
            Level::TRACE => "TRACE".magenta(),
        };

        // Our own crates are shown without their crate prefix.
        let target = event.metadata().target();
        let target = target
            .strip_prefix("i2c_platform::")
            .or_else(|| target.strip_prefix("i2c_probe::"))
            .unwrap_or(target);

        write!(writer, " {} {}: {}", level, target.cyan(), fields.message)?;
        for (key, value) in &fields.rest {
            write!(writer, " {}", format!("{}={}", key, value).dimmed())?;
        }
        writeln!(writer)
    }
}

/// Local wall-clock time to the second, UTC if the offset is unknown.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let stamp = now
            .format(format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| fmt::Error)?;
        write!(w, "{}", stamp)
    }
}
