//! Logging.

use std::fmt;

use chrono::Utc;
use harvest_error::GenericError;
use tracing::{field, level_filters::LevelFilter, Event, Subscriber};
use tracing_subscriber::{
    field::VisitOutput,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt as _,
    registry::LookupSpan,
    util::SubscriberInitExt as _,
    EnvFilter, Layer,
};

const LOG_LEVEL_ENV_VAR: &str = "HARVEST_LOG_LEVEL";
const LOG_FORMAT_JSON_ENV_VAR: &str = "HARVEST_LOG_FORMAT_JSON";
const APP_NAME: &str = "HARVESTER";

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// This function reads the `HARVEST_LOG_LEVEL` environment variable to determine the log filtering directives to use.
/// If the environment variable is not set, the default log level is `INFO`. Additionally, it reads the
/// `HARVEST_LOG_FORMAT_JSON` environment variable to determine which output format to use: `true` or `1` selects JSON,
/// while any other value, or no value at all, selects a human-readable format.
///
/// All logs are written to standard output.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(default_level: Option<LevelFilter>) -> Result<(), GenericError> {
    let is_json = is_json_format(std::env::var(LOG_FORMAT_JSON_ENV_VAR).ok().as_deref());

    let level_filter = EnvFilter::builder()
        .with_default_directive(default_level.unwrap_or(LevelFilter::INFO).into())
        .with_env_var(LOG_LEVEL_ENV_VAR)
        .from_env_lossy();

    let output_layer = if is_json {
        tracing_subscriber::fmt::Layer::new()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::Layer::new()
            .event_format(HarvesterFormatter::new())
            .boxed()
    };

    tracing_subscriber::registry()
        .with(output_layer.with_filter(level_filter))
        .try_init()?;

    Ok(())
}

fn is_json_format(raw: Option<&str>) -> bool {
    raw.map(|s| s.trim().to_lowercase())
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false)
}

/// Human-readable log formatter.
///
/// Lines look like `2024-12-31 23:59:59 UTC | HARVESTER | INFO | (file.rs:10) | key:value,key2:value2 | message`.
struct HarvesterFormatter {
    app_name: &'static str,
}

impl HarvesterFormatter {
    fn new() -> Self {
        Self { app_name: APP_NAME }
    }
}

impl<S, N> FormatEvent<S, N> for HarvesterFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let metadata = event.metadata();

        write!(
            writer,
            "{} | {} | {} | ",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            self.app_name,
            metadata.level()
        )?;

        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            write!(writer, "({}:{})", file, line)?;
        } else {
            write!(writer, "(unknown:0)")?;
        }

        let mut v = FieldVisitor::new(writer.by_ref());
        event.record(&mut v);
        v.finish()?;

        writeln!(writer)
    }
}

/// Field visitor that writes structured fields as `key:value` pairs, followed by the message.
///
/// Fields and the message are each written as a `| <text>` section:
///
/// ```text
/// | key:value,key2:value2 | message
/// ```
///
/// The first write error is captured and returned when the visitor is finished. All writes after an error are no-ops.
struct FieldVisitor<'writer> {
    writer: Writer<'writer>,
    fields_written: usize,
    message: String,
    last_result: fmt::Result,
}

impl<'writer> FieldVisitor<'writer> {
    fn new(writer: Writer<'writer>) -> Self {
        Self {
            writer,
            fields_written: 0,
            message: String::new(),
            last_result: Ok(()),
        }
    }

    fn try_write(&mut self, field: &field::Field, f: impl FnOnce(&mut dyn fmt::Write) -> fmt::Result) {
        if self.last_result.is_err() {
            return;
        }

        if field.name() == "message" {
            // The message always comes last.
            self.last_result = f(&mut self.message);
        } else {
            let prefix = if self.fields_written == 0 { " | " } else { "," };

            self.last_result = write!(self.writer, "{}{}:", prefix, field.name());
            if self.last_result.is_err() {
                return;
            }

            self.last_result = f(&mut self.writer);
            if self.last_result.is_ok() {
                self.fields_written += 1;
            }
        }
    }
}

impl field::Visit for FieldVisitor<'_> {
    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        self.try_write(field, |w| write!(w, "{:?}", value));
    }

    fn record_str(&mut self, field: &field::Field, value: &str) {
        self.try_write(field, |w| write!(w, "{}", value));
    }
}

impl VisitOutput<fmt::Result> for FieldVisitor<'_> {
    fn finish(mut self) -> fmt::Result {
        self.last_result?;

        if !self.message.is_empty() {
            write!(self.writer, " | {}", self.message)
        } else {
            Ok(())
        }
    }
}
