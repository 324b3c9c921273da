//! Process-wide tracing setup.
//!
//! Lines are rendered as `[timestamp] [LEVEL]: message {fields}`. The `http`
//! severity is a debug event on [`HTTP_TARGET`]. Lines emitted while a
//! request is in scope carry its `request_id` even when the call site did
//! not pass one.

use std::{backtrace::Backtrace, fmt, path::Path};

use anyhow::Context;
use serde_json::{Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{format, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::{config::AppConfig, context};

/// Target carrying request access lines.
pub const HTTP_TARGET: &str = "taskmanager::http";

/// Keeps the background file writers alive; dropping flushes them.
#[must_use]
pub struct LogGuards(#[allow(dead_code)] Vec<WorkerGuard>);

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

pub fn init(config: &AppConfig) -> anyhow::Result<LogGuards> {
    let directives = default_directives(config);
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives))
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guards = Vec::new();

    if config.log.json {
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_filter(filter())
                .boxed(),
        );
    } else {
        layers.push(
            tracing_subscriber::fmt::layer()
                .event_format(LineFormat)
                .with_filter(filter())
                .boxed(),
        );
    }

    if let Some(dir) = &config.log.dir {
        let (file_layers, file_guards) = file_layers(dir, filter)?;
        layers.extend(file_layers);
        guards.extend(file_guards);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("install tracing subscriber")?;

    std::panic::set_hook(Box::new(|info| {
        let backtrace = Backtrace::force_capture();
        tracing::error!(panic = %info, backtrace = %backtrace, "panic");
    }));

    Ok(LogGuards(guards))
}

/// Daily-rolling `combined.log` (everything passing `filter`) and
/// `error.log` (errors only) under `dir`, written off the calling thread.
fn file_layers(
    dir: &Path,
    filter: impl Fn() -> EnvFilter,
) -> anyhow::Result<(Vec<BoxedLayer>, Vec<WorkerGuard>)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create log directory {}", dir.display()))?;

    let (combined, combined_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "combined.log"));
    let (errors, errors_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "error.log"));

    let layers = vec![
        tracing_subscriber::fmt::layer()
            .event_format(LineFormat)
            .with_ansi(false)
            .with_writer(combined)
            .with_filter(filter())
            .boxed(),
        tracing_subscriber::fmt::layer()
            .event_format(LineFormat)
            .with_ansi(false)
            .with_writer(errors)
            .with_filter(LevelFilter::ERROR)
            .boxed(),
    ];
    Ok((layers, vec![combined_guard, errors_guard]))
}

fn default_directives(config: &AppConfig) -> String {
    if config.mode.is_production() {
        "warn".to_string()
    } else {
        "taskmanager=debug,tower_http=info,sqlx=warn,warn".to_string()
    }
}

/// Severity label; `HTTP` for access lines.
fn label(event: &Event<'_>) -> &'static str {
    let meta = event.metadata();
    if meta.target() == HTTP_TARGET {
        return "HTTP";
    }
    match *meta.level() {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

fn color(label: &str) -> &'static str {
    match label {
        "ERROR" => "\x1b[31m",
        "WARN" => "\x1b[33m",
        "INFO" => "\x1b[32m",
        "HTTP" => "\x1b[35m",
        _ => "\x1b[37m",
    }
}

/// `[timestamp] [LEVEL]: message {"field":"value"}`
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = JsonFields::default();
        event.record(&mut fields);
        if !fields.rest.contains_key("request_id") {
            if let Some(id) = context::current_request_id() {
                fields.rest.insert("request_id".into(), Value::from(id.to_string()));
            }
        }
        let line = render_line(label(event), &fields);

        if writer.has_ansi_escapes() {
            writeln!(writer, "{}{}\x1b[0m", color(label(event)), line)
        } else {
            writeln!(writer, "{}", line)
        }
    }
}

fn render_line(label: &str, fields: &JsonFields) -> String {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let mut line = format!("[{}] [{}]: {}", timestamp, label, fields.message);
    if !fields.rest.is_empty() {
        if let Ok(json) = serde_json::to_string(&fields.rest) {
            line.push(' ');
            line.push_str(&json);
        }
    }
    line
}

#[derive(Default)]
struct JsonFields {
    message: String,
    rest: Map<String, Value>,
}

impl Visit for JsonFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            self.rest.insert(field.name().to_owned(), Value::from(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.rest.insert(field.name().to_owned(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.rest.insert(field.name().to_owned(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.rest.insert(field.name().to_owned(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.rest.insert(field.name().to_owned(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.rest.insert(field.name().to_owned(), Value::from(rendered));
        }
    }
}
