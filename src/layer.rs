//! `tracing` integration: forwards events into an [`ExportScheduler`].

use crate::entry::LogLevel;
use crate::errors::{Result, SinkError};
use crate::scheduler::ExportScheduler;

use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as FmtWrite;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Targets whose events never reach the sink. Exporting them would feed the
/// export path back into itself.
const IGNORED_TARGET_PREFIXES: &[&str] = &[
    env!("CARGO_CRATE_NAME"),
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
    "rustls",
    "native_tls",
    "tokio",
    "tokio_util",
    "mio",
    "want",
    "tower",
];

/// A tracing Layer that buffers events for export.
///
/// Event fields become entry attributes, alongside the event `target`.
#[derive(Clone)]
pub struct SinkLayer {
    scheduler: ExportScheduler,
}

impl SinkLayer {
    pub fn new(scheduler: ExportScheduler) -> Self {
        Self { scheduler }
    }

    fn is_ignored(target: &str) -> bool {
        IGNORED_TARGET_PREFIXES.iter().any(|prefix| {
            target == *prefix
                || target
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with("::"))
        })
    }
}

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if Self::is_ignored(metadata.target()) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut fields = visitor.fields;
        fields.insert("target".to_string(), Value::from(metadata.target()));

        self.scheduler.log(
            LogLevel::from(metadata.level()),
            visitor.message.unwrap_or_default(),
            Some(fields),
        );
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: HashMap<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(&mut buf, "{:?}", value);
        self.insert(field, Value::String(buf));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }
}

/// Install the global subscriber: JSON to stdout plus the export sink.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(scheduler: &ExportScheduler) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(SinkLayer::new(scheduler.clone()))
        .try_init()
        .map_err(|e| SinkError::Other(format!("Failed to install tracing subscriber: {}", e)))
}
