//! Logging initialisation for the intercepting proxy
//!
//! Every log line is prefixed with a UTC timestamp so capture events,
//! TLS handshake outcomes and persistence failures can be correlated
//! with the records in the store.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Once;
use tracing::{info, Event, Subscriber};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

static INIT: Once = Once::new();

/// Timestamp-prefixed formatter for console and file output
pub struct TimestampFormatter;

impl<S, N> FormatEvent<S, N> for TimestampFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = chrono::Utc::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S%.3f UTC");
        let level = event.metadata().level();
        let target = event.metadata().target();

        write!(writer, "{} {:>5} {}: ", timestamp, level, target)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Ensure the logs directory exists
fn ensure_logs_directory() -> std::io::Result<()> {
    let logs_dir = Path::new("logs");
    if !logs_dir.exists() {
        fs::create_dir_all(logs_dir)?;
    }
    Ok(())
}

/// Initialize the global logger
///
/// This should be called once at the start of the application. The filter
/// falls back to the given level when `RUST_LOG` is unset; file logging
/// writes to `logs/proxy.log`.
pub fn init_logger(log_level: &str, enable_file_logging: bool) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level));

        let console_layer = tracing_subscriber::fmt::layer().event_format(TimestampFormatter);

        if enable_file_logging {
            if let Err(e) = ensure_logs_directory() {
                eprintln!("Warning: failed to create logs directory: {:?}", e);
            }

            let file_appender = rolling::never("logs", "proxy.log");
            let (non_blocking_file, guard) = non_blocking(file_appender);

            let file_layer = tracing_subscriber::fmt::layer()
                .event_format(TimestampFormatter)
                .with_ansi(false)
                .with_writer(non_blocking_file);

            let subscriber = Registry::default()
                .with(filter)
                .with(console_layer)
                .with(file_layer);

            if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!("Failed to set global subscriber: {}", e);
            }

            // Keep the non-blocking writer alive for the process lifetime
            Box::leak(Box::new(guard));

            info!("Logging initialized - console + file (logs/proxy.log)");
        } else {
            let subscriber = Registry::default().with(filter).with(console_layer);

            if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!("Failed to set global subscriber: {}", e);
            }
        }
    });
}
