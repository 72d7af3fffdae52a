//! # Structured Logging Module
//!
//! Environment-aware structured logging that writes to the console and to a
//! JSON log file, so agent loops and retry cycles can be followed per message.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(log_level.clone()));

        let log_dir = PathBuf::from("log");
        if let Err(e) = fs::create_dir_all(&log_dir) {
            // No file output, the console still gets everything
            let _ = tracing_subscriber::registry().with(console_layer).try_init();
            tracing::warn!(error = %e, "Could not create log directory, logging to console only");
            return;
        }

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("{environment}.{pid}.{timestamp}.log");
        let log_path = log_dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(&log_dir, log_filename);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let subscriber = tracing_subscriber::registry().with(console_layer).with(
            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(log_level)),
        );

        // An embedding host may already have installed a subscriber
        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_path.display(),
            "🔧 STRUCTURED LOGGING: Initialized with file output"
        );

        // Keep the writer alive for the lifetime of the process
        std::mem::forget(guard);
    });
}

/// Get current environment from environment variables
pub(crate) fn get_environment() -> String {
    std::env::var("AS4_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for pipeline runs
pub fn log_pipeline_operation(
    operation: &str,
    pipeline: &str,
    message_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        pipeline = %pipeline,
        message_id = message_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 PIPELINE_OPERATION"
    );
}

/// Log structured data for reception awareness retries
pub fn log_retry_operation(
    operation: &str,
    internal_message_id: &str,
    ebms_message_id: Option<&str>,
    current_retry_count: u32,
    total_retry_count: u32,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        internal_message_id = %internal_message_id,
        ebms_message_id = ebms_message_id,
        current_retry_count = current_retry_count,
        total_retry_count = total_retry_count,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "🔁 RETRY_OPERATION"
    );
}

/// Log structured data for persistence operations
pub fn log_database_operation(
    operation: &str,
    table: Option<&str>,
    record_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::debug!(
        operation = %operation,
        table = table,
        record_id = record_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "💾 DATABASE_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
