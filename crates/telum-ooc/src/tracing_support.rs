//! Structured logging for store, algebra and registry operations
//!
//! The library only emits `tracing` events and spans; applications decide
//! where they go. [`init_tracing`] installs a ready-made `tracing-subscriber`
//! pipeline for binaries, tests and benches that do not bring their own.
//!
//! # Example
//!
//! ```no_run
//! use telum_ooc::tracing_support::{init_tracing, TracingConfig, TracingFormat};
//!
//! init_tracing(TracingConfig {
//!     format: TracingFormat::Json,
//!     filter: "telum_ooc=debug,info".to_string(),
//!     ..TracingConfig::default()
//! })?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g., `RUST_LOG=telum_ooc=debug`)
//! - `TELUM_LOG_FORMAT`: `pretty`, `json` or `compact` (default: `pretty`)

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Multi-line human-readable output
    Pretty,
    /// One JSON object per event
    Json,
    /// Single line per event
    Compact,
}

impl TracingFormat {
    /// Unknown names fall back to `Pretty`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => TracingFormat::Json,
            "compact" => TracingFormat::Compact,
            _ => TracingFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub format: TracingFormat,
    /// `EnvFilter` directive (e.g., "telum_ooc=debug,info")
    pub filter: String,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        let format = std::env::var("TELUM_LOG_FORMAT")
            .map(|s| TracingFormat::parse(&s))
            .unwrap_or(TracingFormat::Pretty);

        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "telum_ooc=info,warn".to_string());

        Self {
            format,
            filter,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// Install a global subscriber. Call once at startup.
///
/// # Errors
///
/// Fails if the filter directive does not parse or a global subscriber is
/// already installed.
pub fn init_tracing(config: TracingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)?;

    match config.format {
        TracingFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_ansi(config.with_ansi)
                .with_target(config.with_target)
                .with_thread_ids(config.with_thread_ids)
                .with_file(config.with_file)
                .with_line_number(config.with_line_number)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
        TracingFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(config.with_target)
                .with_thread_ids(config.with_thread_ids)
                .with_file(config.with_file)
                .with_line_number(config.with_line_number)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
        TracingFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_ansi(config.with_ansi)
                .with_target(config.with_target)
                .with_thread_ids(config.with_thread_ids)
                .with_file(config.with_file)
                .with_line_number(config.with_line_number)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
    }

    Ok(())
}

/// Record bytes moved by a chunk or tile operation.
pub fn record_bytes(operation: &str, bytes: usize) {
    tracing::trace!(operation, bytes, "bytes_processed");
}

/// Record a file-level operation such as a flush or manifest write.
pub fn record_io(operation: &str, path: &str, bytes: usize, duration_ms: u64) {
    let secs = (duration_ms.max(1)) as f64 / 1000.0;
    tracing::info!(
        operation,
        path,
        bytes,
        duration_ms,
        throughput_mbps = (bytes as f64 / 1024.0 / 1024.0) / secs,
        "io_operation"
    );
}
