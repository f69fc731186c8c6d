//! # Bus Telemetry
//!
//! Logging and metrics plumbing for processes hosting a `MessageBus`.
//!
//! ## Components
//!
//! - **Logs**: `tracing-subscriber` registry with `EnvFilter`, pretty or JSON output
//! - **Metrics**: Prometheus counters, gauges and histograms fed by [`PrometheusSink`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, PrometheusSink, TelemetryConfig};
//! use layer_bus::MessageBus;
//!
//! #[tokio::main]
//! async fn main() {
//!     let _guard = init_telemetry(&TelemetryConfig::from_env()).expect("telemetry");
//!     let bus = MessageBus::builder()
//!         .metrics_sink(std::sync::Arc::new(PrometheusSink::new()))
//!         .build()
//!         .expect("valid config");
//!
//!     // Serve `bus_telemetry::encode_metrics()` from your metrics endpoint.
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUS_SERVICE_NAME` | `layer-bus` | Service name in the startup log |
//! | `BUS_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `BUS_JSON_LOGS` | `false` | JSON output |
//! | `BUS_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod metrics;
mod sink;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, BUS_DISPATCH_DURATION, BUS_EVENT_HANDLERS,
    BUS_MESSAGES, BUS_TRACES, REGISTRY,
};
pub use sink::PrometheusSink;
pub use tracing_setup::init_tracing;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Register metrics and install the log subscriber.
///
/// Returns a guard to hold for the lifetime of the application.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics_handle = register_metrics()?;
    tracing_setup::init_tracing(config)?;

    Ok(TelemetryGuard {
        _metrics: metrics_handle,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}
