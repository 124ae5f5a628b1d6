//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use arbor_observe::{TracingOptions, init_tracing};
//!
//! // Human-readable logs at the default level
//! init_tracing(&TracingOptions::default()).unwrap();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Instrumentation scope name reported to OpenTelemetry.
const TRACER_NAME: &str = "arbor";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Subscriber settings chosen by the binary.
#[derive(Debug, Clone, Default)]
pub struct TracingOptions {
    /// 0 = warnings only, 1 = info, 2 = debug, 3+ = trace. Ignored when
    /// `RUST_LOG` is set.
    pub verbosity: u8,
    pub format: LogFormat,
    /// Bridge spans to OpenTelemetry with a stdout exporter.
    pub otel: bool,
}

impl TracingOptions {
    /// Filter directive used when `RUST_LOG` is absent.
    pub fn default_directive(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "warn,arbor_core=info,arbor_infra=info,arbor_cli=info",
            2 => "info,arbor_core=debug,arbor_infra=debug,arbor_cli=debug",
            _ => "debug,arbor_core=trace,arbor_infra=trace,arbor_cli=trace",
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }
}

/// Initialize the global tracing subscriber.
///
/// - Always installs a `fmt` layer writing to stderr, pretty or JSON.
/// - When `otel` is set, additionally bridges tracing spans to OpenTelemetry
///   using a stdout exporter (swap the exporter for OTLP in production).
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let fmt_layer = match options.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    };

    if options.otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer(TRACER_NAME);
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        tracing_subscriber::registry()
            .with(options.filter())
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(options.filter())
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// No-op when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_raises_engine_level() {
        let quiet = TracingOptions::default();
        assert_eq!(quiet.default_directive(), "warn");

        let chatty = TracingOptions {
            verbosity: 2,
            ..TracingOptions::default()
        };
        assert!(chatty.default_directive().contains("arbor_core=debug"));

        let noisy = TracingOptions {
            verbosity: 9,
            ..TracingOptions::default()
        };
        assert!(noisy.default_directive().contains("arbor_core=trace"));
    }
}
