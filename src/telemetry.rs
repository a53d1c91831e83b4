//! Diagnostics for hook and CLI runs.
//!
//! Everything goes to stderr: stdout carries the hook's JSON decision and
//! must stay clean. With the `otel` feature and `OTEL_EXPORTER_OTLP_ENDPOINT`
//! set, spans and events are also exported over OTLP/HTTP.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directives, e.g. `HIVE_HOOKS_LOG=hive_hooks=debug`.
pub const LOG_ENV: &str = "HIVE_HOOKS_LOG";
/// `json` switches stderr output to one JSON object per line.
pub const LOG_FORMAT_ENV: &str = "HIVE_HOOKS_LOG_FORMAT";

const SERVICE_NAME: &str = "hive-hooks";

/// Flushes exporters when dropped. Hold it for the life of `main`.
#[derive(Default)]
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    otel: Option<otel::Providers>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        if let Some(providers) = self.otel.take() {
            providers.shutdown();
        }
    }
}

fn env_filter() -> EnvFilter {
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

fn json_output() -> bool {
    std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init() -> TelemetryGuard {
    let json = json_output();
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| fmt::layer().compact().with_writer(std::io::stderr));

    let registry = tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(text_layer);

    #[cfg(feature = "otel")]
    {
        use tracing_subscriber::Layer as _;

        let providers = otel::Providers::from_env();
        let trace_layer = providers
            .as_ref()
            .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer()));
        let log_layer = providers.as_ref().map(|p| {
            opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(p.logger())
                .with_filter(otel::exporter_targets_off())
        });
        let _ = registry.with(trace_layer).with(log_layer).try_init();
        if providers.is_some() {
            tracing::debug!("OTLP export enabled");
        }
        TelemetryGuard { otel: providers }
    }

    #[cfg(not(feature = "otel"))]
    {
        let _ = registry.try_init();
        TelemetryGuard::default()
    }
}

#[cfg(feature = "otel")]
mod otel {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::{LogExporter, SpanExporter};
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::logs::SdkLoggerProvider;
    use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
    use tracing_subscriber::filter::{LevelFilter, Targets};

    use super::SERVICE_NAME;

    const ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

    /// The exporter's own HTTP stack must not feed back into itself.
    pub fn exporter_targets_off() -> Targets {
        Targets::new()
            .with_default(LevelFilter::TRACE)
            .with_target("opentelemetry", LevelFilter::OFF)
            .with_target("opentelemetry_sdk", LevelFilter::OFF)
            .with_target("opentelemetry_otlp", LevelFilter::OFF)
            .with_target("reqwest", LevelFilter::OFF)
            .with_target("hyper", LevelFilter::OFF)
    }

    pub struct Providers {
        tracer: SdkTracerProvider,
        logger: SdkLoggerProvider,
    }

    impl Providers {
        /// Build exporters when an endpoint is configured. Exporter errors
        /// disable export rather than failing the run.
        pub fn from_env() -> Option<Self> {
            std::env::var(ENDPOINT_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty())?;

            let resource = Resource::builder().with_service_name(SERVICE_NAME).build();
            let spans = SpanExporter::builder().with_http().build().ok()?;
            let logs = LogExporter::builder().with_http().build().ok()?;

            let tracer = SdkTracerProvider::builder()
                .with_simple_exporter(spans)
                .with_resource(resource.clone())
                .build();
            let logger = SdkLoggerProvider::builder()
                .with_simple_exporter(logs)
                .with_resource(resource)
                .build();
            Some(Self { tracer, logger })
        }

        pub fn tracer(&self) -> SdkTracer {
            self.tracer.tracer(SERVICE_NAME)
        }

        pub fn logger(&self) -> &SdkLoggerProvider {
            &self.logger
        }

        pub fn shutdown(self) {
            let _ = self.tracer.shutdown();
            let _ = self.logger.shutdown();
        }
    }
}
