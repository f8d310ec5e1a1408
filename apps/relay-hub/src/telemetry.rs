//! Logging, optional span export and the Prometheus recorder behind
//! `/metrics`.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_sdk::{
    resource::Resource,
    trace::{Sampler, SdkTracerProvider},
};
use opentelemetry_stdout::SpanExporter;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    config::TelemetryConfig,
    stats::{describe_metrics, FANOUT_BUCKETS, FANOUT_SIZE},
};

const SERVICE_NAME: &str = "relay-hub";

pub struct Telemetry {
    metrics: PrometheusHandle,
    spans: Option<SdkTracerProvider>,
}

impl Telemetry {
    pub fn init(config: &TelemetryConfig) -> Result<Self> {
        let metrics = prometheus_builder()?
            .install_recorder()
            .context("prometheus recorder already installed")?;
        describe_metrics();

        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.log_filter)
                .with_context(|| format!("invalid log filter {:?}", config.log_filter))?,
        };

        let spans = config.otel_stdout.then(stdout_spans);
        let otel_layer = spans
            .as_ref()
            .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .with(otel_layer)
            .try_init()
            .context("tracing subscriber already installed")?;

        if let Some(provider) = &spans {
            opentelemetry::global::set_tracer_provider(provider.clone());
        }

        Ok(Self { metrics, spans })
    }

    pub fn metrics_handle(&self) -> PrometheusHandle {
        self.metrics.clone()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = self.spans.take() {
            if let Err(err) = provider.shutdown() {
                warn!(error = %err, "span exporter did not shut down cleanly");
            }
        }
    }
}

/// Fan-out sizes are small integers, so the default latency buckets are
/// replaced for that histogram.
fn prometheus_builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(FANOUT_SIZE.to_string()), FANOUT_BUCKETS)
        .context("invalid fan-out histogram buckets")
}

fn stdout_spans() -> SdkTracerProvider {
    SdkTracerProvider::builder()
        .with_simple_exporter(SpanExporter::default())
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(
            Resource::builder()
                .with_attributes(vec![KeyValue::new("service.name", SERVICE_NAME)])
                .build(),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn fanout_buckets_are_accepted() {
        assert!(prometheus_builder().is_ok());
    }

    #[test_timeout::timeout]
    fn fanout_buckets_are_sorted() {
        assert!(FANOUT_BUCKETS.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
