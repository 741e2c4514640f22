use derive_more::{Display, Error, From};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::configuration::HoneycombConfiguration;
use crate::honeycomb::get_honeycomb_tracer;

/// Installs the global subscriber: `RUST_LOG` filtering (default `info`), a fmt
/// layer, and OTLP export to Honeycomb when it is configured.
pub fn init(honeycomb: Option<&HoneycombConfiguration>) -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    match honeycomb {
        Some(config) => {
            let tracer = get_honeycomb_tracer(config)?;
            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
        }
        None => registry.try_init()?,
    }
    Ok(())
}

#[derive(Debug, Display, From, Error)]
pub enum Error {
    #[display(fmt = "MetadataValue: {}", "_0")]
    MetadataValue(tonic::metadata::errors::InvalidMetadataValue),
    #[display(fmt = "Trace: {}", "_0")]
    Trace(opentelemetry::trace::TraceError),
    #[display(fmt = "Init: {}", "_0")]
    Init(tracing_subscriber::util::TryInitError),
}
