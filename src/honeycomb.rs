use opentelemetry::sdk::trace::Tracer;
use opentelemetry_otlp::WithExportConfig;

use crate::configuration::HoneycombConfiguration;
use crate::telemetry::Error;

pub fn get_honeycomb_tracer(config: &HoneycombConfiguration) -> Result<Tracer, Error> {
    let mut map = tonic::metadata::MetadataMap::with_capacity(2);

    map.insert("x-honeycomb-team", config.api_key.parse()?);
    map.insert("x-honeycomb-dataset", config.dataset.parse()?);
    let otlp_exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint("https://api.honeycomb.io")
        .with_metadata(map);
    Ok(opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(otlp_exporter)
        .install_simple()?)
}
