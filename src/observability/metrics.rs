//! Pipeline metrics recorded through the `metrics` facade.
//!
//! Without an installed recorder every call is a no-op, so library users
//! pay nothing unless they opt in via [`init_metrics`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// All metric names used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Catalog
    CatalogSearches,
    CatalogSearchResults,

    // Fetcher
    FetchCacheHits,
    FetchCacheMisses,
    FetchCoalesced,
    FetchExternalCalls,
    FetchErrors,
    FetchPayloadBytes,
    FetchDuration,

    // Normalizer
    NormalizeRecords,
    NormalizeUnmappedCodes,

    // Shape
    ShapeRowsEmitted,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::CatalogSearches => "statfetch_catalog_searches_total",
            MetricName::CatalogSearchResults => "statfetch_catalog_search_results",
            MetricName::FetchCacheHits => "statfetch_fetch_cache_hits_total",
            MetricName::FetchCacheMisses => "statfetch_fetch_cache_misses_total",
            MetricName::FetchCoalesced => "statfetch_fetch_coalesced_total",
            MetricName::FetchExternalCalls => "statfetch_fetch_external_calls_total",
            MetricName::FetchErrors => "statfetch_fetch_errors_total",
            MetricName::FetchPayloadBytes => "statfetch_fetch_payload_bytes",
            MetricName::FetchDuration => "statfetch_fetch_duration_seconds",
            MetricName::NormalizeRecords => "statfetch_normalize_records_total",
            MetricName::NormalizeUnmappedCodes => "statfetch_normalize_unmapped_codes_total",
            MetricName::ShapeRowsEmitted => "statfetch_shape_rows_emitted_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install a Prometheus recorder with an HTTP listener on `addr`. Idempotent.
pub fn init_metrics(addr: &str) {
    INIT.call_once(|| {
        let addr: SocketAddr = match addr.parse() {
            Ok(a) => a,
            Err(e) => {
                warn!("Invalid metrics addr '{}': {}", addr, e);
                return;
            }
        };
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => info!("Prometheus exporter listening at http://{}/metrics", addr),
            Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
        }
    });
}

pub mod catalog {
    use super::MetricName;

    pub fn search_performed(results: usize) {
        ::metrics::counter!(MetricName::CatalogSearches.as_str()).increment(1);
        ::metrics::histogram!(MetricName::CatalogSearchResults.as_str()).record(results as f64);
    }
}

pub mod fetch {
    use super::MetricName;

    pub fn cache_hit(layer: &'static str) {
        ::metrics::counter!(MetricName::FetchCacheHits.as_str(), "layer" => layer).increment(1);
    }

    pub fn cache_miss() {
        ::metrics::counter!(MetricName::FetchCacheMisses.as_str()).increment(1);
    }

    pub fn coalesced() {
        ::metrics::counter!(MetricName::FetchCoalesced.as_str()).increment(1);
    }

    pub fn external_call(identifier: &str) {
        ::metrics::counter!(MetricName::FetchExternalCalls.as_str(), "identifier" => identifier.to_string())
            .increment(1);
    }

    pub fn error(identifier: &str) {
        ::metrics::counter!(MetricName::FetchErrors.as_str(), "identifier" => identifier.to_string())
            .increment(1);
    }

    pub fn payload_bytes(bytes: usize) {
        ::metrics::histogram!(MetricName::FetchPayloadBytes.as_str()).record(bytes as f64);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::FetchDuration.as_str()).record(secs);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn records_normalized(count: usize, mode: &'static str) {
        ::metrics::counter!(MetricName::NormalizeRecords.as_str(), "mode" => mode).increment(count as u64);
    }

    pub fn unmapped_code(column: &str) {
        ::metrics::counter!(MetricName::NormalizeUnmappedCodes.as_str(), "column" => column.to_string())
            .increment(1);
    }
}

pub mod shape {
    use super::MetricName;

    pub fn rows_emitted(count: usize, target: &'static str) {
        ::metrics::counter!(MetricName::ShapeRowsEmitted.as_str(), "target" => target).increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed_and_unique() {
        let all = [
            MetricName::CatalogSearches,
            MetricName::CatalogSearchResults,
            MetricName::FetchCacheHits,
            MetricName::FetchCacheMisses,
            MetricName::FetchCoalesced,
            MetricName::FetchExternalCalls,
            MetricName::FetchErrors,
            MetricName::FetchPayloadBytes,
            MetricName::FetchDuration,
            MetricName::NormalizeRecords,
            MetricName::NormalizeUnmappedCodes,
            MetricName::ShapeRowsEmitted,
        ];
        let mut names: Vec<&str> = all.iter().map(|m| m.as_str()).collect();
        assert!(names.iter().all(|n| n.starts_with("statfetch_")));
        names.sort();
        names.dedup();
        assert_eq!(names.len(), all.len());
    }

    #[test]
    fn test_prometheus_recorder_sees_pipeline_metrics() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || {
            fetch::cache_miss();
            normalize::records_normalized(3, "numeric");
        });

        let rendered = handle.render();
        assert!(rendered.contains(MetricName::FetchCacheMisses.as_str()));
        assert!(rendered.contains(MetricName::NormalizeRecords.as_str()));
    }
}
