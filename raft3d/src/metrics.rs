//! Metrics collection module for the inventory service
//!
//! This module provides functionality for collecting and exposing service metrics
//! using Prometheus.

use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::time::Instant;

use crate::engine::{ApplyResult, EntityKind, Operation};

lazy_static! {
    /// Global Prometheus registry instance
    pub static ref REGISTRY_INSTANCE: Registry = Registry::new();

    /// Counter for tracking request counts by method
    pub static ref REQ_COUNTER_VEC: CounterVec =
        CounterVec::new(Opts::new("request_counter", "request counter"), &["method"]).unwrap();

    /// Histogram for tracking method execution times
    pub static ref METHOD_HISTOGRAM_VEC: HistogramVec = HistogramVec::new(
        HistogramOpts::new("method_cost", "method cost"),
        &["method"]
    )
    .unwrap();

    /// Committed commands applied to the store
    pub static ref APPLIED_COUNTER_VEC: CounterVec = CounterVec::new(
        Opts::new("commands_applied", "committed commands applied"),
        &["entity", "op"]
    )
    .unwrap();

    /// Committed commands rejected by the apply engine
    pub static ref REJECTED_COUNTER_VEC: CounterVec = CounterVec::new(
        Opts::new("commands_rejected", "committed commands rejected"),
        &["entity", "error"]
    )
    .unwrap();
}

/// Initializes the metrics registry
///
/// Registers all metric collectors with the global registry. Calling it
/// again is harmless.
pub fn init_registry() {
    let collectors: [Box<dyn Collector>; 4] = [
        Box::new(REQ_COUNTER_VEC.clone()),
        Box::new(METHOD_HISTOGRAM_VEC.clone()),
        Box::new(APPLIED_COUNTER_VEC.clone()),
        Box::new(REJECTED_COUNTER_VEC.clone()),
    ];
    for collector in collectors {
        if let Err(e) = register(collector) {
            log::error!("Failed to register metric: {}", e);
        }
    }
}

/// Adds one collector to the registry. A collector that is already
/// registered is not an error.
fn register(collector: Box<dyn Collector>) -> Result<(), prometheus::Error> {
    match REGISTRY_INSTANCE.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Counts one committed command. `target` is `None` when the entry could
/// not be decoded into a command.
pub fn record_apply(target: Option<(EntityKind, Operation)>, result: &ApplyResult) {
    let entity = target.map_or("unknown", |(kind, _)| kind.as_str());
    match result {
        Ok(_) => {
            let op = target.map_or("unknown", |(_, op)| op.as_str());
            APPLIED_COUNTER_VEC.with_label_values(&[entity, op]).inc();
        }
        Err(e) => {
            REJECTED_COUNTER_VEC
                .with_label_values(&[entity, e.kind().as_str()])
                .inc();
        }
    }
}

/// Records metrics for an async operation
///
/// Increments the request counter, runs `handler` and observes its
/// execution time.
///
/// # Arguments
///
/// * `method_name` - Name of the method being measured
/// * `handler` - Async function to execute and measure
///
/// # Returns
///
/// Returns the result of the handler function
pub async fn record_metrics<F, Fut, T>(method_name: &'static str, handler: F) -> T
where
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = T> + Send,
{
    let start = Instant::now();
    REQ_COUNTER_VEC.with_label_values(&[method_name]).inc();
    let result = handler().await;

    let elapsed = start.elapsed();
    METHOD_HISTOGRAM_VEC
        .with_label_values(&[method_name])
        .observe(elapsed.as_secs_f64());

    result
}

/// Text exposition of every registered metric
pub fn gather() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY_INSTANCE.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ApplyError;

    #[tokio::test]
    async fn test_record_metrics() {
        init_registry();
        let value = record_metrics("test_method", || async { 42 }).await;
        assert_eq!(value, 42);
        assert!(REQ_COUNTER_VEC.with_label_values(&["test_method"]).get() >= 1.0);

        let text = String::from_utf8(gather().unwrap()).unwrap();
        assert!(text.contains("request_counter"));
    }

    #[test]
    fn test_register_ignores_only_duplicates() {
        init_registry();
        init_registry();
        assert!(register(Box::new(REQ_COUNTER_VEC.clone())).is_ok());

        // Same name, different label set: a real conflict.
        let clash = CounterVec::new(
            Opts::new("request_counter", "request counter").const_label("node", "1"),
            &["method"],
        )
        .unwrap();
        assert!(register(Box::new(clash)).is_err());
    }

    #[test]
    fn test_record_apply() {
        init_registry();
        let rejected = REJECTED_COUNTER_VEC.with_label_values(&["filament", "not_found"]);
        let before = rejected.get();
        record_apply(
            Some((EntityKind::Filament, Operation::Delete)),
            &Err(ApplyError::NotFound {
                kind: EntityKind::Filament,
                id: "f1".to_string(),
            }),
        );
        assert_eq!(rejected.get(), before + 1.0);

        let decode = REJECTED_COUNTER_VEC.with_label_values(&["unknown", "decode"]);
        let before = decode.get();
        record_apply(None, &Err(ApplyError::Decode("bad".to_string())));
        assert_eq!(decode.get(), before + 1.0);
    }
}
