//! Prometheus metrics for the ingestion path
//!
//! Collectors are registered into a caller-owned [`Registry`] rather than the
//! process-wide default, so several pipelines (and tests) can run side by side.
//! Counters never influence control flow.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metrics of the decode/dispatch stage, labelled with the input name
#[derive(Clone)]
pub struct InputMetrics {
    /// Age of messages when handled (now - produced)
    message_age: Histogram,
    /// Number of metrics carried by each message
    metrics_per_message: Histogram,
    /// Cumulative metrics decoded
    metrics_received: IntCounter,
    /// Records dropped as invalid (holes, empty ids)
    metrics_invalid: IntCounter,
    /// Messages dropped because they could not be decoded
    decode_errors: IntCounter,
}

impl InputMetrics {
    /// Create and register the input metrics
    ///
    /// # Arguments
    ///
    /// * `input` - Name of the input (e.g. "kafka"), used as a const label
    /// * `registry` - Registry owned by the caller
    pub fn new(input: &str, registry: &Registry) -> Result<Self, prometheus::Error> {
        let message_age = Histogram::with_opts(
            HistogramOpts::new(
                "ingest_message_age_seconds",
                "Age of messages when handled, in seconds",
            )
            .const_label("input", input)
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 300.0]),
        )?;
        let metrics_per_message = Histogram::with_opts(
            HistogramOpts::new(
                "ingest_metrics_per_message",
                "Number of metrics in each message",
            )
            .const_label("input", input)
            .buckets(vec![1.0, 10.0, 100.0, 1_000.0, 10_000.0]),
        )?;
        let metrics_received = IntCounter::with_opts(
            Opts::new("ingest_metrics_received_total", "Total metrics decoded")
                .const_label("input", input),
        )?;
        let metrics_invalid = IntCounter::with_opts(
            Opts::new(
                "ingest_metrics_invalid_total",
                "Total metrics dropped as invalid",
            )
            .const_label("input", input),
        )?;
        let decode_errors = IntCounter::with_opts(
            Opts::new(
                "ingest_message_decode_errors_total",
                "Total messages dropped because they could not be decoded",
            )
            .const_label("input", input),
        )?;

        registry.register(Box::new(message_age.clone()))?;
        registry.register(Box::new(metrics_per_message.clone()))?;
        registry.register(Box::new(metrics_received.clone()))?;
        registry.register(Box::new(metrics_invalid.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;

        Ok(Self {
            message_age,
            metrics_per_message,
            metrics_received,
            metrics_invalid,
            decode_errors,
        })
    }

    /// Record the age of a handled message
    #[inline]
    pub fn record_message_age(&self, age: Duration) {
        self.message_age.observe(age.as_secs_f64());
    }

    /// Record the number of metrics in a decoded message
    #[inline]
    pub fn record_message_metrics(&self, count: usize) {
        self.metrics_per_message.observe(count as f64);
        self.metrics_received.inc_by(count as u64);
    }

    /// Record a dropped record
    #[inline]
    pub fn record_invalid(&self) {
        self.metrics_invalid.inc();
    }

    /// Record a message that failed to decode
    #[inline]
    pub fn record_decode_error(&self) {
        self.decode_errors.inc();
    }

    /// Total metrics decoded
    pub fn metrics_received(&self) -> u64 {
        self.metrics_received.get()
    }

    /// Total records dropped as invalid
    pub fn metrics_invalid(&self) -> u64 {
        self.metrics_invalid.get()
    }

    /// Total messages dropped at decode time
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.get()
    }

    /// Number of messages whose age was observed
    pub fn messages_observed(&self) -> u64 {
        self.message_age.get_sample_count()
    }
}

/// Definition handed to the bulk writer
pub const OUTCOME_QUEUED: &str = "queued";
/// Definition shed during warmup
pub const OUTCOME_DISCARDED: &str = "discarded";
/// Definition rejected by validation
pub const OUTCOME_INVALID: &str = "invalid";

/// Metrics of the definition index and its bulk writer
#[derive(Clone)]
pub struct IndexMetrics {
    /// Definition writes by outcome (queued, discarded, invalid)
    writes: IntCounterVec,
    /// Bulk requests issued
    bulk_flushes: IntCounter,
    /// Bulk requests that failed
    bulk_flush_errors: IntCounter,
    /// Documents sent in successful bulk requests
    docs_flushed: IntCounter,
    /// Documents lost in failed bulk requests
    docs_dropped: IntCounter,
}

impl IndexMetrics {
    /// Create and register the index metrics
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let writes = IntCounterVec::new(
            Opts::new("index_writes_total", "Definition writes by outcome"),
            &["outcome"],
        )?;
        let bulk_flushes = IntCounter::new("index_bulk_flushes_total", "Bulk requests issued")?;
        let bulk_flush_errors =
            IntCounter::new("index_bulk_flush_errors_total", "Bulk requests that failed")?;
        let docs_flushed = IntCounter::new(
            "index_docs_flushed_total",
            "Documents written by successful bulk requests",
        )?;
        let docs_dropped = IntCounter::new(
            "index_docs_dropped_total",
            "Documents dropped by failed bulk requests",
        )?;

        registry.register(Box::new(writes.clone()))?;
        registry.register(Box::new(bulk_flushes.clone()))?;
        registry.register(Box::new(bulk_flush_errors.clone()))?;
        registry.register(Box::new(docs_flushed.clone()))?;
        registry.register(Box::new(docs_dropped.clone()))?;

        Ok(Self {
            writes,
            bulk_flushes,
            bulk_flush_errors,
            docs_flushed,
            docs_dropped,
        })
    }

    #[inline]
    pub(crate) fn record_write(&self, outcome: &str) {
        self.writes.with_label_values(&[outcome]).inc();
    }

    #[inline]
    pub(crate) fn record_flush(&self, docs: usize) {
        self.bulk_flushes.inc();
        self.docs_flushed.inc_by(docs as u64);
    }

    #[inline]
    pub(crate) fn record_flush_error(&self, docs: usize) {
        self.bulk_flushes.inc();
        self.bulk_flush_errors.inc();
        self.docs_dropped.inc_by(docs as u64);
    }

    /// Definition writes with the given outcome
    pub fn writes(&self, outcome: &str) -> u64 {
        self.writes.with_label_values(&[outcome]).get()
    }

    /// Bulk requests issued
    pub fn bulk_flushes(&self) -> u64 {
        self.bulk_flushes.get()
    }

    /// Bulk requests that failed
    pub fn bulk_flush_errors(&self) -> u64 {
        self.bulk_flush_errors.get()
    }

    /// Documents written
    pub fn docs_flushed(&self) -> u64 {
        self.docs_flushed.get()
    }

    /// Documents dropped
    pub fn docs_dropped(&self) -> u64 {
        self.docs_dropped.get()
    }
}

/// Render a registry in Prometheus text format
///
/// # Returns
///
/// Result containing the formatted metrics string, or an error if encoding fails
pub fn gather_text(registry: &Registry) -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics are not valid UTF-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_metrics_registered() {
        let registry = Registry::new();
        let metrics = InputMetrics::new("kafka", &registry).unwrap();
        metrics.record_message_metrics(3);
        metrics.record_message_age(Duration::from_millis(5));
        metrics.record_invalid();

        assert_eq!(metrics.metrics_received(), 3);
        assert_eq!(metrics.metrics_invalid(), 1);
        assert_eq!(metrics.messages_observed(), 1);

        let text = gather_text(&registry).unwrap();
        assert!(text.contains("ingest_metrics_received_total"));
        assert!(text.contains("input=\"kafka\""));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        InputMetrics::new("kafka", &registry).unwrap();
        assert!(InputMetrics::new("kafka", &registry).is_err());
    }

    #[test]
    fn test_index_metrics() {
        let registry = Registry::new();
        let metrics = IndexMetrics::new(&registry).unwrap();
        metrics.record_write(OUTCOME_QUEUED);
        metrics.record_write(OUTCOME_QUEUED);
        metrics.record_write(OUTCOME_DISCARDED);
        metrics.record_flush(10);
        metrics.record_flush_error(4);

        assert_eq!(metrics.writes(OUTCOME_QUEUED), 2);
        assert_eq!(metrics.writes(OUTCOME_DISCARDED), 1);
        assert_eq!(metrics.writes(OUTCOME_INVALID), 0);
        assert_eq!(metrics.bulk_flushes(), 2);
        assert_eq!(metrics.bulk_flush_errors(), 1);
        assert_eq!(metrics.docs_flushed(), 10);
        assert_eq!(metrics.docs_dropped(), 4);
    }
}
