//! Ingestion input
//!
//! - [`transport`]: message source seam and an in-process transport
//! - [`kafka`]: Kafka consumer group transport
//! - [`consumer`]: message and rebalance loops over a transport
//! - [`envelope`]: message wire format
//!
//! [`Input`] is the decode/dispatch stage: it turns one raw message into
//! writes against the series store, the definition sink and usage
//! accounting.

pub mod consumer;
pub mod envelope;
pub mod kafka;
pub mod transport;

pub use consumer::{Consumer, ConsumerState, StopSignal};
pub use envelope::{decode_envelope, decode_payload, encode_message, Envelope, PayloadFormat};
pub use kafka::{KafkaConfig, KafkaTransport};
pub use transport::{ChannelTransport, Delivery, Notification, Transport};

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, warn};

use crate::engine::{DefinitionSink, SeriesStore, UsageTracker};
use crate::metrics::InputMetrics;

/// Decode/dispatch stage
pub struct Input {
    store: Arc<dyn SeriesStore>,
    defs: Arc<dyn DefinitionSink>,
    usage: Option<Arc<dyn UsageTracker>>,
    metrics: InputMetrics,
}

impl Input {
    /// Create a dispatch stage
    ///
    /// # Arguments
    ///
    /// * `store` - Series storage engine
    /// * `defs` - Receiver of series metadata
    /// * `usage` - Usage accounting, when enabled
    /// * `metrics` - Input metrics
    pub fn new(
        store: Arc<dyn SeriesStore>,
        defs: Arc<dyn DefinitionSink>,
        usage: Option<Arc<dyn UsageTracker>>,
        metrics: InputMetrics,
    ) -> Self {
        Self {
            store,
            defs,
            usage,
            metrics,
        }
    }

    /// Handle one raw message
    ///
    /// Never fails: an undecodable message is skipped as a whole, a bad
    /// record is skipped on its own.
    pub async fn handle(&self, data: &[u8]) {
        let envelope = match decode_envelope(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("skipping message. {}", e);
                self.metrics.record_decode_error();
                return;
            },
        };
        self.metrics.record_message_age(envelope.age(Utc::now()));

        let records = match envelope.decode_payload() {
            Ok(records) => records,
            Err(e) => {
                error!("skipping message. {}", e);
                self.metrics.record_decode_error();
                return;
            },
        };
        self.metrics.record_message_metrics(records.len());

        for record in &records {
            let Some(metric) = record else {
                self.metrics.record_invalid();
                continue;
            };
            if metric.id.is_empty() {
                error!("empty metric id - fix your datastream");
                self.metrics.record_invalid();
                continue;
            }
            // series timestamps are u32 unix seconds
            let Ok(ts) = u32::try_from(metric.time) else {
                warn!(id = %metric.id, time = metric.time, "invalid metric. time out of range");
                self.metrics.record_invalid();
                continue;
            };
            if ts == 0 {
                warn!(id = %metric.id, "invalid metric. time is 0");
            }

            self.defs.add(metric).await;
            self.store.get_or_create(&metric.id).add(ts, metric.value);
            if let Some(usage) = &self.usage {
                usage.add(metric.org_id, &metric.id);
            }
        }
    }

    /// Input metrics
    pub fn metrics(&self) -> &InputMetrics {
        &self.metrics
    }
}
