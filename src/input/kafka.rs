//! Kafka transport
//!
//! A consumer group member built on `rdkafka`. Offsets are stored only when a
//! message is committed after handling, and stored offsets are committed in
//! the background. Partition rebalances are reported as [`Notification`]s.

use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer, Consumer as _, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::message::Message;
use rdkafka::{ClientContext, TopicPartitionList};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::transport::{Assignment, Delivery, Notification, Transport};
use crate::error::TransportError;

/// Kafka consumer configuration
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Bootstrap brokers, `host:port`
    pub brokers: Vec<String>,
    /// Topic to consume
    pub topic: String,
    /// Consumer group id
    pub group_id: String,
    /// Group session timeout
    pub session_timeout: Duration,
    /// Interval of background offset commits
    pub commit_interval: Duration,
    /// Where to start without a committed offset (`latest` or `earliest`)
    pub offset_reset: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "mdm".to_string(),
            group_id: "group1".to_string(),
            session_timeout: Duration::from_secs(30),
            commit_interval: Duration::from_secs(1),
            offset_reset: "latest".to_string(),
        }
    }
}

impl KafkaConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.brokers.is_empty() {
            return Err("at least one broker is required".to_string());
        }
        for broker in &self.brokers {
            match broker.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {},
                _ => return Err(format!("invalid broker address {:?}", broker)),
            }
        }
        if self.topic.is_empty() {
            return Err("topic cannot be empty".to_string());
        }
        if self.group_id.is_empty() {
            return Err("group_id cannot be empty".to_string());
        }
        if self.session_timeout.is_zero() {
            return Err("session_timeout must be > 0".to_string());
        }
        if self.commit_interval.is_zero() {
            return Err("commit_interval must be > 0".to_string());
        }
        match self.offset_reset.as_str() {
            "latest" | "earliest" => Ok(()),
            other => Err(format!(
                "offset_reset must be latest or earliest, got {:?}",
                other
            )),
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("group.id", &self.group_id)
            .set(
                "session.timeout.ms",
                self.session_timeout.as_millis().to_string(),
            )
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                self.commit_interval.as_millis().to_string(),
            )
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.offset_reset);
        config
    }
}

fn to_assignment(tpl: &TopicPartitionList) -> Assignment {
    let mut out = Assignment::new();
    for elem in tpl.elements() {
        out.entry(elem.topic().to_string())
            .or_default()
            .push(elem.partition());
    }
    for partitions in out.values_mut() {
        partitions.sort_unstable();
    }
    out
}

/// Consumer context turning rebalances into notifications
struct RebalanceContext {
    notify: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
}

impl RebalanceContext {
    fn send(&self, notification: Notification) {
        if let Some(tx) = self.notify.lock().as_ref() {
            let _ = tx.send(notification);
        }
    }

    fn close(&self) {
        self.notify.lock().take();
    }
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        let (claimed, released) = match rebalance {
            Rebalance::Assign(tpl) => (to_assignment(tpl), Assignment::new()),
            Rebalance::Revoke(tpl) => (Assignment::new(), to_assignment(tpl)),
            Rebalance::Error(e) => {
                warn!("kafka rebalance failed: {}", e);
                return;
            },
        };

        let current = match base_consumer.assignment() {
            Ok(tpl) => to_assignment(&tpl),
            Err(e) => {
                warn!("failed to read partition assignment: {}", e);
                Assignment::new()
            },
        };

        self.send(Notification {
            claimed,
            released,
            current,
        });
    }
}

/// Kafka consumer group member
pub struct KafkaTransport {
    consumer: StreamConsumer<RebalanceContext>,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    closed: CancellationToken,
}

impl KafkaTransport {
    /// Create the consumer and subscribe to the configured topic
    pub fn new(config: &KafkaConfig) -> Result<Self, TransportError> {
        config.validate().map_err(TransportError::Config)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let context = RebalanceContext {
            notify: Mutex::new(Some(tx)),
        };
        let consumer: StreamConsumer<RebalanceContext> =
            config.client_config().create_with_context(context)?;
        consumer.subscribe(&[config.topic.as_str()])?;

        info!(
            brokers = %config.brokers.join(","),
            topic = %config.topic,
            group = %config.group_id,
            "kafka consumer started"
        );

        Ok(Self {
            consumer,
            notifications: Mutex::new(Some(rx)),
            closed: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn recv(&self) -> Option<Delivery> {
        loop {
            let result = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return None,
                result = self.consumer.recv() => result,
            };

            match result {
                Ok(msg) => {
                    return Some(Delivery {
                        topic: msg.topic().to_string(),
                        partition: msg.partition(),
                        offset: msg.offset(),
                        key: msg.key().map(|k| k.to_vec()),
                        payload: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
                    });
                },
                Err(e) => warn!("kafka receive error: {}", e),
            }
        }
    }

    async fn commit(&self, delivery: &Delivery) -> Result<(), TransportError> {
        // the stored offset is the next one to read
        self.consumer
            .store_offset(&delivery.topic, delivery.partition, delivery.offset + 1)
            .map_err(|e| TransportError::Commit(e.to_string()))
    }

    fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.notifications.lock().take()
    }

    fn close(&self) {
        self.closed.cancel();
        self.consumer.context().close();
        self.consumer.unsubscribe();
        info!("kafka consumer closed");
    }
}
