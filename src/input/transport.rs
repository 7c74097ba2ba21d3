//! Transport seam of the consumer
//!
//! A transport delivers messages of a consumer group and reports partition
//! rebalances. [`ChannelTransport`] is an in-process implementation for tests
//! and embedding.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Partitions per topic
pub type Assignment = BTreeMap<String, Vec<i32>>;

/// One message received from the transport
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Topic the message was read from
    pub topic: String,
    /// Partition of the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Message key
    pub key: Option<Vec<u8>>,
    /// Raw message
    pub payload: Vec<u8>,
}

impl Delivery {
    /// Key as text for logging
    pub fn key_str(&self) -> String {
        self.key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default()
    }
}

/// Partition rebalance event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notification {
    /// Partitions newly assigned to this consumer
    pub claimed: Assignment,
    /// Partitions taken away from this consumer
    pub released: Assignment,
    /// Full assignment after the rebalance
    pub current: Assignment,
}

/// Message source of a consumer group member
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Next message; `None` once the transport is closed
    async fn recv(&self) -> Option<Delivery>;

    /// Mark `delivery` as processed
    async fn commit(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Rebalance event stream; handed out once
    fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<Notification>>;

    /// Close the transport
    ///
    /// After this `recv` returns `None` and the notification stream ends.
    fn close(&self);
}

/// In-process transport fed through a channel
pub struct ChannelTransport {
    rx: tokio::sync::Mutex<mpsc::Receiver<Delivery>>,
    notify_tx: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    notify_rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    committed: Mutex<Vec<(String, i32, i64)>>,
    fail_commits: AtomicBool,
    closed: CancellationToken,
}

impl ChannelTransport {
    /// Create a transport and the sender feeding it
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let transport = Self {
            rx: tokio::sync::Mutex::new(rx),
            notify_tx: Mutex::new(Some(notify_tx)),
            notify_rx: Mutex::new(Some(notify_rx)),
            committed: Mutex::new(Vec::new()),
            fail_commits: AtomicBool::new(false),
            closed: CancellationToken::new(),
        };
        (transport, tx)
    }

    /// Push a rebalance event; ignored once closed
    pub fn notify(&self, notification: Notification) {
        if let Some(tx) = self.notify_tx.lock().as_ref() {
            let _ = tx.send(notification);
        }
    }

    /// Offsets committed so far as `(topic, partition, offset)`
    pub fn committed(&self) -> Vec<(String, i32, i64)> {
        self.committed.lock().clone()
    }

    /// Make every following commit fail
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv(&self) -> Option<Delivery> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            delivery = rx.recv() => delivery,
        }
    }

    async fn commit(&self, delivery: &Delivery) -> Result<(), TransportError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(TransportError::Commit(format!(
                "{}/{}@{}: commits disabled",
                delivery.topic, delivery.partition, delivery.offset
            )));
        }
        self.committed
            .lock()
            .push((delivery.topic.clone(), delivery.partition, delivery.offset));
        Ok(())
    }

    fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.notify_rx.lock().take()
    }

    fn close(&self) {
        self.closed.cancel();
        self.notify_tx.lock().take();
    }
}
