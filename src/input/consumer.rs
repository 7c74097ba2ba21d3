//! Consumer lifecycle
//!
//! A [`Consumer`] runs two loops over a [`Transport`]:
//!
//! - the message loop hands every delivery to [`Input::handle`] and commits
//!   it afterwards (at-least-once: a crash between the two redelivers)
//! - the notification loop logs partition rebalances
//!
//! ```text
//! Created ──start──> Running ──stop──> Stopping ──both loops exited──> Stopped
//! ```
//!
//! `stop` closes the transport and returns a [`StopSignal`] that resolves
//! once both loops have exited.
//!
//! Each message is handled on its own task. A panic while handling one
//! message is logged and the message is committed, so the loop keeps going.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::transport::{Notification, Transport};
use super::Input;
use crate::engine::{DefinitionSink, SeriesStore, UsageTracker};
use crate::error::IngestionError;
use crate::metrics::InputMetrics;

/// Lifecycle state of a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Constructed, loops not started
    Created,
    /// Loops running
    Running,
    /// Transport closed, waiting for the loops to exit
    Stopping,
    /// Both loops exited
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsumerState::Created => "created",
            ConsumerState::Running => "running",
            ConsumerState::Stopping => "stopping",
            ConsumerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Completion signal of a consumer stop
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Wait until both consumer loops have exited
    pub async fn wait(mut self) {
        // the sender lives as long as the consumer's joiner task
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    /// Whether both loops have exited
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Consumer group member feeding a dispatch stage
pub struct Consumer<T: Transport> {
    transport: Arc<T>,
    state: Arc<RwLock<ConsumerState>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped_tx: Arc<watch::Sender<bool>>,
    stopped_rx: watch::Receiver<bool>,
}

impl<T: Transport> Consumer<T> {
    /// Wrap a transport; nothing runs until [`Consumer::start`]
    pub fn new(transport: T) -> Self {
        let (stopped_tx, stopped_rx) = watch::channel(false);
        Self {
            transport: Arc::new(transport),
            state: Arc::new(RwLock::new(ConsumerState::Created)),
            handles: Mutex::new(Vec::new()),
            stopped_tx: Arc::new(stopped_tx),
            stopped_rx,
        }
    }

    /// The underlying transport
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConsumerState {
        *self.state.read()
    }

    /// Start the message and notification loops
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `IngestionError::AlreadyStarted` unless the consumer is `Created`.
    pub fn start(
        &self,
        store: Arc<dyn SeriesStore>,
        defs: Arc<dyn DefinitionSink>,
        usage: Option<Arc<dyn UsageTracker>>,
        metrics: InputMetrics,
    ) -> Result<(), IngestionError> {
        let mut state = self.state.write();
        if *state != ConsumerState::Created {
            return Err(IngestionError::AlreadyStarted);
        }

        let input = Arc::new(Input::new(store, defs, usage, metrics));
        let mut handles = self.handles.lock();
        handles.push(tokio::spawn(consume(Arc::clone(&self.transport), input)));
        match self.transport.take_notifications() {
            Some(rx) => handles.push(tokio::spawn(notifications(rx))),
            None => warn!("transport provides no rebalance notifications"),
        }

        *state = ConsumerState::Running;
        info!("consumer started");
        Ok(())
    }

    /// Stop consuming
    ///
    /// Closes the transport and returns the signal that resolves once both
    /// loops have exited. Stopping a stopping or stopped consumer returns
    /// the same signal.
    ///
    /// # Errors
    ///
    /// `IngestionError::NotRunning` if the consumer was never started.
    pub fn stop(&self) -> Result<StopSignal, IngestionError> {
        {
            let mut state = self.state.write();
            match *state {
                ConsumerState::Running => *state = ConsumerState::Stopping,
                ConsumerState::Stopping | ConsumerState::Stopped => return Ok(self.signal()),
                ConsumerState::Created => {
                    return Err(IngestionError::NotRunning(state.to_string()));
                },
            }
        }

        info!("stopping consumer");
        self.transport.close();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        let state = Arc::clone(&self.state);
        let stopped_tx = Arc::clone(&self.stopped_tx);
        tokio::spawn(async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("consumer loop failed: {}", e);
                }
            }
            *state.write() = ConsumerState::Stopped;
            stopped_tx.send_replace(true);
            info!("consumer stopped");
        });

        Ok(self.signal())
    }

    fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.stopped_rx.clone(),
        }
    }
}

async fn consume<T: Transport>(transport: Arc<T>, input: Arc<Input>) {
    while let Some(mut delivery) = transport.recv().await {
        debug!(
            topic = %delivery.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            key = %delivery.key_str(),
            "received message"
        );

        // commit only needs the position
        let payload = std::mem::take(&mut delivery.payload);
        let stage = Arc::clone(&input);
        let handled = tokio::spawn(async move { stage.handle(&payload).await }).await;
        if let Err(e) = handled {
            error!(
                topic = %delivery.topic,
                partition = delivery.partition,
                offset = delivery.offset,
                error = %e,
                "message handling failed, skipping message"
            );
        }

        if let Err(e) = transport.commit(&delivery).await {
            warn!(
                topic = %delivery.topic,
                partition = delivery.partition,
                offset = delivery.offset,
                error = %e,
                "failed to mark offset"
            );
        }
    }
    info!("consumer message loop ended");
}

async fn notifications(mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(n) = rx.recv().await {
        for (topic, partitions) in &n.claimed {
            info!(
                "consumer claimed {} partitions on topic: {}",
                partitions.len(),
                topic
            );
        }
        for (topic, partitions) in &n.released {
            info!(
                "consumer released {} partitions on topic: {}",
                partitions.len(),
                topic
            );
        }
        if n.current.is_empty() {
            info!("consumer is no longer consuming from any partitions");
        } else {
            for (topic, partitions) in &n.current {
                info!(topic = %topic, partitions = ?partitions, "current partitions");
            }
        }
    }
    info!("consumer notification processing stopped");
}
