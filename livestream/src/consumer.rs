use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rdkafka::error::KafkaError;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::event::CanonicalEvent;
use crate::kafka::{BrokerClient, ReadError};
use crate::metrics::ConsumerMetrics;
use crate::normalizer::EventNormalizer;
use crate::report::ErrorReporter;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("failed to subscribe to topic {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: KafkaError,
    },
    #[error("the {0} event queue was closed by its receiver")]
    OutputClosed(&'static str),
}

/// Sending halves of the two bounded queues every event is delivered to.
#[derive(Clone)]
pub struct EventQueues {
    pub primary: mpsc::Sender<CanonicalEvent>,
    pub stats: mpsc::Sender<CanonicalEvent>,
}

impl EventQueues {
    pub fn bounded(
        capacity: NonZeroUsize,
    ) -> (
        EventQueues,
        mpsc::Receiver<CanonicalEvent>,
        mpsc::Receiver<CanonicalEvent>,
    ) {
        let (primary, primary_rx) = mpsc::channel(capacity.get());
        let (stats, stats_rx) = mpsc::channel(capacity.get());
        (EventQueues { primary, stats }, primary_rx, stats_rx)
    }
}

/// Reads one topic forever, normalizing each message and handing the result
/// to both event queues.
///
/// The loop is blocking: it must run on its own thread, never on an async
/// runtime worker. A full queue blocks the loop, and with it broker polling.
pub struct LiveEventConsumer<B> {
    broker: Arc<B>,
    topic: String,
    read_timeout: Duration,
    normalizer: EventNormalizer,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Arc<dyn ConsumerMetrics>,
    queues: EventQueues,
    closed: Arc<AtomicBool>,
}

/// Stops a running [`LiveEventConsumer`] from another thread.
pub struct CloseHandle<B> {
    broker: Arc<B>,
    closed: Arc<AtomicBool>,
}

impl<B: BrokerClient> CloseHandle<B> {
    /// Marks the loop as closed and releases the broker client. The loop
    /// returns once its in-flight read completes.
    pub fn close(self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.close();
        }
    }
}

impl<B: BrokerClient + 'static> LiveEventConsumer<B> {
    pub fn new(
        broker: B,
        topic: &str,
        read_timeout: Duration,
        normalizer: EventNormalizer,
        reporter: Arc<dyn ErrorReporter>,
        metrics: Arc<dyn ConsumerMetrics>,
        queues: EventQueues,
    ) -> Self {
        Self {
            broker: Arc::new(broker),
            topic: topic.to_owned(),
            read_timeout,
            normalizer,
            reporter,
            metrics,
            queues,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn close_handle(&self) -> CloseHandle<B> {
        CloseHandle {
            broker: self.broker.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Run the loop on a dedicated, named thread.
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<Result<(), ConsumerError>>> {
        thread::Builder::new()
            .name("livestream-consumer".to_string())
            .spawn(move || self.consume())
    }

    /// Subscribe, then read until closed.
    ///
    /// A subscription failure is reported and returned: the caller is expected
    /// to exit the process. Read errors are counted, reported and polled past.
    pub fn consume(self) -> Result<(), ConsumerError> {
        if let Err(source) = self.broker.subscribe(&[self.topic.as_str()]) {
            let err = ConsumerError::Subscribe {
                topic: self.topic.clone(),
                source,
            };
            self.reporter.report(&err);
            error!(error = %err, "failed to subscribe to topic");
            return Err(err);
        }

        info!(topic = %self.topic, "starting consumer loop");

        loop {
            if self.closed.load(Ordering::SeqCst) {
                info!("consumer closed, stopping loop");
                return Ok(());
            }

            match self.broker.read(self.read_timeout) {
                Ok(message) => {
                    self.metrics.message_consumed();
                    let event = self.normalizer.normalize(&message.payload);
                    self.dispatch(event)?;
                }
                Err(ReadError::Timeout) => self.metrics.read_timeout(),
                Err(err @ ReadError::Transport(_)) => {
                    self.metrics.connect_failure();
                    error!(error = %err, "error consuming message");
                    self.reporter.report(&err);
                }
                Err(err) => {
                    error!(error = %err, "error consuming message");
                    self.reporter.report(&err);
                }
            }
        }
    }

    fn dispatch(&self, event: CanonicalEvent) -> Result<(), ConsumerError> {
        self.queues
            .primary
            .blocking_send(event.clone())
            .map_err(|_| ConsumerError::OutputClosed("primary"))?;
        self.queues
            .stats
            .blocking_send(event)
            .map_err(|_| ConsumerError::OutputClosed("stats"))?;
        self.metrics.event_emitted();
        Ok(())
    }
}
