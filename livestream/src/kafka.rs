use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, ClientContext, Message, Statistics};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::KafkaConfig;

/// Outcome of a failed read, split the way the loop needs to branch on it.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("broker transport failure: {0}")]
    Transport(#[source] KafkaError),
    #[error("timed out waiting for a message")]
    Timeout,
    #[error("error consuming message: {0}")]
    Other(#[source] KafkaError),
}

impl From<KafkaError> for ReadError {
    fn from(err: KafkaError) -> Self {
        match err.rdkafka_error_code() {
            Some(RDKafkaErrorCode::OperationTimedOut) => ReadError::Timeout,
            Some(RDKafkaErrorCode::BrokerTransportFailure)
            | Some(RDKafkaErrorCode::AllBrokersDown) => ReadError::Transport(err),
            _ => ReadError::Other(err),
        }
    }
}

/// One message as read off the topic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

/// Polling consumer the loop drives. Reads block for at most `timeout`.
pub trait BrokerClient: Send + Sync {
    fn subscribe(&self, topics: &[&str]) -> Result<(), KafkaError>;
    fn read(&self, timeout: Duration) -> Result<RawMessage, ReadError>;
    fn close(&self);
}

pub struct LivestreamContext;

impl ClientContext for LivestreamContext {
    fn stats(&self, stats: Statistics) {
        gauge!("livestream_kafka_callback_queue_depth").set(stats.replyq as f64);

        for (_, stats) in stats.brokers {
            let id_string = format!("{}", stats.nodeid);
            gauge!(
                "livestream_kafka_broker_requests_pending",
                "broker" => id_string.clone()
            )
            .set(stats.outbuf_cnt as f64);
            counter!(
                "livestream_kafka_broker_tx_errors_total",
                "broker" => id_string.clone()
            )
            .absolute(stats.txerrs);
            counter!(
                "livestream_kafka_broker_rx_errors_total",
                "broker" => id_string
            )
            .absolute(stats.rxerrs);
        }
    }
}

impl ConsumerContext for LivestreamContext {}

pub struct KafkaBroker {
    consumer: BaseConsumer<LivestreamContext>,
}

impl KafkaBroker {
    pub fn new(config: &KafkaConfig) -> Result<KafkaBroker, KafkaError> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("security.protocol", &config.kafka_security_protocol)
            .set("group.id", &config.kafka_group_id)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("statistics.interval.ms", "10000");

        debug!("rdkafka configuration: {:?}", client_config);
        let consumer: BaseConsumer<LivestreamContext> =
            client_config.create_with_context(LivestreamContext)?;

        Ok(KafkaBroker { consumer })
    }
}

impl BrokerClient for KafkaBroker {
    fn subscribe(&self, topics: &[&str]) -> Result<(), KafkaError> {
        self.consumer.subscribe(topics)?;
        info!(?topics, "subscribed to Kafka topics");
        Ok(())
    }

    /// `poll` also returns `None` right after serving a rebalance or commit
    /// event, so the read is retried until the full timeout has elapsed.
    fn read(&self, timeout: Duration) -> Result<RawMessage, ReadError> {
        match poll_until(timeout, |remaining| self.consumer.poll(remaining)) {
            None => Err(ReadError::Timeout),
            Some(Err(err)) => Err(err.into()),
            Some(Ok(message)) => Ok(RawMessage {
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                partition: message.partition(),
                offset: message.offset(),
            }),
        }
    }

    fn close(&self) {
        self.consumer.unsubscribe();
        info!("unsubscribed from Kafka topics");
    }
}

/// Calls `poll` with whatever is left of `timeout` until it yields a value or
/// the time is up.
fn poll_until<T>(timeout: Duration, mut poll: impl FnMut(Duration) -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Some(value) = poll(remaining) {
            return Some(value);
        }
        if remaining.is_zero() || Instant::now() >= deadline {
            return None;
        }
    }
}
