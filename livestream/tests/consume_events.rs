use std::collections::VecDeque;
use std::error::Error;
use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use geoip::{Coordinates, GeoIpError, GeoLocator};
use livestream::consumer::{EventQueues, LiveEventConsumer};
use livestream::kafka::{BrokerClient, RawMessage, ReadError};
use livestream::metrics::{ConsumerMetrics, DecodeStage};
use livestream::normalizer::EventNormalizer;
use livestream::report::ErrorReporter;
use rdkafka::error::KafkaError;
use serde_json::json;

struct QueueBroker {
    messages: Mutex<VecDeque<Vec<u8>>>,
    closed: Mutex<bool>,
    wake: Condvar,
}

impl QueueBroker {
    fn new(messages: Vec<Vec<u8>>) -> Self {
        Self {
            messages: Mutex::new(messages.into()),
            closed: Mutex::new(false),
            wake: Condvar::new(),
        }
    }
}

impl BrokerClient for QueueBroker {
    fn subscribe(&self, _topics: &[&str]) -> Result<(), KafkaError> {
        Ok(())
    }

    fn read(&self, _timeout: Duration) -> Result<RawMessage, ReadError> {
        if let Some(payload) = self.messages.lock().unwrap().pop_front() {
            return Ok(RawMessage {
                payload,
                partition: 0,
                offset: 0,
            });
        }
        let mut closed = self.closed.lock().unwrap();
        while !*closed {
            closed = self.wake.wait(closed).unwrap();
        }
        Err(ReadError::Timeout)
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
        self.wake.notify_all();
    }
}

/// Knows a single address, everything else parses but is unknown.
struct TableLocator;

impl GeoLocator for TableLocator {
    fn lookup(&self, ip: &str) -> Result<Coordinates, GeoIpError> {
        match geoip::parse_ip(ip)?.to_string().as_str() {
            "31.28.64.3" => Ok(Coordinates {
                lat: 51.5,
                lng: -0.12,
            }),
            _ => Ok(Coordinates::default()),
        }
    }
}

#[derive(Default)]
struct Reports(Mutex<Vec<String>>);

impl ErrorReporter for Reports {
    fn report(&self, error: &(dyn Error + 'static)) {
        self.0.lock().unwrap().push(error.to_string());
    }
}

struct NoMetrics;

impl ConsumerMetrics for NoMetrics {
    fn message_consumed(&self) {}
    fn read_timeout(&self) {}
    fn connect_failure(&self) {}
    fn decode_failure(&self, _stage: DecodeStage) {}
    fn event_emitted(&self) {}
}

fn captured(uuid: &str, ip: &str, data: serde_json::Value) -> Vec<u8> {
    json!({
        "uuid": uuid,
        "distinct_id": "6a1a2f5e-user",
        "ip": ip,
        "data": data.to_string(),
        "now": "2024-03-01T12:29:59.000Z",
        "sent_at": "2024-03-01T12:29:58.000Z",
        "token": "phc_project"
    })
    .to_string()
    .into_bytes()
}

#[test]
fn consumes_normalizes_and_fans_out() {
    let broker = QueueBroker::new(vec![
        captured(
            "0001",
            "31.28.64.3",
            json!({"event": "$pageview", "properties": {"$current_url": "https://posthog.com"}}),
        ),
        b"garbage".to_vec(),
        captured(
            "0002",
            "10.0.0.1",
            json!({"event": "$autocapture", "properties": {"$ip": "not an ip"}}),
        ),
    ]);
    let reports = Arc::new(Reports::default());
    let normalizer = EventNormalizer::new(
        Arc::new(TableLocator),
        reports.clone(),
        Arc::new(NoMetrics),
    );
    let (queues, mut primary, mut stats) = EventQueues::bounded(NonZeroUsize::new(8).unwrap());
    let consumer = LiveEventConsumer::new(
        broker,
        "events_plugin_ingestion",
        Duration::from_millis(100),
        normalizer,
        reports.clone(),
        Arc::new(NoMetrics),
        queues,
    );
    let handle = consumer.close_handle();
    let thread = consumer.spawn().unwrap();

    let first = primary.blocking_recv().unwrap();
    assert_eq!(first.uuid, "0001");
    assert_eq!(first.distinct_id, "6a1a2f5e-user");
    assert_eq!(first.token, "phc_project");
    assert_eq!(first.event, "$pageview");
    assert_eq!((first.lat, first.lng), (51.5, -0.12));
    assert_eq!(
        first.properties.get("$current_url"),
        Some(&json!("https://posthog.com"))
    );

    let second = primary.blocking_recv().unwrap();
    assert_eq!(second.uuid, "");
    assert_eq!(second.event, "");
    assert_eq!(second.token, "");

    let third = primary.blocking_recv().unwrap();
    assert_eq!(third.uuid, "0002");
    assert_eq!((third.lat, third.lng), (0.0, 0.0));

    for expected in [first, second, third] {
        assert_eq!(stats.blocking_recv().unwrap(), expected);
    }

    handle.close();
    thread.join().unwrap().unwrap();

    assert!(primary.blocking_recv().is_none());
    assert!(reports.0.lock().unwrap().is_empty());
}
