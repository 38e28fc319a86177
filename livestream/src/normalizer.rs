use std::sync::Arc;

use chrono::{DateTime, Utc};
use geoip::{GeoIpError, GeoLocator};
use tracing::{info, warn};

use crate::event::{CanonicalEvent, RawEnvelope};
use crate::metrics::{ConsumerMetrics, DecodeStage};
use crate::report::ErrorReporter;

/// Turns raw topic messages into canonical events.
///
/// Malformed input never aborts normalization: every call returns an event,
/// possibly with empty fields, and the problem is logged.
#[derive(Clone)]
pub struct EventNormalizer {
    geolocator: Arc<dyn GeoLocator>,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Arc<dyn ConsumerMetrics>,
}

impl EventNormalizer {
    pub fn new(
        geolocator: Arc<dyn GeoLocator>,
        reporter: Arc<dyn ErrorReporter>,
        metrics: Arc<dyn ConsumerMetrics>,
    ) -> Self {
        Self {
            geolocator,
            reporter,
            metrics,
        }
    }

    pub fn normalize(&self, raw: &[u8]) -> CanonicalEvent {
        self.normalize_at(raw, Utc::now())
    }

    pub fn normalize_at(&self, raw: &[u8], now: DateTime<Utc>) -> CanonicalEvent {
        let mut event = CanonicalEvent::received_at(now);

        // A broken envelope has no payload worth decoding
        let envelope = match RawEnvelope::from_bytes(raw) {
            Ok(envelope) => {
                if let Err(err) = event.merge_payload(envelope.data.as_bytes()) {
                    warn!(error = %err, data = %envelope.data, "error decoding event payload");
                    self.metrics.decode_failure(DecodeStage::Payload);
                }
                envelope
            }
            Err(err) => {
                warn!(error = %err, data = %String::from_utf8_lossy(raw), "error decoding envelope");
                self.metrics.decode_failure(DecodeStage::Envelope);
                RawEnvelope::default()
            }
        };

        event.uuid = envelope.uuid.clone();
        event.distinct_id = envelope.distinct_id.clone();

        match resolve_token(&envelope, &event) {
            Some(token) => event.token = token,
            None => info!(
                data = %String::from_utf8_lossy(raw),
                "no valid token found in event"
            ),
        }

        if let Some(ip) = resolve_ip(&envelope, &event).map(str::to_owned) {
            self.enrich(&mut event, &ip);
        }

        event
    }

    fn enrich(&self, event: &mut CanonicalEvent, ip: &str) {
        match self.geolocator.lookup(ip) {
            Ok(coordinates) => {
                event.lat = coordinates.lat;
                event.lng = coordinates.lng;
            }
            // Garbage in the IP field is the client's problem, not ours
            Err(GeoIpError::InvalidIp) => {}
            Err(err) => self.reporter.report(&err),
        }
    }
}

/// Envelope token, then the payload's `api_key`, then `properties.token`.
pub fn resolve_token(envelope: &RawEnvelope, event: &CanonicalEvent) -> Option<String> {
    if !envelope.token.is_empty() {
        return Some(envelope.token.clone());
    }
    if !event.token.is_empty() {
        return Some(event.token.clone());
    }
    event
        .string_property("token")
        .filter(|token| !token.is_empty())
        .map(String::from)
}

/// The `$ip` property when it is a non-empty string, else the envelope's `ip`.
pub fn resolve_ip<'a>(envelope: &'a RawEnvelope, event: &'a CanonicalEvent) -> Option<&'a str> {
    event
        .string_property("$ip")
        .filter(|ip| !ip.is_empty())
        .or_else(|| Some(envelope.ip.as_str()).filter(|ip| !ip.is_empty()))
}
