use axum::{routing::get, Router};
use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const MESSAGES_CONSUMED: &str = "livestream_messages_consumed_total";
pub const READ_TIMEOUTS: &str = "livestream_read_timeouts_total";
pub const CONNECT_FAILURES: &str = "livestream_connect_failures_total";
pub const DECODE_FAILURES: &str = "livestream_decode_failures_total";
pub const EVENTS_EMITTED: &str = "livestream_events_emitted_total";
pub const STATS_EVENTS: &str = "livestream_stats_events_total";

/// Which decoding stage rejected a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStage {
    Envelope,
    Payload,
}

impl DecodeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeStage::Envelope => "envelope",
            DecodeStage::Payload => "payload",
        }
    }
}

/// Counters the consumer loop bumps as it goes.
pub trait ConsumerMetrics: Send + Sync {
    fn message_consumed(&self);
    fn read_timeout(&self);
    fn connect_failure(&self);
    fn decode_failure(&self, stage: DecodeStage);
    fn event_emitted(&self);
}

/// Records to whatever `metrics` recorder is installed, Prometheus in production.
#[derive(Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl ConsumerMetrics for PrometheusMetrics {
    fn message_consumed(&self) {
        counter!(MESSAGES_CONSUMED).increment(1);
    }

    fn read_timeout(&self) {
        counter!(READ_TIMEOUTS).increment(1);
    }

    fn connect_failure(&self) {
        counter!(CONNECT_FAILURES).increment(1);
    }

    fn decode_failure(&self, stage: DecodeStage) {
        counter!(DECODE_FAILURES, "stage" => stage.as_str()).increment(1);
    }

    fn event_emitted(&self) {
        counter!(EVENTS_EMITTED).increment(1);
    }
}

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Build a Router exposing the Prometheus scrape endpoint and a liveness probe.
pub fn setup_metrics_router(recorder_handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/_liveness", get(|| std::future::ready("ok")))
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}
