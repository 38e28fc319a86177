//! Consume captured events from Kafka and fan them out, geolocated, to the
//! live event and stats queues.
use std::sync::Arc;

use anyhow::{anyhow, Context};
use envconfig::Envconfig;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use geoip::MaxMindLocator;
use livestream::config::Config;
use livestream::consumer::{EventQueues, LiveEventConsumer};
use livestream::event::CanonicalEvent;
use livestream::kafka::KafkaBroker;
use livestream::metrics::{
    serve, setup_metrics_recorder, setup_metrics_router, PrometheusMetrics, STATS_EVENTS,
};
use livestream::normalizer::EventNormalizer;
use livestream::report::LogReporter;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

async fn drain_primary(mut events: mpsc::Receiver<CanonicalEvent>) {
    while let Some(event) = events.recv().await {
        tracing::debug!(
            uuid = %event.uuid,
            event = %event.event,
            token = %event.token,
            "live event"
        );
    }
}

async fn drain_stats(mut events: mpsc::Receiver<CanonicalEvent>) {
    while let Some(_event) = events.recv().await {
        metrics::counter!(STATS_EVENTS).increment(1);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::init_from_env().context("Invalid configuration")?;

    let recorder_handle = setup_metrics_recorder().context("failed to install metrics recorder")?;
    let bind = config.bind();
    tokio::spawn(async move {
        if let Err(e) = serve(setup_metrics_router(recorder_handle), &bind).await {
            tracing::error!("failed to serve metrics on {}: {}", bind, e);
        }
    });

    let geolocator = MaxMindLocator::new(&config.mmdb_path)
        .with_context(|| format!("failed to open GeoIP database {}", config.mmdb_path))?;
    let broker = KafkaBroker::new(&config.kafka).context("failed to create Kafka consumer")?;

    let reporter = Arc::new(LogReporter);
    let metrics = Arc::new(PrometheusMetrics);
    let normalizer = EventNormalizer::new(Arc::new(geolocator), reporter.clone(), metrics.clone());
    let (queues, primary_rx, stats_rx) = EventQueues::bounded(config.output_queue_capacity);

    let consumer = LiveEventConsumer::new(
        broker,
        &config.kafka.kafka_topic,
        config.kafka.kafka_read_timeout_ms.0,
        normalizer,
        reporter,
        metrics,
        queues,
    );
    let close_handle = consumer.close_handle();
    let consumer_thread = consumer.spawn().context("failed to spawn consumer thread")?;

    tokio::spawn(drain_primary(primary_rx));
    tokio::spawn(drain_stats(stats_rx));
    tokio::spawn(async move {
        shutdown().await;
        close_handle.close();
    });

    let joined = tokio::task::spawn_blocking(move || consumer_thread.join()).await;

    match joined.context("consumer join task failed")? {
        Ok(result) => result.context("consumer loop stopped")?,
        Err(_) => return Err(anyhow!("consumer thread panicked")),
    }

    tracing::info!("consumer loop stopped");
    Ok(())
}
