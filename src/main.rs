use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use verba_metrics::broker::{AmqpBroker, AmqpPublisher};
use verba_metrics::config::ServiceConfig;
use verba_metrics::consumer::{Consumer, MessageHandler};
use verba_metrics::pipeline::TranscriptProcessor;
use verba_metrics::{health, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().context("Invalid configuration")?;

    // Keep the guards alive so buffered log lines are flushed on exit.
    let _log_guards = logging::init(&config.log).context("Failed to set up logging")?;

    eprintln!("📞 Verba Metrics v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Input queue: {}", config.input_queue);
    eprintln!("   Output queue: {}", config.output_queue);
    eprintln!("   Dictionaries: {}", config.dictionaries_path.display());
    eprintln!("   Health: http://0.0.0.0:{}/health", config.http_port);

    // ── Pipeline ──────────────────────────────────────────────────────────
    let processor = TranscriptProcessor::load(&config.dictionaries_path).with_context(|| {
        format!(
            "Failed to load pipeline from {}",
            config.dictionaries_path.display()
        )
    })?;
    let processor = Arc::new(processor);
    tracing::info!("Pipeline ready");

    // ── Broker ────────────────────────────────────────────────────────────
    let publisher = Arc::new(AmqpPublisher::new(
        config.broker_url.clone(),
        config.output_queue.clone(),
    ));
    let handler = Arc::new(
        MessageHandler::new(processor, publisher, config.processing_timeout)
            .with_reject_on_publish_failure(config.reject_on_publish_failure),
    );
    let consumer = Arc::new(Consumer::new(
        Arc::new(AmqpBroker::new(config.broker_url.clone())),
        handler,
        config.input_queue.clone(),
        config.reconnect_delay,
    ));

    // ── Health server ─────────────────────────────────────────────────────
    let app = health::routes(consumer.state());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("Failed to bind health port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "Health server started");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Health server stopped");
        }
    });

    // ── Consumer ──────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.run(shutdown_rx).await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Interrupt received, stopping consumer");
    shutdown_tx.send_replace(true);

    consumer_task.await.context("Consumer task failed")?;
    eprintln!("👋 Stopped");
    Ok(())
}
