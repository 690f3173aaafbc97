//! Food Recognition Pipeline - Main Entry Point
//!
//! Consumes photo prediction requests from NATS, classifies each photo,
//! enriches accepted predictions with nutrition facts, and publishes every
//! session update back to NATS.

use anyhow::{Context, Result};
use food_recognition_pipeline::{
    config::{AppConfig, LoggingConfig},
    consumer::{decode_request, PredictionConsumer},
    ingestor::ImageIngestor,
    metrics::{MetricsReporter, PipelineMetrics},
    models::{
        inference::InferenceEngine,
        loader::{HttpModelSource, ModelLoader},
        policy::ClassificationPolicy,
        registry::ModelRegistry,
    },
    nutrition::NutritionixClient,
    orchestrator::PredictionOrchestrator,
    producer::SessionPublisher,
    types::catalog::LabelCatalog,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("food_recognition_pipeline={}", logging.level).parse()?);

    if logging.format == "pretty" {
        tracing_subscriber::fmt().with_env_filter(filter).pretty().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("Starting Food Recognition Pipeline");
    info!(
        threshold = config.classification.confidence_threshold,
        model_url = %config.model.url,
        "Configuration loaded successfully"
    );

    // Initialize metrics
    let metrics = Arc::new(PipelineMetrics::new());

    // Model source and registry
    let loader = ModelLoader::with_threads(config.model.onnx_threads);
    let mut source =
        HttpModelSource::new(config.model.url.clone(), loader).with_timeout(config.model.timeout())?;
    if let Some(dir) = &config.model.cache_dir {
        source = source.with_cache_dir(dir);
    }
    let registry = Arc::new(ModelRegistry::new(Arc::new(source)));

    let catalog = LabelCatalog::food_classifier();
    info!(labels = catalog.len(), "Label catalog loaded");

    let nutrition = NutritionixClient::new(
        config.nutrition.endpoint.clone(),
        config.nutrition.app_id.clone(),
        config.nutrition.app_key.clone(),
    )
    .with_timezone(config.nutrition.timezone.clone())
    .with_timeout(config.nutrition.timeout())?;
    if config.nutrition.app_id.is_empty() || config.nutrition.app_key.is_empty() {
        warn!("Nutrition credentials are not set; lookups will fail and be skipped");
    }

    let mut ingestor = ImageIngestor::new().with_timeout(config.pipeline.image_timeout())?;
    match &config.pipeline.image_root {
        Some(root) => {
            ingestor = ingestor
                .with_image_root(root)
                .with_context(|| format!("Invalid pipeline.image_root {root}"))?;
            info!(image_root = %root, "Local image references enabled");
        }
        None => info!("Local image references disabled; only URLs are accepted"),
    }

    let orchestrator = Arc::new(PredictionOrchestrator::new(
        registry.clone(),
        ingestor,
        InferenceEngine::new(catalog),
        ClassificationPolicy::new(config.classification.confidence_threshold),
        Arc::new(nutrition),
        metrics.clone(),
    ));

    // Warm the model cache; requests arriving meanwhile join the same load
    let warmup = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = warmup.ensure_loaded().await {
            warn!(error = %e, "Model warm-up failed, will retry on first request");
        }
    });

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = PredictionConsumer::new(client.clone(), &config.nats.request_subject);
    let publisher = Arc::new(SessionPublisher::new(
        client.clone(),
        &config.nats.session_subject_prefix,
    ));

    let num_workers = config.pipeline.workers;
    info!(
        "Starting request processing loop with {} parallel workers",
        num_workers
    );
    info!("Listening on subject: {}", consumer.subject());
    info!("Publishing sessions to: {}.<user_id>", publisher.prefix());

    // Semaphore to limit concurrent processing
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
    tokio::spawn(reporter.start());

    let mut subscription = consumer.subscribe().await?;

    loop {
        let message = tokio::select! {
            message = subscription.next() => match message {
                Some(message) => message,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
        };

        let request = match decode_request(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Dropping prediction request");
                continue;
            }
        };

        // Acquire permit (limits concurrent tasks)
        let permit = semaphore.clone().acquire_owned().await?;

        let orchestrator = orchestrator.clone();
        let publisher = publisher.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            let user_id = request.user_id.clone();
            let mut updates = Box::pin(orchestrator.predict(user_id.clone(), request.into_sample()));

            while let Some(session) = updates.next().await {
                if let Err(e) = publisher.publish(&session, &orchestrator).await {
                    error!(
                        user_id = %user_id,
                        status = session.status.as_str(),
                        error = %e,
                        "Failed to publish session update"
                    );
                }
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;

            // Log progress every 100 requests
            if count % 100 == 0 {
                let latency = metrics.get_latency_stats();
                info!(
                    processed = count,
                    throughput = format!("{:.2} sessions/s", metrics.get_throughput()),
                    avg_latency_us = latency.mean_us,
                    "Processing milestone"
                );
            }

            drop(permit);
        });
    }

    // Print final summary
    info!("Pipeline shutting down...");
    metrics.print_summary();

    Ok(())
}
