//! Narrative Analysis Service — Binary Entrypoint
//! Boots the background analysis loop: env config, tracing, the Prometheus
//! recorder, the shared resilience registry, live providers and the
//! scheduler. Runs until Ctrl-C.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use narrapulse::config::EngineConfig;
use narrapulse::extract::FeatureExtractor;
use narrapulse::pipeline::AnalysisPipeline;
use narrapulse::providers::{HttpEventClassifier, HttpMarketProvider, HttpNewsGateway};
use narrapulse::scheduler::spawn_analysis_scheduler;
use narrapulse::store::MemoryStore;
use narrapulse::{metrics, ResilienceContext, Store};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is a dev convenience; absent in prod.
    let _ = dotenvy::dotenv();
    init_tracing();
    let recorder = metrics::init();
    if recorder.is_none() {
        warn!("running without a metrics recorder");
    }

    let cfg = EngineConfig::from_env();
    info!(
        tokens = ?cfg.tokens,
        interval_secs = cfg.interval_secs,
        hours_back = cfg.hours_back,
        "starting narrative analysis service"
    );

    let resilience = Arc::new(ResilienceContext::with_default_services());
    let classifier = Arc::new(HttpEventClassifier::from_env());
    let news = Arc::new(HttpNewsGateway::from_env());
    let market = Arc::new(HttpMarketProvider::from_env());
    let store = Arc::new(MemoryStore::new());

    let extractor = FeatureExtractor::new(classifier, Arc::clone(&resilience))
        .with_trust_table(cfg.trust_table())
        .with_tau_hours(cfg.tau_hours);

    let pipeline = Arc::new(AnalysisPipeline::new(
        resilience,
        Arc::clone(&store) as Arc<dyn Store>,
        news,
        market,
        extractor,
    ));

    let scheduler = spawn_analysis_scheduler(cfg.scheduler_cfg(), pipeline);

    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
    }
    info!("shutting down");
    scheduler.abort();
    Ok(())
}
