//! # Analysis scheduler
//!
//! Periodic driver for the pipeline. Every tick ingests and re-analyzes the
//! configured tokens; every Nth tick it also backfills outcome labels and
//! retrains. A failure for one token is logged and the loop moves on, so a
//! single bad upstream never stalls the rotation.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pipeline::AnalysisPipeline;
use crate::predict::TrainOutcome;

#[derive(Clone, Debug)]
pub struct SchedulerCfg {
    pub interval_secs: u64,
    /// Token symbols walked on every tick.
    pub tokens: Vec<String>,
    /// Aggregation and training window.
    pub hours_back: i64,
    /// Article budget per token per tick.
    pub max_articles: usize,
    /// Label backfill and retraining run every this many ticks.
    pub maintenance_every: u32,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            tokens: Vec::new(),
            hours_back: 24,
            max_articles: 12,
            maintenance_every: 6,
        }
    }
}

/// Spawn the analysis loop. The first tick fires immediately, maintenance
/// first lands on tick `maintenance_every`.
pub fn spawn_analysis_scheduler(
    cfg: SchedulerCfg,
    pipeline: Arc<AnalysisPipeline>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        let maintenance_every = u64::from(cfg.maintenance_every.max(1));
        let mut tick: u64 = 0;
        loop {
            ticker.tick().await;
            tick += 1;

            for token in &cfg.tokens {
                if let Err(error) = pipeline
                    .ingest_token(token, cfg.hours_back, cfg.max_articles)
                    .await
                {
                    warn!(token, error = %error, "ingest failed, skipping token this tick");
                    continue;
                }
                if let Err(error) = pipeline.analyze_token(token).await {
                    warn!(token, error = %error, "analysis failed");
                }
            }

            if tick % maintenance_every == 0 {
                run_maintenance(&cfg, &pipeline).await;
            }

            counter!("scheduler_ticks_total").increment(1);
            gauge!("scheduler_last_tick_ts").set(chrono::Utc::now().timestamp() as f64);
            info!(
                target: "scheduler",
                tick,
                tokens = cfg.tokens.len(),
                "analysis tick complete"
            );
        }
    })
}

async fn run_maintenance(cfg: &SchedulerCfg, pipeline: &AnalysisPipeline) {
    for token in &cfg.tokens {
        if let Err(error) = pipeline.backfill_labels(token, cfg.hours_back).await {
            warn!(token, error = %error, "label backfill failed");
        }
    }
    match pipeline.auto_train(&cfg.tokens, cfg.hours_back).await {
        Ok(TrainOutcome::Trained(record)) => {
            info!(
                version = %record.version,
                synthetic = record.synthetic,
                roc_auc = record.metrics.roc_auc,
                "model refreshed"
            );
        }
        Ok(TrainOutcome::InsufficientSamples {
            available,
            required,
        }) => {
            debug!(available, required, "skipping retrain, not enough rows");
        }
        Err(error) => warn!(error = %error, "retraining failed"),
    }
}
