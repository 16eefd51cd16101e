// tests/pipeline_e2e.rs
// Whole-pipeline runs against mock providers: ingest, analysis, thesis
// composition limits and the outcome-label threshold.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use narrapulse::aggregate::{aggregate, bucket_start};
use narrapulse::extract::FeatureExtractor;
use narrapulse::pipeline::AnalysisPipeline;
use narrapulse::providers::{
    MarketSnapshot, MockClassifier, MockMarketProvider, MockNewsProvider, NewsProvider,
    MarketDataProvider,
};
use narrapulse::resilience::RetryPolicy;
use narrapulse::store::MemoryStore;
use narrapulse::thesis::Direction;
use narrapulse::types::{EventDistribution, EventKind, RawArticle};
use narrapulse::{ResilienceContext, Store};

const TITLES: [&str; 12] = [
    "Acme Pay taps Solana for settlement rails",
    "Solana validator count hits a record",
    "Globex launches perps on the Solana book",
    "Phantom wallet ships social recovery",
    "Jupiter volume doubles week over week",
    "Helium migration called a success by devs",
    "Visa pilot settles USDC over Solana",
    "Firedancer testnet pushes 1M TPS",
    "Breakpoint conference sells out early",
    "Solana mobile preorders cross 100k",
    "Marinade stake pool passes audit",
    "DRiP collectibles hit ten million mints",
];

fn raw_article(url: &str, title: &str) -> RawArticle {
    RawArticle {
        token: String::new(),
        url: url.to_string(),
        site_name: "coindesk.com".to_string(),
        title: title.to_string(),
        published_at: Some(Utc::now().to_rfc3339()),
        clean_content: format!("{} as the listing surges onward", title),
        word_count: 7,
    }
}

fn build_pipeline(
    news: Arc<dyn NewsProvider>,
    market: Arc<dyn MarketDataProvider>,
) -> (AnalysisPipeline, Arc<MemoryStore>) {
    let resilience = Arc::new(ResilienceContext::with_default_services());
    let store = Arc::new(MemoryStore::new());
    let classifier = Arc::new(MockClassifier::fixed(EventDistribution::single(
        EventKind::Listing,
    )));
    let extractor = FeatureExtractor::new(classifier, Arc::clone(&resilience));
    let fast = RetryPolicy::new(
        1,
        Duration::from_millis(1),
        Duration::from_millis(1),
    )
    .without_jitter();
    let pipeline = AnalysisPipeline::new(
        resilience,
        Arc::clone(&store) as Arc<dyn Store>,
        news,
        market,
        extractor,
    )
    .with_search_retry(fast.clone())
    .with_scrape_retry(fast.clone())
    .with_market_retry(fast);
    (pipeline, store)
}

#[tokio::test]
async fn full_run_respects_thesis_limits() {
    let articles: Vec<RawArticle> = TITLES
        .iter()
        .enumerate()
        .map(|(i, title)| raw_article(&format!("https://news.example/sol-{i}"), title))
        .collect();
    let news = Arc::new(MockNewsProvider::with_articles(articles));
    let market = Arc::new(MockMarketProvider::with_snapshot(MarketSnapshot {
        liquidity_usd: Some(2_500_000.0),
        ..MarketSnapshot::default()
    }));
    let (pipeline, _store) = build_pipeline(news, market);

    let report = pipeline.ingest_token("SOL", 24, 48).await.unwrap();
    assert_eq!(report.processed, 12);

    let analysis = pipeline.analyze_token("SOL").await.unwrap().unwrap();

    // Composer caps hold no matter how much coverage exists.
    assert!(!analysis.thesis.reasoning.is_empty());
    assert!(analysis.thesis.reasoning.len() <= 6);
    assert!(analysis.thesis.guardrails.len() <= 4);
    assert_eq!(analysis.thesis.evidence.len(), 8);

    // Evidence is ranked heaviest first.
    let weights: Vec<f64> = analysis.thesis.evidence.iter().map(|e| e.weight).collect();
    assert!(weights.windows(2).all(|w| w[0] >= w[1]));

    // Deep liquidity from the enriched snapshot shows up in the narrative.
    assert!(analysis
        .thesis
        .reasoning
        .iter()
        .any(|line| line.contains("Deep liquidity")));

    // Direction agrees with the probability band.
    let expected = Direction::from_probability(analysis.prediction.probability_up);
    assert_eq!(analysis.thesis.direction, expected);
}

#[tokio::test]
async fn label_threshold_is_strictly_above_half_percent() {
    let market = Arc::new(
        MockMarketProvider::default()
            .with_return("AAA", 0.005)
            .with_return("BBB", 0.0051),
    );
    let (pipeline, store) = build_pipeline(
        Arc::new(MockNewsProvider::with_articles(Vec::new())),
        market,
    );

    let matured = bucket_start(Utc::now() - chrono::Duration::hours(2));
    for token in ["AAA", "BBB"] {
        store
            .upsert_bucket(aggregate(token, matured, &[]))
            .await
            .unwrap();
        assert_eq!(pipeline.backfill_labels(token, 48).await.unwrap(), 1);
    }

    let at_threshold = store.labels_for_token("AAA").await.unwrap();
    assert_eq!(at_threshold[0].label_binary, 0);
    let above_threshold = store.labels_for_token("BBB").await.unwrap();
    assert_eq!(above_threshold[0].label_binary, 1);
}

#[tokio::test]
async fn near_duplicate_titles_collapse_in_evidence() {
    let news = Arc::new(MockNewsProvider::with_articles(vec![
        raw_article(
            "https://a.example/original",
            "Solana lands a major exchange listing after months of rumor",
        ),
        raw_article(
            "https://b.example/syndicated",
            "Solana lands a major exchange listing after months of rumors",
        ),
        raw_article(
            "https://c.example/different",
            "Jupiter aggregator posts record weekly volume",
        ),
    ]));
    let (pipeline, _store) = build_pipeline(news, Arc::new(MockMarketProvider::default()));

    pipeline.ingest_token("SOL", 24, 16).await.unwrap();
    let analysis = pipeline.analyze_token("SOL").await.unwrap().unwrap();

    assert_eq!(analysis.thesis.evidence.len(), 2);
}
