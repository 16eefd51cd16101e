//! # Providers
//! External collaborator seams: the event classifier, the news gateway and
//! the market data API. Each seam is an `async_trait` object with an HTTP
//! implementation and an in-crate mock, so the pipeline and its tests never
//! touch the network directly.

pub mod classifier;
pub mod market;
pub mod news;

pub use classifier::{EventClassifier, HttpEventClassifier, MockClassifier};
pub use market::{HttpMarketProvider, MarketDataProvider, MarketSnapshot, MockMarketProvider};
pub use news::{HttpNewsGateway, MockNewsProvider, NewsProvider, SearchHit};
