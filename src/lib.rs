// src/lib.rs
// Library surface so integration tests (and embedders) can drive the engine.

pub mod aggregate;
pub mod config;
pub mod extract;
pub mod metrics;
pub mod pipeline;
pub mod predict;
pub mod providers;
pub mod resilience;
pub mod scheduler;
pub mod store;
pub mod thesis;
pub mod types;

// ---- Stable re-exports ----
pub use crate::pipeline::{AnalysisPipeline, IngestReport, TokenAnalysis};
pub use crate::predict::{PredictionEngine, TrainOutcome};
pub use crate::resilience::{CallError, ResilienceContext};
pub use crate::store::{MemoryStore, Store};
pub use crate::thesis::{Direction, Thesis, ThesisComposer};
