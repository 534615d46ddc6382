// src/lib.rs
pub mod config;
pub mod driver;
pub mod error;
pub mod export;
pub mod models;
pub mod ner;
pub mod phonetic;
pub mod pipeline;
pub mod progress;
pub mod results;
pub mod similarity;
pub mod source;
pub mod store;

// Re-export common types for easier access
pub use config::{FileConfig, PipelineConfig, RunOptions, SimilarityWeights};
pub use driver::PipelineDriver;
pub use error::{PipelineError, Result};
pub use models::{
    AtomizedName, CanonicalEntity, Category, ClassificationResult, EntityId, EntityType,
    NameVariation, NormalizedName, RecordId, SeparatorType,
};
pub use ner::{NerBackend, NullNer};
pub use progress::ProgressTracker;
pub use results::RunStats;
pub use source::{JsonlSource, RecordSource, SourceRecord, VecSource};
pub use store::CanonicalStore;
