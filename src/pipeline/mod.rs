// src/pipeline/mod.rs

pub mod atomizer;
pub mod canonical;
pub mod classifier;
pub mod normalizer;

pub use atomizer::Atomizer;
pub use classifier::Classifier;
pub use normalizer::{NormalizedAtom, Normalizer};
