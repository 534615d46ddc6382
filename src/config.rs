// src/config.rs

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// Coefficients of the combined similarity score. Must be non-negative and
/// sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SimilarityWeights {
    pub edit: f64,
    pub jaro_winkler: f64,
    pub phonetic: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        SimilarityWeights {
            edit: 0.3,
            jaro_winkler: 0.4,
            phonetic: 0.3,
        }
    }
}

impl SimilarityWeights {
    pub fn validate(&self) -> Result<()> {
        if self.edit < 0.0 || self.jaro_winkler < 0.0 || self.phonetic < 0.0 {
            return Err(PipelineError::Config(
                "similarity weights must be non-negative".into(),
            ));
        }
        let sum = self.edit + self.jaro_winkler + self.phonetic;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(PipelineError::Config(format!(
                "similarity weights must sum to 1.0, got {sum:.6}"
            )));
        }
        Ok(())
    }
}

/// Tunables of the pipeline proper. These are the recognized options;
/// anything else in the `[pipeline]` table is a startup error.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    /// Minimum confidence for anything that gets persisted.
    pub confidence_threshold: f64,
    /// Rule-classifier confidence below which the NER adapter is consulted.
    pub ner_trigger_threshold: f64,
    /// Wall-clock bound on a single NER call.
    pub ner_timeout_seconds: u64,
    pub similarity_weights: SimilarityWeights,
    /// Source read batch size. Batching is an I/O detail: visible semantics
    /// are identical to one-at-a-time processing.
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            confidence_threshold: 0.70,
            ner_trigger_threshold: 0.85,
            ner_timeout_seconds: 5,
            similarity_weights: SimilarityWeights::default(),
            batch_size: 10_000,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.similarity_weights.validate()?;
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("ner_trigger_threshold", self.ner_trigger_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::Config(format!(
                    "{name} must be within [0.0, 1.0], got {value}"
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be at least 1".into()));
        }
        if self.ner_timeout_seconds == 0 {
            return Err(PipelineError::Config(
                "ner_timeout_seconds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Wiring for a concrete run: file locations and caps. Consumed by the
/// binary only; the library never reads these implicitly.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RunOptions {
    /// JSONL source file; `None` means the caller supplies a source.
    pub source_path: Option<PathBuf>,
    pub db_path: PathBuf,
    pub csv_path: PathBuf,
    /// Where to checkpoint processed record ids; `None` disables resume.
    pub progress_path: Option<PathBuf>,
    /// Stop after this many records (smoke runs).
    pub max_records: Option<usize>,
    /// Emit a progress line every this many records.
    pub progress_interval: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            source_path: None,
            db_path: PathBuf::from("canonical.db"),
            csv_path: PathBuf::from("canonical.csv"),
            progress_path: None,
            max_records: None,
            progress_interval: 25_000,
        }
    }
}

/// Top-level TOML layout: `[pipeline]` and `[run]` tables, both optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileConfig {
    pub pipeline: PipelineConfig,
    pub run: RunOptions,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<FileConfig> {
        let raw = fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&raw)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        config.pipeline.validate()?;
        Ok(config)
    }
}
