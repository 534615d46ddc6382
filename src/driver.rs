// src/driver.rs
//
// Composes the stages over a record stream. Classification and
// normalization are pure; every find_similar + upsert pair runs inside one
// mutex-guarded section, so the store sees a single logical writer and a
// concurrent near-duplicate can never mint two entities.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{
    CanonicalEntity, Category, ClassificationResult, EntityType, UnfitReason,
};
use crate::ner::{self, NerAdjustment, NerBackend};
use crate::pipeline::{Atomizer, Classifier, Normalizer};
use crate::progress::ProgressTracker;
use crate::results::RunStats;
use crate::source::{RecordSource, SourceRecord};
use crate::store::CanonicalStore;

const EXACT_PLACEHOLDER_TAG: &str = "exact_nao_determinado";

pub struct PipelineDriver {
    config: PipelineConfig,
    classifier: Classifier,
    atomizer: Atomizer,
    normalizer: Normalizer,
    ner: Option<Arc<dyn NerBackend>>,
    progress: Option<Arc<Mutex<ProgressTracker>>>,
    store: Arc<Mutex<CanonicalStore>>,
}

enum NerConsultation {
    Revised(ClassificationResult),
    Discard,
    Unavailable,
}

impl PipelineDriver {
    /// Build a driver. The configuration is validated here: a bad one is
    /// fatal before any record is read.
    pub fn new(config: PipelineConfig, store: Arc<Mutex<CanonicalStore>>) -> Result<Self> {
        config.validate()?;
        Ok(PipelineDriver {
            config,
            classifier: Classifier::new(),
            atomizer: Atomizer::new(),
            normalizer: Normalizer::new(),
            ner: None,
            progress: None,
            store,
        })
    }

    /// Attach a NER backend for the low-confidence fallback path.
    pub fn with_ner(mut self, backend: Arc<dyn NerBackend>) -> Self {
        self.ner = Some(backend);
        self
    }

    /// Attach a progress tracker: records it already holds are skipped, and
    /// consumed ids are checkpointed at every batch boundary, so an
    /// interrupted run resumes without double-counting occurrences.
    pub fn with_progress(mut self, tracker: Arc<Mutex<ProgressTracker>>) -> Self {
        self.progress = Some(tracker);
        self
    }

    /// Process the stream until it ends or `max_records` is reached.
    /// Per-record failures are logged and skipped; a source failure stops
    /// the run and keeps everything already persisted.
    pub async fn run<S: RecordSource>(
        &self,
        source: &mut S,
        max_records: Option<usize>,
        progress_interval: usize,
    ) -> Result<RunStats> {
        let start = Instant::now();
        let mut stats = RunStats::new();
        info!("starting canonicalization run {}", stats.run_id);

        let mut pending_ids: Vec<String> = Vec::new();
        let mut batch_number = match &self.progress {
            Some(tracker) => tracker.lock().await.latest_batch_number()? + 1,
            None => 1,
        };

        loop {
            if let Some(max) = max_records {
                if stats.records_processed >= max {
                    info!("record cap of {max} reached");
                    break;
                }
            }
            let record = match source.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    warn!("source failed, stopping with partial results: {e}");
                    break;
                }
            };
            if let Some(tracker) = &self.progress {
                if tracker.lock().await.is_processed(&record.id.0) {
                    stats.records_skipped += 1;
                    continue;
                }
            }
            if let Err(e) = self.process_record(&record, &mut stats).await {
                if e.is_fatal() {
                    return Err(e);
                }
                stats.records_failed += 1;
                warn!("record {}: {e}", record.id.0);
            }
            stats.records_processed += 1;
            if self.progress.is_some() {
                pending_ids.push(record.id.0.clone());
            }
            if progress_interval > 0 && stats.records_processed % progress_interval == 0 {
                stats.elapsed = start.elapsed();
                info!(
                    "processed {} records ({:.1}/s)",
                    stats.records_processed,
                    stats.records_per_second()
                );
            }
            if stats.records_processed % self.config.batch_size == 0 {
                debug!("batch boundary at {} records", stats.records_processed);
                if let Some(tracker) = &self.progress {
                    tracker
                        .lock()
                        .await
                        .mark_batch(&pending_ids, batch_number)?;
                    pending_ids.clear();
                    batch_number += 1;
                }
            }
        }

        if let Some(tracker) = &self.progress {
            tracker
                .lock()
                .await
                .mark_batch(&pending_ids, batch_number)?;
        }

        stats.finish(start);
        stats.entities_by_type = self.store.lock().await.counts_by_type()?;
        stats.log_summary();
        Ok(stats)
    }

    async fn process_record(&self, record: &SourceRecord, stats: &mut RunStats) -> Result<()> {
        let text = record.collector_text.trim();
        if text.is_empty() {
            stats.records_discarded += 1;
            debug!("record {}: empty collector field", record.id.0);
            return Ok(());
        }

        let mut classification = self.classifier.classify(text);

        // Exact unknown-collector placeholders are kept verbatim.
        if classification
            .patterns_matched
            .iter()
            .any(|tag| tag == EXACT_PLACEHOLDER_TAG)
        {
            return self
                .persist_nao_determinado(text, classification.confidence, stats)
                .await;
        }

        if text.starts_with('|') {
            stats.records_discarded += 1;
            info!(
                "record {}: discarded ({})",
                record.id.0,
                UnfitReason::LeadingSeparator.as_str()
            );
            return Ok(());
        }

        if classification.confidence < self.config.ner_trigger_threshold {
            match self.consult_ner(&classification, stats).await {
                NerConsultation::Revised(revised) => classification = revised,
                NerConsultation::Discard => {
                    stats.records_discarded += 1;
                    info!("record {}: discarded (ner_no_entities)", record.id.0);
                    return Ok(());
                }
                NerConsultation::Unavailable => {
                    // The rule result stands; anything below the floor is
                    // raised to it and reclassified as undetermined.
                    if classification.confidence < self.config.confidence_threshold {
                        let mut patterns = classification.patterns_matched.clone();
                        patterns.push("ner_unavailable_floor".into());
                        classification = ClassificationResult::new(
                            classification.raw_text.clone(),
                            Category::NaoDeterminado,
                            self.config.confidence_threshold,
                            patterns,
                        );
                    }
                }
            }
        }

        match classification.category {
            Category::ConjuntoPessoas => {
                let outcome = self.atomizer.atomize(text, classification.category);
                if outcome.had_unknown_collaborators {
                    debug!("record {}: unknown co-collectors dropped", record.id.0);
                }
                if outcome.atoms.is_empty() {
                    stats.records_discarded += 1;
                    return Ok(());
                }
                for atom in &outcome.atoms {
                    self.canonicalize_atom(
                        &atom.text,
                        EntityType::Pessoa,
                        classification.confidence,
                        &record.id.0,
                        stats,
                    )
                    .await?;
                }
            }
            Category::NaoDeterminado => match self.normalizer.fallback_fitness(text) {
                Ok(()) => {
                    self.persist_nao_determinado(text, classification.confidence, stats)
                        .await?
                }
                Err(reason) => {
                    stats.records_discarded += 1;
                    info!("record {}: discarded ({})", record.id.0, reason.as_str());
                }
            },
            category => {
                self.canonicalize_atom(
                    text,
                    EntityType::from_category(category),
                    classification.confidence,
                    &record.id.0,
                    stats,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Normalize one atom and run the guarded find-or-create against the
    /// store.
    async fn canonicalize_atom(
        &self,
        atom_text: &str,
        entity_type: EntityType,
        confidence: f64,
        record_id: &str,
        stats: &mut RunStats,
    ) -> Result<()> {
        let normalized = match self.normalizer.normalize(atom_text, entity_type) {
            Ok(normalized) => normalized,
            Err(UnfitReason::GenericSingleWord)
                if atom_text.trim().chars().any(char::is_uppercase) =>
            {
                // A bare capitalized surname is kept, but only as an
                // undetermined entity at the confidence floor.
                return self
                    .persist_nao_determinado(
                        atom_text.trim(),
                        self.config.confidence_threshold,
                        stats,
                    )
                    .await;
            }
            Err(reason) => {
                stats.atoms_discarded += 1;
                info!(
                    "record {record_id}: atom {atom_text:?} discarded ({})",
                    reason.as_str()
                );
                return Ok(());
            }
        };
        stats.atoms_processed += 1;

        let classification_confidence =
            floor_confidence(confidence, self.config.confidence_threshold);

        let mut store = self.store.lock().await;
        match store.find_similar(
            &normalized.name.comparison_key,
            entity_type,
            self.config.confidence_threshold,
        )? {
            Some((existing, score)) => {
                store.upsert(&existing, &normalized.name.display_form, score)?;
                stats.variations_merged += 1;
            }
            None => {
                let candidate = new_candidate(
                    normalized.canonical_name,
                    entity_type,
                    classification_confidence,
                );
                store.upsert(&candidate, &normalized.name.display_form, 1.0)?;
                stats.entities_created += 1;
            }
        }
        Ok(())
    }

    /// Undetermined inputs keep their raw spelling as both canonical name
    /// and variation, but still group through the store so repeated unknown
    /// spellings land on one entity.
    async fn persist_nao_determinado(
        &self,
        raw: &str,
        confidence: f64,
        stats: &mut RunStats,
    ) -> Result<()> {
        stats.atoms_processed += 1;
        let key = self.normalizer.key_for(raw, EntityType::NaoDeterminado);
        let classification_confidence =
            floor_confidence(confidence, self.config.confidence_threshold);

        let mut store = self.store.lock().await;
        match store.find_similar(
            &key,
            EntityType::NaoDeterminado,
            self.config.confidence_threshold,
        )? {
            Some((existing, score)) => {
                store.upsert(&existing, raw, score)?;
                stats.variations_merged += 1;
            }
            None => {
                let candidate = new_candidate(
                    raw.to_string(),
                    EntityType::NaoDeterminado,
                    classification_confidence,
                );
                store.upsert(&candidate, raw, 1.0)?;
                stats.entities_created += 1;
            }
        }
        Ok(())
    }

    async fn consult_ner(
        &self,
        rule: &ClassificationResult,
        stats: &mut RunStats,
    ) -> NerConsultation {
        stats.ner_consultations += 1;
        let Some(backend) = self.ner.as_ref() else {
            stats.ner_unavailable += 1;
            return NerConsultation::Unavailable;
        };

        let backend = Arc::clone(backend);
        let text = rule.raw_text.clone();
        let call = tokio::task::spawn_blocking(move || backend.analyze(&text));
        let timeout = Duration::from_secs(self.config.ner_timeout_seconds);
        match tokio::time::timeout(timeout, call).await {
            Err(_) => {
                stats.ner_timeouts += 1;
                warn!(
                    "ner call timed out after {}s for {:?}",
                    self.config.ner_timeout_seconds, rule.raw_text
                );
                NerConsultation::Unavailable
            }
            Ok(Err(join_error)) => {
                stats.ner_unavailable += 1;
                warn!("ner task failed: {join_error}");
                NerConsultation::Unavailable
            }
            Ok(Ok(Err(e))) => {
                stats.ner_unavailable += 1;
                debug!("ner backend unavailable: {e}");
                NerConsultation::Unavailable
            }
            Ok(Ok(Ok(outcome))) => match ner::adjust(rule, &outcome) {
                NerAdjustment::Revised(revised) => NerConsultation::Revised(revised),
                NerAdjustment::Discard => NerConsultation::Discard,
            },
        }
    }
}

fn new_candidate(
    canonical_name: String,
    entity_type: EntityType,
    classification_confidence: f64,
) -> CanonicalEntity {
    let now = chrono::Utc::now().naive_utc();
    CanonicalEntity {
        id: None,
        canonical_name,
        entity_type,
        classification_confidence,
        grouping_confidence: 1.0,
        variations: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Two-decimal rounding keeps float noise out of the stored confidences;
/// the floor guarantees nothing below the threshold is ever persisted.
fn floor_confidence(confidence: f64, threshold: f64) -> f64 {
    let rounded = (confidence * 100.0).round() / 100.0;
    rounded.clamp(threshold, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimilarityWeights;
    use crate::source::VecSource;

    fn driver() -> PipelineDriver {
        let store = CanonicalStore::open_in_memory(SimilarityWeights::default(), 0.70).unwrap();
        PipelineDriver::new(PipelineConfig::default(), Arc::new(Mutex::new(store))).unwrap()
    }

    async fn run_texts(driver: &PipelineDriver, texts: &[&str]) -> RunStats {
        let mut source = VecSource::from_texts(texts.iter().copied());
        driver.run(&mut source, None, 0).await.unwrap()
    }

    #[tokio::test]
    async fn conjunto_fans_out_to_person_entities() {
        let driver = driver();
        let stats = run_texts(&driver, &["Silva, J. & R.C. Forzza; Santos, M. et al."]).await;
        assert_eq!(stats.records_processed, 1);
        assert_eq!(stats.entities_created, 3);
        let store = driver.store.lock().await;
        let names: Vec<String> = store
            .all()
            .unwrap()
            .into_iter()
            .map(|e| e.canonical_name)
            .collect();
        assert_eq!(names, vec!["Silva, J.", "Forzza, R.C.", "Santos, M."]);
    }

    #[tokio::test]
    async fn pipe_led_records_are_discarded() {
        let driver = driver();
        let stats = run_texts(&driver, &["|Amanda, A."]).await;
        assert_eq!(stats.records_discarded, 1);
        assert_eq!(driver.store.lock().await.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn bad_config_is_fatal_at_construction() {
        let store = CanonicalStore::open_in_memory(SimilarityWeights::default(), 0.70).unwrap();
        let mut config = PipelineConfig::default();
        config.similarity_weights.phonetic = 0.9;
        assert!(PipelineDriver::new(config, Arc::new(Mutex::new(store))).is_err());
    }

    #[tokio::test]
    async fn progress_tracker_makes_reruns_skip() {
        let store = CanonicalStore::open_in_memory(SimilarityWeights::default(), 0.70).unwrap();
        let tracker = Arc::new(Mutex::new(ProgressTracker::open_in_memory().unwrap()));
        let driver = PipelineDriver::new(PipelineConfig::default(), Arc::new(Mutex::new(store)))
            .unwrap()
            .with_progress(Arc::clone(&tracker));

        let first = run_texts(&driver, &["Silva, J.", "Forzza, R.C."]).await;
        assert_eq!(first.records_processed, 2);
        assert_eq!(first.records_skipped, 0);

        // Same source again: every id is already checkpointed.
        let second = run_texts(&driver, &["Silva, J.", "Forzza, R.C."]).await;
        assert_eq!(second.records_processed, 0);
        assert_eq!(second.records_skipped, 2);

        let store = driver.store.lock().await;
        let entities = store.all().unwrap();
        assert_eq!(entities.len(), 2);
        assert!(entities
            .iter()
            .all(|e| e.variations.iter().all(|v| v.occurrence_count == 1)));
    }

    #[tokio::test]
    async fn record_cap_stops_the_run() {
        let driver = driver();
        let mut source = VecSource::from_texts(["Silva, J.", "Forzza, R.C.", "Santos, M."]);
        let stats = driver.run(&mut source, Some(2), 0).await.unwrap();
        assert_eq!(stats.records_processed, 2);
    }

    #[test]
    fn confidence_floor_rounds_then_clamps() {
        assert_eq!(floor_confidence(0.654, 0.70), 0.70);
        assert_eq!(floor_confidence(0.949999, 0.70), 0.95);
        assert_eq!(floor_confidence(1.2, 0.70), 1.0);
    }
}
