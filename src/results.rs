// src/results.rs

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, Utc};
use log::info;
use uuid::Uuid;

use crate::models::EntityType;

/// Counters and timing for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub run_id: String,
    pub started_at: NaiveDateTime,
    pub records_processed: usize,
    /// Already present in the progress tracker from an earlier run.
    pub records_skipped: usize,
    pub records_discarded: usize,
    pub records_failed: usize,
    pub atoms_processed: usize,
    pub atoms_discarded: usize,
    pub entities_created: usize,
    pub variations_merged: usize,
    pub ner_consultations: usize,
    pub ner_unavailable: usize,
    pub ner_timeouts: usize,
    pub entities_by_type: HashMap<EntityType, usize>,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn new() -> Self {
        RunStats {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now().naive_utc(),
            records_processed: 0,
            records_skipped: 0,
            records_discarded: 0,
            records_failed: 0,
            atoms_processed: 0,
            atoms_discarded: 0,
            entities_created: 0,
            variations_merged: 0,
            ner_consultations: 0,
            ner_unavailable: 0,
            ner_timeouts: 0,
            entities_by_type: HashMap::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn records_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.records_processed as f64 / seconds
        } else {
            0.0
        }
    }

    pub fn finish(&mut self, start: Instant) {
        self.elapsed = start.elapsed();
    }

    pub fn log_summary(&self) {
        info!(
            "run {} complete in {:.2?}: {} records ({:.1}/s), {} skipped, {} discarded, {} failed",
            self.run_id,
            self.elapsed,
            self.records_processed,
            self.records_per_second(),
            self.records_skipped,
            self.records_discarded,
            self.records_failed,
        );
        info!(
            "entities: {} created, {} variation merges; ner: {} consultations, {} unavailable, {} timeouts",
            self.entities_created,
            self.variations_merged,
            self.ner_consultations,
            self.ner_unavailable,
            self.ner_timeouts,
        );
        let mut by_type: Vec<(&EntityType, &usize)> = self.entities_by_type.iter().collect();
        by_type.sort_by_key(|(ty, _)| ty.as_str());
        for (entity_type, count) in by_type {
            info!("  {}: {}", entity_type.as_str(), count);
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        RunStats::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_handles_zero_elapsed() {
        let stats = RunStats::new();
        assert_eq!(stats.records_per_second(), 0.0);
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunStats::new().run_id, RunStats::new().run_id);
    }
}
