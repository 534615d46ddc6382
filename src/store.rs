// src/store.rs
//
// Canonical store: an embedded SQLite database plus an in-memory candidate
// index. All writes go through one owner (the driver serializes calls), so
// the index and the table move together.

use std::collections::HashMap;
use std::path::Path;

use chrono::{NaiveDateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::SimilarityWeights;
use crate::error::{PipelineError, Result};
use crate::models::{CanonicalEntity, EntityId, EntityType, NameVariation};
use crate::phonetic::metaphone;
use crate::pipeline::normalizer::Normalizer;
use crate::similarity::{alpha_only_uppercase, combined_score, primary_token};

const CREATE_ENTITIES_SQL: &str = "
    CREATE TABLE IF NOT EXISTS canonical_entities (
        id INTEGER PRIMARY KEY,
        canonical_name TEXT NOT NULL,
        entity_type TEXT NOT NULL
            CHECK (entity_type IN ('Pessoa', 'GrupoPessoas', 'Empresa', 'NaoDeterminado')),
        classification_confidence REAL NOT NULL
            CHECK (classification_confidence >= 0.70 AND classification_confidence <= 1.0),
        grouping_confidence REAL NOT NULL
            CHECK (grouping_confidence >= 0.70 AND grouping_confidence <= 1.0),
        variations TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )";

const CREATE_UNIQUE_INDEX_SQL: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS idx_canonical_name_type
    ON canonical_entities (canonical_name, entity_type)";

const CREATE_TYPE_INDEX_SQL: &str = "
    CREATE INDEX IF NOT EXISTS idx_entity_type
    ON canonical_entities (entity_type)";

const SELECT_COLUMNS: &str = "id, canonical_name, entity_type, classification_confidence,
    grouping_confidence, variations, created_at, updated_at";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Matching view of one stored entity: every comparison key it answers to,
/// the letters-only forms for the exact short-circuit, and the phonetic
/// codes for blocking.
#[derive(Debug)]
struct CandidateEntry {
    id: i64,
    created_at: NaiveDateTime,
    keys: Vec<String>,
    alpha_forms: Vec<String>,
    codes: Vec<String>,
}

#[derive(Debug, Default)]
struct TypeIndex {
    entries: Vec<CandidateEntry>,
    by_id: HashMap<i64, usize>,
    buckets: HashMap<String, Vec<usize>>,
}

impl TypeIndex {
    fn insert_entry(&mut self, entry: CandidateEntry) {
        let index = self.entries.len();
        self.by_id.insert(entry.id, index);
        for code in &entry.codes {
            self.buckets.entry(code.clone()).or_default().push(index);
        }
        self.entries.push(entry);
    }

    fn add_variation_key(&mut self, id: i64, key: String, alpha: String, code: String) {
        let Some(&index) = self.by_id.get(&id) else {
            return;
        };
        let entry = &mut self.entries[index];
        if !entry.codes.contains(&code) {
            self.buckets.entry(code.clone()).or_default().push(index);
            entry.codes.push(code);
        }
        entry.keys.push(key);
        entry.alpha_forms.push(alpha);
    }
}

/// Online clustering store over canonical entities.
pub struct CanonicalStore {
    conn: Connection,
    weights: SimilarityWeights,
    normalizer: Normalizer,
    index: HashMap<EntityType, TypeIndex>,
    /// With the default weights a combined score can only clear the
    /// threshold when the phonetic codes agree (the edit and Jaro–Winkler
    /// shares alone reach it only for identical keys, which share a code),
    /// so the bucket lookup is exact, not approximate. Weight combinations
    /// that break this property fall back to the flat scan.
    blocking_exact: bool,
}

impl CanonicalStore {
    /// Open (or create) the store at `path` and load the candidate index.
    pub fn open(path: &Path, weights: SimilarityWeights, threshold: f64) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut store = CanonicalStore {
            conn,
            weights,
            normalizer: Normalizer::new(),
            index: HashMap::new(),
            blocking_exact: weights.edit + weights.jaro_winkler <= threshold,
        };
        store.create_schema()?;
        store.load_index()?;
        Ok(store)
    }

    /// In-memory store for tests and dry runs.
    pub fn open_in_memory(weights: SimilarityWeights, threshold: f64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = CanonicalStore {
            conn,
            weights,
            normalizer: Normalizer::new(),
            index: HashMap::new(),
            blocking_exact: weights.edit + weights.jaro_winkler <= threshold,
        };
        store.create_schema()?;
        store.load_index()?;
        Ok(store)
    }

    /// Idempotent: creates the entity table and its indexes.
    pub fn create_schema(&self) -> Result<()> {
        self.conn.execute(CREATE_ENTITIES_SQL, [])?;
        self.conn.execute(CREATE_UNIQUE_INDEX_SQL, [])?;
        self.conn.execute(CREATE_TYPE_INDEX_SQL, [])?;
        Ok(())
    }

    fn load_index(&mut self) -> Result<()> {
        let entities = self.all()?;
        let count = entities.len();
        for entity in entities {
            self.index_entity(&entity);
        }
        if count > 0 {
            info!("loaded {count} canonical entities into the candidate index");
        }
        Ok(())
    }

    fn index_entity(&mut self, entity: &CanonicalEntity) {
        let id = entity.id.expect("persisted entity has an id").0;
        let mut keys = vec![self
            .normalizer
            .key_for(&entity.canonical_name, entity.entity_type)];
        let mut alpha_forms = vec![alpha_only_uppercase(&entity.canonical_name)];
        for variation in &entity.variations {
            keys.push(
                self.normalizer
                    .key_for(&variation.variation_text, entity.entity_type),
            );
            alpha_forms.push(alpha_only_uppercase(&variation.variation_text));
        }
        let mut codes: Vec<String> = Vec::new();
        for key in &keys {
            let code = metaphone(primary_token(key));
            if !code.is_empty() && !codes.contains(&code) {
                codes.push(code);
            }
        }
        self.index.entry(entity.entity_type).or_default().insert_entry(CandidateEntry {
            id,
            created_at: entity.created_at,
            keys,
            alpha_forms,
            codes,
        });
    }

    /// Best existing entity of `entity_type` whose canonical name or any
    /// variation scores at least `threshold` against `comparison_key`.
    /// Ties break to the highest score, then the oldest entity.
    pub fn find_similar(
        &self,
        comparison_key: &str,
        entity_type: EntityType,
        threshold: f64,
    ) -> Result<Option<(CanonicalEntity, f64)>> {
        let Some(type_index) = self.index.get(&entity_type) else {
            return Ok(None);
        };

        let input_alpha = alpha_only_uppercase(comparison_key);
        let input_code = metaphone(primary_token(comparison_key));

        let scan: Vec<usize> = if self.blocking_exact && !input_code.is_empty() {
            type_index
                .buckets
                .get(&input_code)
                .cloned()
                .unwrap_or_default()
        } else {
            (0..type_index.entries.len()).collect()
        };

        let mut best: Option<(usize, f64)> = None;
        for index in scan {
            let entry = &type_index.entries[index];
            let score = if !input_alpha.is_empty()
                && entry.alpha_forms.iter().any(|a| a == &input_alpha)
            {
                1.0
            } else {
                entry
                    .keys
                    .iter()
                    .map(|key| combined_score(comparison_key, key, &self.weights))
                    .fold(0.0, f64::max)
            };
            if score < threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_index, best_score)) => {
                    score > best_score
                        || (score == best_score
                            && entry.created_at
                                < type_index.entries[best_index].created_at)
                }
            };
            if better {
                best = Some((index, score));
            }
        }

        match best {
            None => Ok(None),
            Some((index, score)) => {
                let id = type_index.entries[index].id;
                let entity = self.load_by_id(id)?.ok_or_else(|| {
                    PipelineError::InvariantViolation(format!(
                        "indexed entity {id} missing from the store"
                    ))
                })?;
                Ok(Some((entity, score)))
            }
        }
    }

    /// Merge `variation_text` into the entity identified by the candidate's
    /// `(canonical_name, entity_type)`, or insert the candidate as a new
    /// entity carrying that variation. Idempotent on exact spellings: a
    /// repeat increments the count and refreshes `last_seen`.
    pub fn upsert(
        &mut self,
        candidate: &CanonicalEntity,
        variation_text: &str,
        association_confidence: f64,
    ) -> Result<CanonicalEntity> {
        validate_canonical_name(&candidate.canonical_name)?;
        let association_confidence = association_confidence.clamp(0.70, 1.0);

        match self.try_upsert(candidate, variation_text, association_confidence) {
            Ok(entity) => Ok(entity),
            Err(PipelineError::Store(err)) if is_unique_violation(&err) => {
                // Lost a race on the unique index: reload and retry once.
                debug!(
                    "unique constraint race on ({}, {}); retrying",
                    candidate.canonical_name,
                    candidate.entity_type.as_str()
                );
                self.try_upsert(candidate, variation_text, association_confidence)
                    .map_err(|retry| {
                        PipelineError::InvariantViolation(format!(
                            "upsert retry failed for ({}, {}): {retry}",
                            candidate.canonical_name,
                            candidate.entity_type.as_str()
                        ))
                    })
            }
            Err(other) => Err(other),
        }
    }

    fn try_upsert(
        &mut self,
        candidate: &CanonicalEntity,
        variation_text: &str,
        association_confidence: f64,
    ) -> Result<CanonicalEntity> {
        let now = Utc::now().naive_utc();
        let existing =
            self.load_by_key(&candidate.canonical_name, candidate.entity_type)?;

        let entity = match existing {
            Some(mut entity) => {
                let existing_position = entity
                    .variations
                    .iter()
                    .position(|v| v.variation_text == variation_text);
                match existing_position {
                    Some(position) => {
                        let variation = &mut entity.variations[position];
                        variation.occurrence_count += 1;
                        variation.last_seen = now;
                    }
                    None => {
                        entity.variations.push(NameVariation {
                            variation_text: variation_text.to_string(),
                            occurrence_count: 1,
                            association_confidence,
                            first_seen: now,
                            last_seen: now,
                        });
                        let id = entity.id.expect("loaded entity has an id").0;
                        let key = self
                            .normalizer
                            .key_for(variation_text, entity.entity_type);
                        let code = metaphone(primary_token(&key));
                        self.index
                            .entry(entity.entity_type)
                            .or_default()
                            .add_variation_key(
                                id,
                                key,
                                alpha_only_uppercase(variation_text),
                                code,
                            );
                    }
                }
                entity.grouping_confidence = entity
                    .variations
                    .iter()
                    .map(|v| v.association_confidence)
                    .fold(1.0, f64::min);
                entity.updated_at = now;
                self.update_row(&entity)?;
                entity
            }
            None => {
                let mut entity = CanonicalEntity {
                    id: None,
                    canonical_name: candidate.canonical_name.clone(),
                    entity_type: candidate.entity_type,
                    classification_confidence: candidate
                        .classification_confidence
                        .clamp(0.70, 1.0),
                    grouping_confidence: association_confidence,
                    variations: vec![NameVariation {
                        variation_text: variation_text.to_string(),
                        occurrence_count: 1,
                        association_confidence,
                        first_seen: now,
                        last_seen: now,
                    }],
                    created_at: now,
                    updated_at: now,
                };
                let id = self.insert_row(&entity)?;
                entity.id = Some(EntityId(id));
                self.index_entity(&entity);
                entity
            }
        };
        Ok(entity)
    }

    /// Every stored entity, in insertion order. Used for export.
    pub fn all(&self) -> Result<Vec<CanonicalEntity>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM canonical_entities ORDER BY id");
        let mut statement = self.conn.prepare(&sql)?;
        let mut rows = statement.query([])?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(row_to_entity(row)?);
        }
        Ok(entities)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM canonical_entities", [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }

    pub fn counts_by_type(&self) -> Result<HashMap<EntityType, usize>> {
        let mut statement = self
            .conn
            .prepare("SELECT entity_type, COUNT(*) FROM canonical_entities GROUP BY entity_type")?;
        let mut rows = statement.query([])?;
        let mut counts = HashMap::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            if let Some(entity_type) = EntityType::from_str(&raw) {
                counts.insert(entity_type, count as usize);
            }
        }
        Ok(counts)
    }

    fn load_by_key(
        &self,
        canonical_name: &str,
        entity_type: EntityType,
    ) -> Result<Option<CanonicalEntity>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM canonical_entities
             WHERE canonical_name = ?1 AND entity_type = ?2"
        );
        let entity = self
            .conn
            .query_row(&sql, params![canonical_name, entity_type.as_str()], |row| {
                row_to_entity(row)
            })
            .optional()?;
        Ok(entity)
    }

    fn load_by_id(&self, id: i64) -> Result<Option<CanonicalEntity>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM canonical_entities WHERE id = ?1");
        let entity = self
            .conn
            .query_row(&sql, params![id], |row| row_to_entity(row))
            .optional()?;
        Ok(entity)
    }

    fn insert_row(&self, entity: &CanonicalEntity) -> Result<i64> {
        let variations = serde_json::to_string(&entity.variations)?;
        self.conn.execute(
            "INSERT INTO canonical_entities
             (canonical_name, entity_type, classification_confidence, grouping_confidence,
              variations, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entity.canonical_name,
                entity.entity_type.as_str(),
                entity.classification_confidence,
                entity.grouping_confidence,
                variations,
                entity.created_at.format(TIMESTAMP_FORMAT).to_string(),
                entity.updated_at.format(TIMESTAMP_FORMAT).to_string(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_row(&self, entity: &CanonicalEntity) -> Result<()> {
        let id = entity.id.expect("updated entity has an id").0;
        let variations = serde_json::to_string(&entity.variations)?;
        self.conn.execute(
            "UPDATE canonical_entities SET
                 classification_confidence = ?1,
                 grouping_confidence = ?2,
                 variations = ?3,
                 updated_at = ?4
             WHERE id = ?5",
            params![
                entity.classification_confidence,
                entity.grouping_confidence,
                variations,
                entity.updated_at.format(TIMESTAMP_FORMAT).to_string(),
                id,
            ],
        )?;
        Ok(())
    }
}

/// A canonical name may not begin with whitespace, a separator character,
/// or a lone punctuation mark glued to the front of a name.
fn validate_canonical_name(name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        return Err(PipelineError::InvariantViolation(
            "empty canonical name".into(),
        ));
    };
    if first.is_whitespace() || matches!(first, ';' | '|' | '&' | ',') {
        return Err(PipelineError::InvariantViolation(format!(
            "canonical name starts with {first:?}: {name:?}"
        )));
    }
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn row_to_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<CanonicalEntity> {
    let id: i64 = row.get(0)?;
    let canonical_name: String = row.get(1)?;
    let raw_type: String = row.get(2)?;
    let entity_type = EntityType::from_str(&raw_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown entity type {raw_type:?}").into(),
        )
    })?;
    let variations_json: String = row.get(5)?;
    let variations: Vec<NameVariation> =
        serde_json::from_str(&variations_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;
    Ok(CanonicalEntity {
        id: Some(EntityId(id)),
        canonical_name,
        entity_type,
        classification_confidence: row.get(3)?,
        grouping_confidence: row.get(4)?,
        variations,
        created_at: parse_timestamp(row, 6)?,
        updated_at: parse_timestamp(row, 7)?,
    })
}

fn parse_timestamp(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(column)?;
    NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CanonicalStore {
        CanonicalStore::open_in_memory(SimilarityWeights::default(), 0.70).unwrap()
    }

    fn pessoa(canonical: &str) -> CanonicalEntity {
        let now = Utc::now().naive_utc();
        CanonicalEntity {
            id: None,
            canonical_name: canonical.to_string(),
            entity_type: EntityType::Pessoa,
            classification_confidence: 0.80,
            grouping_confidence: 1.0,
            variations: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn create_schema_is_idempotent() {
        let store = store();
        store.create_schema().unwrap();
        store.create_schema().unwrap();
    }

    #[test]
    fn insert_then_merge_variation() {
        let mut store = store();
        let entity = store.upsert(&pessoa("Forzza, R.C."), "Forzza, R.C.", 1.0).unwrap();
        assert_eq!(entity.variations.len(), 1);
        assert_eq!(entity.grouping_confidence, 1.0);

        let entity = store.upsert(&pessoa("Forzza, R.C."), "R.C. Forzza", 0.93).unwrap();
        assert_eq!(entity.variations.len(), 2);
        assert!((entity.grouping_confidence - 0.93).abs() < 1e-9);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn repeated_spelling_increments_count() {
        let mut store = store();
        store.upsert(&pessoa("Silva, J."), "Silva, J.", 1.0).unwrap();
        let entity = store.upsert(&pessoa("Silva, J."), "Silva, J.", 1.0).unwrap();
        assert_eq!(entity.variations.len(), 1);
        assert_eq!(entity.variations[0].occurrence_count, 2);
        assert!(entity.variations[0].last_seen >= entity.variations[0].first_seen);
    }

    #[test]
    fn variation_texts_are_case_sensitive_unique() {
        let mut store = store();
        store.upsert(&pessoa("Silva, J."), "Silva, J.", 1.0).unwrap();
        let entity = store.upsert(&pessoa("Silva, J."), "SILVA, J.", 0.95).unwrap();
        assert_eq!(entity.variations.len(), 2);
    }

    #[test]
    fn find_similar_scores_canonical_and_variations() {
        let mut store = store();
        store.upsert(&pessoa("Forzza, R.C."), "Forzza, R.C.", 1.0).unwrap();

        let key = Normalizer::new().key_for("Forzza, R.", EntityType::Pessoa);
        let (entity, score) = store
            .find_similar(&key, EntityType::Pessoa, 0.70)
            .unwrap()
            .expect("should match");
        assert_eq!(entity.canonical_name, "Forzza, R.C.");
        assert!(score >= 0.70);
    }

    #[test]
    fn alpha_equality_short_circuits_to_one() {
        let mut store = store();
        store.upsert(&pessoa("Forzza, R.C."), "Forzza, R.C.", 1.0).unwrap();
        let key = Normalizer::new().key_for("Rafaela C. Forzza", EntityType::Pessoa);
        let (_, score) = store
            .find_similar(&key, EntityType::Pessoa, 0.70)
            .unwrap()
            .expect("should match");
        assert_eq!(score, 1.0);
    }

    #[test]
    fn find_similar_respects_entity_type() {
        let mut store = store();
        store.upsert(&pessoa("Forzza, R.C."), "Forzza, R.C.", 1.0).unwrap();
        let key = Normalizer::new().key_for("Forzza, R.C.", EntityType::Pessoa);
        assert!(store
            .find_similar(&key, EntityType::Empresa, 0.70)
            .unwrap()
            .is_none());
    }

    #[test]
    fn unrelated_names_do_not_match() {
        let mut store = store();
        store.upsert(&pessoa("Forzza, R.C."), "Forzza, R.C.", 1.0).unwrap();
        let key = Normalizer::new().key_for("Silva, J.", EntityType::Pessoa);
        assert!(store
            .find_similar(&key, EntityType::Pessoa, 0.70)
            .unwrap()
            .is_none());
    }

    #[test]
    fn grouping_confidence_is_the_weakest_link() {
        let mut store = store();
        store.upsert(&pessoa("Forzza, R.C."), "Forzza, R.C.", 1.0).unwrap();
        store.upsert(&pessoa("Forzza, R.C."), "Forzza, R.", 0.91).unwrap();
        let entity = store.upsert(&pessoa("Forzza, R.C."), "Forzza, Rafaela C.", 0.97).unwrap();
        assert!((entity.grouping_confidence - 0.91).abs() < 1e-9);
    }

    #[test]
    fn association_confidence_is_floored() {
        let mut store = store();
        let entity = store.upsert(&pessoa("Silva, J."), "Silva, J.", 0.2).unwrap();
        assert!(entity.variations[0].association_confidence >= 0.70);
    }

    #[test]
    fn canonical_names_may_not_start_with_separators() {
        let mut store = store();
        for bad in ["; Silva", "|Silva", " Silva", ",Silva", "&Silva"] {
            let result = store.upsert(&pessoa(bad), bad, 1.0);
            assert!(
                matches!(result, Err(PipelineError::InvariantViolation(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canon.db");
        {
            let mut store =
                CanonicalStore::open(&path, SimilarityWeights::default(), 0.70).unwrap();
            store.upsert(&pessoa("Forzza, R.C."), "Forzza, R.C.", 1.0).unwrap();
        }
        let store = CanonicalStore::open(&path, SimilarityWeights::default(), 0.70).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        let key = Normalizer::new().key_for("R.C. Forzza", EntityType::Pessoa);
        assert!(store
            .find_similar(&key, EntityType::Pessoa, 0.70)
            .unwrap()
            .is_some());
    }

    #[test]
    fn accents_survive_storage_byte_identical() {
        let mut store = store();
        let entity = store
            .upsert(&pessoa("Guimarães, T.M."), "Guimarães, T. M.", 1.0)
            .unwrap();
        let reloaded = store.all().unwrap();
        assert_eq!(reloaded[0].canonical_name, "Guimarães, T.M.");
        assert_eq!(reloaded[0].variations[0].variation_text, "Guimarães, T. M.");
        assert_eq!(entity.id, reloaded[0].id);
    }
}
