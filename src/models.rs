// src/models.rs

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

//------------------------------------------------------------------------------
// IDENTIFIER TYPES
//------------------------------------------------------------------------------
// Newtype pattern so store row ids and run ids cannot be mixed up.

/// Strongly typed identifier for persisted canonical entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub i64);

/// Opaque identifier of a source record (whatever the record source yields).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

//------------------------------------------------------------------------------
// CLOSED SETS
//------------------------------------------------------------------------------

/// The five classification categories.
///
/// `ConjuntoPessoas` is the only category that triggers atomization; its
/// atoms are persisted as `Pessoa` entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Pessoa,
    ConjuntoPessoas,
    GrupoPessoas,
    Empresa,
    NaoDeterminado,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Pessoa => "Pessoa",
            Category::ConjuntoPessoas => "ConjuntoPessoas",
            Category::GrupoPessoas => "GrupoPessoas",
            Category::Empresa => "Empresa",
            Category::NaoDeterminado => "NaoDeterminado",
        }
    }
}

/// Entity types stored in the canonical store. `ConjuntoPessoas` never
/// reaches storage: its atoms become `Pessoa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Pessoa,
    GrupoPessoas,
    Empresa,
    NaoDeterminado,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Pessoa => "Pessoa",
            EntityType::GrupoPessoas => "GrupoPessoas",
            EntityType::Empresa => "Empresa",
            EntityType::NaoDeterminado => "NaoDeterminado",
        }
    }

    pub fn from_str(s: &str) -> Option<EntityType> {
        match s {
            "Pessoa" => Some(EntityType::Pessoa),
            "GrupoPessoas" => Some(EntityType::GrupoPessoas),
            "Empresa" => Some(EntityType::Empresa),
            "NaoDeterminado" => Some(EntityType::NaoDeterminado),
            _ => None,
        }
    }

    /// Storage type for an atom classified under `category`.
    pub fn from_category(category: Category) -> EntityType {
        match category {
            Category::Pessoa | Category::ConjuntoPessoas => EntityType::Pessoa,
            Category::GrupoPessoas => EntityType::GrupoPessoas,
            Category::Empresa => EntityType::Empresa,
            Category::NaoDeterminado => EntityType::NaoDeterminado,
        }
    }
}

/// Separator that preceded an atom inside a multi-person string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeparatorType {
    Semicolon,
    Ampersand,
    EtAl,
    Comma,
    Pipe,
    None,
}

impl SeparatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeparatorType::Semicolon => ";",
            SeparatorType::Ampersand => "&",
            SeparatorType::EtAl => "et al.",
            SeparatorType::Comma => ",",
            SeparatorType::Pipe => "|",
            SeparatorType::None => "none",
        }
    }
}

//------------------------------------------------------------------------------
// STAGE OUTPUTS
//------------------------------------------------------------------------------

/// Result of the rule classifier (possibly adjusted by the NER adapter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// The raw collector string, trimmed.
    pub raw_text: String,
    pub category: Category,
    /// In [0, 1]; anything persisted later is floored at 0.70.
    pub confidence: f64,
    /// Ordered tags of the rules that fired, e.g. `acronym`,
    /// `multiple_name_separator`, `ner_person_high`.
    pub patterns_matched: Vec<String>,
    pub should_atomize: bool,
}

impl ClassificationResult {
    /// `should_atomize` is not a free field: it is defined by the category.
    pub fn new(
        raw_text: impl Into<String>,
        category: Category,
        confidence: f64,
        patterns_matched: Vec<String>,
    ) -> Self {
        ClassificationResult {
            raw_text: raw_text.into(),
            category,
            confidence,
            patterns_matched,
            should_atomize: category == Category::ConjuntoPessoas,
        }
    }
}

/// One individual name split out of a `ConjuntoPessoas` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomizedName {
    pub text: String,
    /// 0-based order within the parent string.
    pub position: usize,
    /// Separator that preceded this atom; `None` for the first.
    pub separator_used: SeparatorType,
    pub parent_raw_text: String,
}

/// Atomizer output. `had_unknown_collaborators` records that an "et al."
/// token truncated the input; it is never persisted.
#[derive(Debug, Clone, Default)]
pub struct AtomizationOutcome {
    pub atoms: Vec<AtomizedName>,
    pub had_unknown_collaborators: bool,
}

/// Why an input cannot be canonicalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnfitReason {
    /// Nothing left after normalization.
    Empty,
    /// Key begins with a digit (collection numbers, "1216, M.E." shapes).
    LeadingDigit,
    /// Begins with a separator character (`|Amanda, A.` shapes).
    LeadingSeparator,
    /// Fewer than 3 alphabetic characters.
    TooFewAlphabetic,
    /// A single word with no punctuation: too generic for a person.
    GenericSingleWord,
}

impl UnfitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnfitReason::Empty => "empty_after_normalization",
            UnfitReason::LeadingDigit => "leading_digit",
            UnfitReason::LeadingSeparator => "leading_separator",
            UnfitReason::TooFewAlphabetic => "too_few_alphabetic",
            UnfitReason::GenericSingleWord => "generic_single_word",
        }
    }
}

/// Normalizer output for one atom.
///
/// `comparison_key` exists only for matching: upper-cased,
/// punctuation-normalized, digit-scrubbed. It is never displayed, exported,
/// or stored as a canonical name. `display_form` keeps accents and interior
/// case and is what variation storage uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedName {
    pub display_form: String,
    pub comparison_key: String,
    pub rules_applied: Vec<String>,
}

//------------------------------------------------------------------------------
// PERSISTED MODEL
//------------------------------------------------------------------------------

/// A specific spelling observed in the source, attached to a canonical
/// entity. `variation_text` is unique per entity under case-sensitive
/// equality; repeats increment `occurrence_count` and refresh `last_seen`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameVariation {
    pub variation_text: String,
    pub occurrence_count: u64,
    /// Similarity score that attached this spelling; 1.0 when it created
    /// the entity. Floored at 0.70.
    pub association_confidence: f64,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
}

/// A stored collector: one preferred spelling plus observed variations.
///
/// Unique key: `(canonical_name, entity_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: Option<EntityId>,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub classification_confidence: f64,
    /// Minimum association confidence over all variations: a lower bound
    /// downstream consumers can trust.
    pub grouping_confidence: f64,
    pub variations: Vec<NameVariation>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CanonicalEntity {
    pub fn variation(&self, text: &str) -> Option<&NameVariation> {
        self.variations.iter().find(|v| v.variation_text == text)
    }

    pub fn total_occurrences(&self) -> u64 {
        self.variations.iter().map(|v| v.occurrence_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_atomize_tracks_category() {
        let conjunto = ClassificationResult::new("a; b", Category::ConjuntoPessoas, 0.9, vec![]);
        assert!(conjunto.should_atomize);
        let pessoa = ClassificationResult::new("Silva, J.", Category::Pessoa, 0.8, vec![]);
        assert!(!pessoa.should_atomize);
    }

    #[test]
    fn entity_type_round_trips_through_str() {
        for ty in [
            EntityType::Pessoa,
            EntityType::GrupoPessoas,
            EntityType::Empresa,
            EntityType::NaoDeterminado,
        ] {
            assert_eq!(EntityType::from_str(ty.as_str()), Some(ty));
        }
        assert_eq!(EntityType::from_str("ConjuntoPessoas"), None);
    }

    #[test]
    fn conjunto_atoms_are_stored_as_pessoa() {
        assert_eq!(
            EntityType::from_category(Category::ConjuntoPessoas),
            EntityType::Pessoa
        );
    }
}
