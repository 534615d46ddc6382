// src/ner.rs
//
// Contract with the external named-entity-recognition collaborator. The
// model is injected behind a trait; the pipeline only depends on this
// adjustment logic and runs fine (and is tested) without any model.

use crate::error::PipelineError;
use crate::models::{Category, ClassificationResult};

/// Labels the adapter understands. Backends map their own tag sets here;
/// Portuguese models emit PESSOA/ORGANIZACAO, English ones PER/ORG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NerLabel {
    Person,
    Organization,
    Location,
    Other,
}

impl NerLabel {
    pub fn from_tag(tag: &str) -> NerLabel {
        match tag.to_uppercase().as_str() {
            "PESSOA" | "PER" | "PERSON" => NerLabel::Person,
            "ORGANIZACAO" | "ORGANIZAÇÃO" | "ORG" | "ORGANIZATION" => NerLabel::Organization,
            "LOCAL" | "LOC" | "LOCATION" => NerLabel::Location,
            _ => NerLabel::Other,
        }
    }
}

/// One entity span reported by the model.
#[derive(Debug, Clone)]
pub struct NerEntity {
    pub text: String,
    pub label: NerLabel,
    pub score: f64,
}

/// Everything the model found in one call.
#[derive(Debug, Clone, Default)]
pub struct NerOutcome {
    pub entities: Vec<NerEntity>,
}

impl NerOutcome {
    fn person_scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.entities
            .iter()
            .filter(|e| e.label == NerLabel::Person)
            .map(|e| e.score)
    }

    fn max_person_score(&self) -> Option<f64> {
        self.person_scores().fold(None, |acc, s| {
            Some(acc.map_or(s, |a: f64| a.max(s)))
        })
    }

    fn person_count(&self) -> usize {
        self.person_scores().count()
    }

    fn has_organization(&self) -> bool {
        self.entities
            .iter()
            .any(|e| e.label == NerLabel::Organization && e.score >= 0.50)
    }
}

/// The model behind the fallback. Implementations block; the driver bounds
/// each call with the configured timeout.
pub trait NerBackend: Send + Sync {
    fn analyze(&self, text: &str) -> Result<NerOutcome, PipelineError>;
}

/// The no-model backend: every call reports the adapter as unavailable, so
/// the rule-classifier result always stands.
#[derive(Debug, Default)]
pub struct NullNer;

impl NerBackend for NullNer {
    fn analyze(&self, _text: &str) -> Result<NerOutcome, PipelineError> {
        Err(PipelineError::NerUnavailable("no model configured".into()))
    }
}

/// What the adjustment decided for a low-confidence classification.
#[derive(Debug, Clone)]
pub enum NerAdjustment {
    /// Use this classification (possibly recategorized) instead.
    Revised(ClassificationResult),
    /// The input is noise: do not persist it.
    Discard,
}

/// Apply the confidence-adjustment table to a rule-classifier result.
/// Final confidence is capped at 0.90; anything still below 0.70 becomes
/// `NaoDeterminado` at the floor.
pub fn adjust(rule: &ClassificationResult, outcome: &NerOutcome) -> NerAdjustment {
    let alpha = rule.raw_text.chars().filter(|c| c.is_alphabetic()).count();
    let all_weak = outcome.entities.iter().all(|e| e.score < 0.50);
    if alpha < 3 || outcome.entities.is_empty() || all_weak {
        return NerAdjustment::Discard;
    }

    let mut category = rule.category;
    let mut confidence = rule.confidence;
    let mut patterns = rule.patterns_matched.clone();

    match outcome.max_person_score() {
        Some(score) if score > 0.85 => {
            if outcome.person_count() >= 2 {
                category = Category::ConjuntoPessoas;
                confidence = 0.90;
                patterns.push("ner_person_multi".into());
            } else {
                category = Category::Pessoa;
                confidence = 0.85;
                patterns.push("ner_person_high".into());
            }
        }
        Some(score) if score > 0.70 => {
            confidence = 0.75;
            patterns.push("ner_person_medium".into());
        }
        Some(score) if score > 0.50 => {
            confidence = 0.70;
            patterns.push("ner_person_low".into());
        }
        _ => {
            if outcome.has_organization() {
                category = Category::Empresa;
                confidence = 0.85;
                patterns.push("ner_organization".into());
            }
        }
    }

    confidence = confidence.min(0.90);
    if confidence < 0.70 {
        category = Category::NaoDeterminado;
        confidence = 0.70;
        patterns.push("ner_below_threshold".into());
    }

    NerAdjustment::Revised(ClassificationResult::new(
        rule.raw_text.clone(),
        category,
        confidence,
        patterns,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(text: &str, category: Category, confidence: f64) -> ClassificationResult {
        ClassificationResult::new(text, category, confidence, vec!["loose_name_pattern".into()])
    }

    fn person(score: f64) -> NerEntity {
        NerEntity {
            text: "x".into(),
            label: NerLabel::Person,
            score,
        }
    }

    #[test]
    fn null_backend_reports_unavailable() {
        assert!(NullNer.analyze("Silva, J.").is_err());
    }

    #[test]
    fn two_strong_persons_become_conjunto() {
        let outcome = NerOutcome {
            entities: vec![person(0.95), person(0.91)],
        };
        match adjust(&rule("Silva J Santos M", Category::NaoDeterminado, 0.60), &outcome) {
            NerAdjustment::Revised(result) => {
                assert_eq!(result.category, Category::ConjuntoPessoas);
                assert_eq!(result.confidence, 0.90);
                assert!(result.should_atomize);
            }
            NerAdjustment::Discard => panic!("should revise"),
        }
    }

    #[test]
    fn one_strong_person_becomes_pessoa() {
        let outcome = NerOutcome {
            entities: vec![person(0.92)],
        };
        match adjust(&rule("Kumerrow", Category::NaoDeterminado, 0.60), &outcome) {
            NerAdjustment::Revised(result) => {
                assert_eq!(result.category, Category::Pessoa);
                assert_eq!(result.confidence, 0.85);
            }
            NerAdjustment::Discard => panic!(),
        }
    }

    #[test]
    fn medium_person_only_lifts_confidence() {
        let outcome = NerOutcome {
            entities: vec![person(0.80)],
        };
        match adjust(&rule("something", Category::Pessoa, 0.65), &outcome) {
            NerAdjustment::Revised(result) => {
                assert_eq!(result.category, Category::Pessoa);
                assert_eq!(result.confidence, 0.75);
            }
            NerAdjustment::Discard => panic!(),
        }
    }

    #[test]
    fn organization_only_becomes_empresa() {
        let outcome = NerOutcome {
            entities: vec![NerEntity {
                text: "Instituto".into(),
                label: NerLabel::Organization,
                score: 0.88,
            }],
        };
        match adjust(&rule("inst. de bot.", Category::NaoDeterminado, 0.60), &outcome) {
            NerAdjustment::Revised(result) => {
                assert_eq!(result.category, Category::Empresa);
                assert_eq!(result.confidence, 0.85);
            }
            NerAdjustment::Discard => panic!(),
        }
    }

    #[test]
    fn noise_is_discarded() {
        let empty = NerOutcome::default();
        assert!(matches!(
            adjust(&rule("zzz", Category::NaoDeterminado, 0.60), &empty),
            NerAdjustment::Discard
        ));
        let weak = NerOutcome {
            entities: vec![person(0.30)],
        };
        assert!(matches!(
            adjust(&rule("abcd", Category::NaoDeterminado, 0.60), &weak),
            NerAdjustment::Discard
        ));
        // Too little text to mean anything, whatever the model says.
        let strong = NerOutcome {
            entities: vec![person(0.99)],
        };
        assert!(matches!(
            adjust(&rule("ab", Category::NaoDeterminado, 0.60), &strong),
            NerAdjustment::Discard
        ));
    }

    #[test]
    fn confidence_is_capped_and_floored() {
        let outcome = NerOutcome {
            entities: vec![person(0.60)],
        };
        // 0.70 after the low-person row: at the floor, kept.
        match adjust(&rule("abcdef", Category::Pessoa, 0.65), &outcome) {
            NerAdjustment::Revised(result) => assert_eq!(result.confidence, 0.70),
            NerAdjustment::Discard => panic!(),
        }
    }

    #[test]
    fn tag_sets_map_to_labels() {
        assert_eq!(NerLabel::from_tag("PESSOA"), NerLabel::Person);
        assert_eq!(NerLabel::from_tag("per"), NerLabel::Person);
        assert_eq!(NerLabel::from_tag("ORGANIZACAO"), NerLabel::Organization);
        assert_eq!(NerLabel::from_tag("MISC"), NerLabel::Other);
    }
}
