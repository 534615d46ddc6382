// src/pipeline/normalizer.rs

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{EntityType, NormalizedName, UnfitReason};
use crate::pipeline::canonical;

/// Any "et al." family token: `et al.`, `ET. AL.`, `et alli`, `et alii`.
/// `\b` after the optional suffix keeps surnames like "Albuquerque" safe.
pub static ET_AL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bet\.?\s*al(?:li|ii)?\b\.?").expect("et-al regex"));

/// "Number, initials" shapes that are collection numbers, not names:
/// `1216, M.E.`, `12196 - M.B.`.
static NUMBER_INITIALS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\s*[,;\-]\s*\p{Lu}\.(?:\s*\p{Lu}\.?)*\s*$").expect("regex"));

static LEADING_STRAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[.,;:|&\-\s]+").expect("regex"));
static TRAILING_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,;:|&\s]+$").expect("regex"));
static COMMA_SPACING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*,\s*").expect("regex"));
static PUNCT_SPACING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*([,;.&])\s*").expect("regex"));
static ATTACHED_DIGITS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L})\s*\d+").expect("regex"));
static TRAILING_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s\d+$").expect("regex"));

/// A normalized atom: the `NormalizedName` plus the canonical display the
/// entity will carry if this atom creates one.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAtom {
    pub name: NormalizedName,
    pub canonical_name: String,
}

/// Produces comparison keys and display forms for single names.
///
/// The comparison key is for matching only. The display form keeps accents
/// and interior letter case so variations are stored with their source
/// spelling.
#[derive(Debug, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Normalizer
    }

    /// Normalize one atom for the given target entity type.
    ///
    /// For `Pessoa` the comparison key is computed over the derived
    /// "Surname, Initials" canonical form, so reordered spellings of the
    /// same person produce comparable keys.
    pub fn normalize(
        &self,
        text: &str,
        entity_type: EntityType,
    ) -> Result<NormalizedAtom, UnfitReason> {
        let raw = text.trim();
        if raw.is_empty() {
            return Err(UnfitReason::Empty);
        }
        if raw.starts_with('|') {
            return Err(UnfitReason::LeadingSeparator);
        }
        if NUMBER_INITIALS_RE.is_match(raw) {
            return Err(UnfitReason::LeadingDigit);
        }

        let display = self.clean_display(raw);
        if display.is_empty() {
            return Err(UnfitReason::Empty);
        }

        let canonical_name = canonical::derive_canonical(&display, entity_type);
        let key_source = if entity_type == EntityType::Pessoa {
            canonical_name.as_str()
        } else {
            display.as_str()
        };
        let (comparison_key, rules_applied) = self.comparison_key(key_source);

        self.check_fit(&display, &comparison_key, entity_type)?;

        Ok(NormalizedAtom {
            name: NormalizedName {
                display_form: display,
                comparison_key,
                rules_applied,
            },
            canonical_name,
        })
    }

    /// Comparison key for an already-stored spelling. Same derivation as
    /// `normalize` but without fitness checks: the store uses this to score
    /// candidates against incoming atoms.
    pub fn key_for(&self, text: &str, entity_type: EntityType) -> String {
        let display = self.clean_display(text.trim());
        let source = if entity_type == EntityType::Pessoa {
            canonical::derive_canonical(&display, entity_type)
        } else {
            display
        };
        self.comparison_key(&source).0
    }

    /// Whitespace and stray-punctuation cleanup only. Accents, interior
    /// case, and dot placement are preserved for variation storage.
    pub fn clean_display(&self, text: &str) -> String {
        let stripped = LEADING_STRAY_RE.replace(text, "");
        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        let spaced = COMMA_SPACING_RE.replace_all(&collapsed, ", ");
        TRAILING_SEPARATOR_RE.replace(&spaced, "").into_owned()
    }

    /// The ordered key rules. Returns the key and the tags of the rules
    /// that changed the text.
    pub fn comparison_key(&self, text: &str) -> (String, Vec<String>) {
        let mut rules = Vec::new();
        let mut current = text.trim().to_string();

        let stripped = LEADING_STRAY_RE.replace(&current, "").into_owned();
        if stripped != current {
            rules.push("strip_leading_punctuation".to_string());
            current = stripped;
        }

        let collapsed = current.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed != current {
            rules.push("collapse_whitespace".to_string());
            current = collapsed;
        }

        let spaced = PUNCT_SPACING_RE.replace_all(&current, "$1 ").into_owned();
        let spaced = spaced.trim().to_string();
        if spaced != current {
            rules.push("standardize_punctuation".to_string());
            current = spaced;
        }

        let scrubbed = ET_AL_RE.replace_all(&current, " ").into_owned();
        if scrubbed != current {
            rules.push("remove_et_al".to_string());
            current = scrubbed;
        }

        let without_attached = ATTACHED_DIGITS_RE.replace_all(&current, "$1").into_owned();
        let without_digits = TRAILING_DIGITS_RE.replace(&without_attached, "").into_owned();
        if without_digits != current {
            rules.push("strip_digit_groups".to_string());
            current = without_digits;
        }

        // Removals can leave gaps or dangling separators behind.
        current = current.split_whitespace().collect::<Vec<_>>().join(" ");
        current = TRAILING_SEPARATOR_RE.replace(&current, "").into_owned();

        let upper = current.to_uppercase();
        if upper != current {
            rules.push("uppercase".to_string());
        }

        (upper, rules)
    }

    /// Fitness of an atom that is about to be canonicalized.
    fn check_fit(
        &self,
        display: &str,
        key: &str,
        entity_type: EntityType,
    ) -> Result<(), UnfitReason> {
        if key.is_empty() {
            return Err(UnfitReason::Empty);
        }
        if key.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return Err(UnfitReason::LeadingDigit);
        }
        if entity_type == EntityType::Pessoa {
            if key.chars().filter(|c| c.is_alphabetic()).count() < 3 {
                return Err(UnfitReason::TooFewAlphabetic);
            }
            let single_word = display.split_whitespace().count() == 1;
            if single_word && !display.contains(['.', ',']) {
                return Err(UnfitReason::GenericSingleWord);
            }
        }
        Ok(())
    }

    /// Fitness of a raw string persisted as fallback `NaoDeterminado`
    /// (anything that is not an exact unknown-collector placeholder).
    pub fn fallback_fitness(&self, raw: &str) -> Result<(), UnfitReason> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(UnfitReason::Empty);
        }
        if trimmed.starts_with('|') {
            return Err(UnfitReason::LeadingSeparator);
        }
        if trimmed.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return Err(UnfitReason::LeadingDigit);
        }
        if trimmed.chars().filter(|c| c.is_alphabetic()).count() < 3 {
            return Err(UnfitReason::TooFewAlphabetic);
        }
        let mut words = trimmed.split_whitespace();
        if let (Some(word), None) = (words.next(), words.next()) {
            if !word.contains(['.', ',']) && word.chars().all(|c| !c.is_uppercase()) {
                return Err(UnfitReason::GenericSingleWord);
            }
        }
        Ok(())
    }
}
