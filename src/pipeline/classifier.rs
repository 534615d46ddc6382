// src/pipeline/classifier.rs

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Category, ClassificationResult};
use crate::phonetic::ascii_fold;
use crate::pipeline::normalizer::ET_AL_RE;

/// "Surname, Initials" unit: `Silva, J.`, `Alves-Araújo, A.B.`,
/// `Guimarães, T. M.`. Shared with the atomizer's comma promotion.
pub static NAME_WITH_INITIALS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\p{Lu}[\p{L}]+(?:-\p{Lu}[\p{L}]+)?,\s*\p{Lu}\.(?:\s*\p{Lu}\.)*").expect("regex")
});

/// "Initials Surname" unit: `R.C. Forzza`, `D. R. Gonzaga`.
static INITIALS_SURNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\p{Lu}\.\s*)+\p{Lu}[\p{L}]+(?:-\p{Lu}[\p{L}]+)?$").expect("regex")
});

/// "Surname, Givenname" with the given name written out: `Grespan, TIAGO`.
static SURNAME_GIVEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\p{Lu}[\p{L}]+(?:-\p{Lu}[\p{L}]+)?,\s*\p{Lu}[\p{L}]+(?:\s+\p{Lu}[\p{L}]+)?$")
        .expect("regex")
});

/// A stray pair of dotted initials anywhere: weak evidence of a person.
static LOOSE_INITIALS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\p{Lu}\.\s*\p{Lu}\.?").expect("regex"));

/// A bare all-uppercase token, institutional acronym style.
static ACRONYM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\p{Lu}{2,}$").expect("regex"));

/// Exact unknown-collector placeholders (compared accent-folded,
/// lower-cased).
const NAO_DETERMINADO_EXACT: [&str; 4] = ["?", "sem coletor", "nao identificado", "desconhecido"];

/// Acronym-style institution keywords; matched as whole words.
const INSTITUTION_ACRONYMS: [&str; 7] = ["embrapa", "usp", "unicamp", "ufrj", "ufmg", "inpa", "jbrj"];

/// Institutional phrases; matched as substrings.
const INSTITUTION_TERMS: [&str; 5] = [
    "herbario",
    "jardim botanico",
    "instituto",
    "universidade",
    "faculdade",
];

/// Collective nouns that mark a generic group of people.
const GROUP_TERMS: [&str; 7] = [
    "pesquisas",
    "equipe",
    "grupo",
    "projeto",
    "expedicao",
    "levantamento",
    "alunos",
];

/// Lower-case Portuguese name particles tolerated inside full names.
const NAME_PARTICLES: [&str; 7] = ["da", "de", "do", "das", "dos", "du", "e"];

/// Five-way rule classifier. The first matching rule wins and supplies the
/// base confidence; the NER adapter may adjust both afterwards.
#[derive(Debug, Default)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Classifier
    }

    pub fn classify(&self, text: &str) -> ClassificationResult {
        let trimmed = text.trim();
        let folded = ascii_fold(trimmed).to_lowercase();
        let mut patterns: Vec<String> = Vec::new();

        // 1. Exact unknown-collector placeholders.
        if NAO_DETERMINADO_EXACT.contains(&folded.as_str()) {
            patterns.push("exact_nao_determinado".into());
            return ClassificationResult::new(trimmed, Category::NaoDeterminado, 1.0, patterns);
        }

        // Malformed input short-circuit: nothing letter-like to classify.
        if trimmed.is_empty() || !trimmed.chars().any(|c| c.is_alphabetic()) {
            patterns.push("no_letter_pattern".into());
            return ClassificationResult::new(trimmed, Category::NaoDeterminado, 0.70, patterns);
        }

        // 2. Institutions: bare acronyms or known institutional terms.
        if ACRONYM_RE.is_match(trimmed) {
            patterns.push("acronym".into());
            return ClassificationResult::new(trimmed, Category::Empresa, 0.85, patterns);
        }
        if has_institution_keyword(&folded) {
            patterns.push("institution_keyword".into());
            return ClassificationResult::new(trimmed, Category::Empresa, 0.85, patterns);
        }

        // 3. Multi-person sets: strong separators, an et-al token, or
        // repeated "Surname, Initials" units.
        let has_strong_separator = trimmed.contains([';', '&', '|']);
        let has_et_al = ET_AL_RE.is_match(trimmed);
        let unit_count = NAME_WITH_INITIALS_RE.find_iter(trimmed).count();
        if has_strong_separator || has_et_al || unit_count >= 2 {
            patterns.push(if has_strong_separator || has_et_al {
                "multiple_name_separator".into()
            } else {
                "repeated_name_pattern".into()
            });
            let confidence = if all_segments_are_person_like(trimmed) {
                patterns.push("name_pattern_detected".into());
                0.95
            } else {
                0.82
            };
            return ClassificationResult::new(
                trimmed,
                Category::ConjuntoPessoas,
                confidence,
                patterns,
            );
        }

        // 4. Individual persons.
        if full_match(&NAME_WITH_INITIALS_RE, trimmed) {
            patterns.push("surname_comma_initials".into());
            return ClassificationResult::new(trimmed, Category::Pessoa, 0.80, patterns);
        }
        if INITIALS_SURNAME_RE.is_match(trimmed) {
            patterns.push("initials_surname".into());
            return ClassificationResult::new(trimmed, Category::Pessoa, 0.80, patterns);
        }
        if SURNAME_GIVEN_RE.is_match(trimmed) {
            patterns.push("surname_comma_given".into());
            return ClassificationResult::new(trimmed, Category::Pessoa, 0.80, patterns);
        }
        let has_group_term = has_group_keyword(&folded);
        if !has_group_term && looks_like_full_name(trimmed) {
            patterns.push("full_name".into());
            return ClassificationResult::new(trimmed, Category::Pessoa, 0.80, patterns);
        }
        if NAME_WITH_INITIALS_RE.is_match(trimmed) || LOOSE_INITIALS_RE.is_match(trimmed) {
            patterns.push("loose_name_pattern".into());
            return ClassificationResult::new(trimmed, Category::Pessoa, 0.65, patterns);
        }

        // 5. Generic collectives.
        if has_group_term {
            patterns.push("group_term".into());
            return ClassificationResult::new(trimmed, Category::GrupoPessoas, 0.70, patterns);
        }

        patterns.push("ambiguous_text".into());
        ClassificationResult::new(trimmed, Category::NaoDeterminado, 0.60, patterns)
    }
}

fn full_match(re: &Regex, text: &str) -> bool {
    re.find(text)
        .is_some_and(|m| m.start() == 0 && m.end() == text.len())
}

fn has_institution_keyword(folded: &str) -> bool {
    let word_hit = folded
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| INSTITUTION_ACRONYMS.contains(&word));
    word_hit || INSTITUTION_TERMS.iter().any(|term| folded.contains(term))
}

fn has_group_keyword(folded: &str) -> bool {
    GROUP_TERMS.iter().any(|term| folded.contains(term))
}

/// Every strong-separator segment, once "et al." is dropped, reads like a
/// person name. That is what lifts a `ConjuntoPessoas` to high confidence.
fn all_segments_are_person_like(text: &str) -> bool {
    let mut seen = 0;
    for segment in text.split([';', '&', '|']) {
        let segment = match ET_AL_RE.find(segment) {
            Some(found) => &segment[..found.start()],
            None => segment,
        };
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        seen += 1;
        let person_like = NAME_WITH_INITIALS_RE.is_match(segment)
            || INITIALS_SURNAME_RE.is_match(segment)
            || LOOSE_INITIALS_RE.is_match(segment)
            || looks_like_full_name(segment);
        if !person_like {
            return false;
        }
    }
    seen > 0
}

/// Two to five tokens, each a capitalized word, a dotted initial, or a
/// Portuguese particle, ending in a capitalized surname.
fn looks_like_full_name(text: &str) -> bool {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if !(2..=5).contains(&tokens.len()) {
        return false;
    }
    let mut capitalized_words = 0;
    for token in &tokens {
        if NAME_PARTICLES.contains(&ascii_fold(token).to_lowercase().as_str()) {
            continue;
        }
        let mut chars = token.chars();
        let first_upper = chars.next().is_some_and(|c| c.is_uppercase());
        if !first_upper {
            return false;
        }
        let alpha = token.chars().filter(|c| c.is_alphabetic()).count();
        let is_initial = token.ends_with('.') && alpha <= 2;
        let is_word = alpha >= 2 && token.chars().all(|c| c.is_alphabetic() || c == '-');
        if !is_initial && !is_word {
            return false;
        }
        if is_word {
            capitalized_words += 1;
        }
    }
    let last = tokens.last().expect("nonempty");
    capitalized_words >= 2 && last.chars().filter(|c| c.is_alphabetic()).count() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> ClassificationResult {
        Classifier::new().classify(text)
    }

    #[test]
    fn exact_placeholders_win_outright() {
        for text in ["?", "sem coletor", "SEM COLETOR", "Não identificado", "desconhecido"] {
            let result = classify(text);
            assert_eq!(result.category, Category::NaoDeterminado, "{text}");
            assert_eq!(result.confidence, 1.0);
            assert!(!result.should_atomize);
        }
    }

    #[test]
    fn letterless_junk_is_nao_determinado_at_floor() {
        let result = classify("###");
        assert_eq!(result.category, Category::NaoDeterminado);
        assert_eq!(result.confidence, 0.70);
    }

    #[test]
    fn acronyms_and_keywords_are_empresa() {
        for text in ["EMBRAPA", "USP", "Herbário do Instituto de Botânica"] {
            let result = classify(text);
            assert_eq!(result.category, Category::Empresa, "{text}");
            assert!(result.confidence >= 0.85);
        }
    }

    #[test]
    fn acronym_keywords_do_not_fire_inside_words() {
        // "usp" buried in a surname is not USP.
        let result = classify("Suspiro, A.");
        assert_eq!(result.category, Category::Pessoa);
    }

    #[test]
    fn separated_names_are_conjunto_with_high_confidence() {
        let result = classify("Silva, J. & R.C. Forzza; Santos, M. et al.");
        assert_eq!(result.category, Category::ConjuntoPessoas);
        assert!(result.confidence >= 0.90);
        assert!(result.should_atomize);
    }

    #[test]
    fn sloppy_conjunto_keeps_base_confidence() {
        let result = classify("mata atlântica; sem nome");
        assert_eq!(result.category, Category::ConjuntoPessoas);
        assert!((result.confidence - 0.82).abs() < 1e-9);
    }

    #[test]
    fn repeated_units_promote_commas() {
        let result = classify("Silva, J., Santos, M.");
        assert_eq!(result.category, Category::ConjuntoPessoas);
        assert!(result.confidence >= 0.90);
    }

    #[test]
    fn et_al_alone_marks_a_conjunto() {
        let result = classify("Botelho, R.D. ET. AL.");
        assert_eq!(result.category, Category::ConjuntoPessoas);
        assert!(result.confidence >= 0.90);
    }

    #[test]
    fn person_arrangements_classify_strict() {
        for text in ["Forzza, R.C.", "R.C. Forzza", "Rafaela C. Forzza", "Alisson Nogueira Braz"] {
            let result = classify(text);
            assert_eq!(result.category, Category::Pessoa, "{text}");
            assert!((result.confidence - 0.80).abs() < 1e-9, "{text}");
        }
    }

    #[test]
    fn undotted_given_names_still_classify_strict() {
        let result = classify("Grespan, TIAGO");
        assert_eq!(result.category, Category::Pessoa);
        assert!((result.confidence - 0.80).abs() < 1e-9);
    }

    #[test]
    fn stray_initials_classify_loose() {
        let result = classify("13313, A.C.B.");
        assert_eq!(result.category, Category::Pessoa);
        assert!((result.confidence - 0.65).abs() < 1e-9);
    }

    #[test]
    fn group_terms_without_person_patterns_are_grupo() {
        let result = classify("Pesquisas da Biodiversidade");
        assert_eq!(result.category, Category::GrupoPessoas);
        assert!(result.confidence >= 0.70);
        let result = classify("Equipe do projeto flora");
        assert_eq!(result.category, Category::GrupoPessoas);
    }

    #[test]
    fn unmatched_text_defaults_low() {
        let result = classify("Kumerrow");
        assert_eq!(result.category, Category::NaoDeterminado);
        assert!((result.confidence - 0.60).abs() < 1e-9);
        assert_eq!(classify("soares").category, Category::NaoDeterminado);
    }

    #[test]
    fn pattern_tags_record_the_rule_that_fired() {
        assert_eq!(classify("EMBRAPA").patterns_matched, vec!["acronym"]);
        assert!(classify("Silva, J. & Santos, M.")
            .patterns_matched
            .contains(&"multiple_name_separator".to_string()));
    }
}
