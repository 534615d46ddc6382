// src/similarity.rs
//
// Pure similarity kernel over comparison keys. Three subscores plus the
// weighted combination that drives grouping decisions in the store.

use strsim::{jaro_winkler, levenshtein};

use crate::config::SimilarityWeights;
use crate::phonetic::metaphone;

/// Normalized Levenshtein similarity: `1 − d / max(|s₁|, |s₂|)` over
/// characters. Two empty strings are identical.
pub fn edit_score(s1: &str, s2: &str) -> f64 {
    let max_len = s1.chars().count().max(s2.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(s1, s2) as f64 / max_len as f64
}

/// Jaro–Winkler similarity (prefix weight 0.1, prefix cap 4).
pub fn jaro_winkler_score(s1: &str, s2: &str) -> f64 {
    if s1.is_empty() || s2.is_empty() {
        return 0.0;
    }
    jaro_winkler(s1, s2)
}

/// The leading name token of a comparison key: everything before the first
/// comma, or the whole key when there is none. For "Surname, Initials" keys
/// this is the surname.
pub fn primary_token(key: &str) -> &str {
    key.split(',').next().unwrap_or(key).trim()
}

/// Whether two keys agree phonetically: equality of the Metaphone-style
/// codes of their primary tokens. Folding to ASCII happens inside the coder;
/// callers pass keys in their original form. Empty codes never match.
pub fn phonetic_match(s1: &str, s2: &str) -> bool {
    let code1 = metaphone(primary_token(s1));
    let code2 = metaphone(primary_token(s2));
    !code1.is_empty() && code1 == code2
}

/// Weighted combination of the three subscores. Weights are validated at
/// startup (non-negative, sum 1), so the result stays in [0, 1].
pub fn combined_score(s1: &str, s2: &str, weights: &SimilarityWeights) -> f64 {
    let phonetic = if phonetic_match(s1, s2) { 1.0 } else { 0.0 };
    weights.edit * edit_score(s1, s2)
        + weights.jaro_winkler * jaro_winkler_score(s1, s2)
        + weights.phonetic * phonetic
}

/// Case-folded, letters-only form of a key. Used for the exact-equality
/// short-circuit before any scoring.
pub fn alpha_only_uppercase(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> SimilarityWeights {
        SimilarityWeights::default()
    }

    #[test]
    fn edit_score_bounds() {
        assert_eq!(edit_score("", ""), 1.0);
        assert_eq!(edit_score("ABC", "ABC"), 1.0);
        assert_eq!(edit_score("ABC", ""), 0.0);
        let score = edit_score("KUMERROW", "KUMMOROV");
        assert!(score > 0.5 && score < 1.0);
    }

    #[test]
    fn jaro_winkler_rewards_shared_prefixes() {
        let with_prefix = jaro_winkler_score("FORZZA, R.", "FORZZA, R. C.");
        let without = jaro_winkler_score("AFORZZ, R.", "FORZZA, R. C.");
        assert!(with_prefix > without);
        assert!(with_prefix > 0.9);
    }

    #[test]
    fn phonetic_compares_the_surname_token() {
        assert!(phonetic_match("FORZZA, R.", "FORZZA, R. C."));
        assert!(phonetic_match("GUIMARÃES, T.M.", "GUIMARAES, T."));
        assert!(!phonetic_match("SILVA, J.", "SANTOS, M."));
        assert!(!phonetic_match("", ""));
    }

    #[test]
    fn combined_groups_initial_truncations() {
        // "Forzza, R." must still attach to a "Forzza, R.C." entity.
        let score = combined_score("FORZZA, R.", "FORZZA, R. C.", &weights());
        assert!(score >= 0.70, "{score}");
    }

    #[test]
    fn combined_groups_phonetic_spelling_drift() {
        for other in ["KUMMOROV", "KUMMROV", "KUMMROW"] {
            let score = combined_score("KUMERROW", other, &weights());
            assert!(score >= 0.70, "{other}: {score}");
        }
    }

    #[test]
    fn combined_rejects_unrelated_names() {
        let score = combined_score("SILVA, J.", "FORZZA, R. C.", &weights());
        assert!(score < 0.70, "{score}");
    }

    #[test]
    fn identical_keys_score_one() {
        let score = combined_score("BRAZ, A. N.", "BRAZ, A. N.", &weights());
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn alpha_only_uppercase_strips_everything_else() {
        assert_eq!(alpha_only_uppercase("Forzza, R.C."), "FORZZARC");
        assert_eq!(alpha_only_uppercase("Guimarães, T. M."), "GUIMARÃESTM");
    }
}
