// src/pipeline/atomizer.rs

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{AtomizationOutcome, AtomizedName, Category, SeparatorType};
use crate::pipeline::classifier::NAME_WITH_INITIALS_RE;
use crate::pipeline::normalizer::ET_AL_RE;

/// Digit runs that ride along as collection numbers: either glued to a name
/// token ("Santo410") or standing alone after one ("Silva, J. 4172").
/// Leading digit runs are left in place so the normalizer can reject them.
static ATTACHED_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\p{L})\d+").expect("regex"));
static STANDALONE_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s\d+\b").expect("regex"));
static TRAILING_STRAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,;&|\s]+$").expect("regex"));

/// Splits `ConjuntoPessoas` strings into individual names.
///
/// Separator recognition is priority-ordered: an "et al." token truncates
/// its segment (the unknown co-collectors are flagged, never persisted),
/// then `;`, `&` and `|` split unconditionally, and commas split only when
/// the segment repeats "Surname, Initials" units.
#[derive(Debug, Default)]
pub struct Atomizer;

impl Atomizer {
    pub fn new() -> Self {
        Atomizer
    }

    pub fn atomize(&self, text: &str, category: Category) -> AtomizationOutcome {
        let mut outcome = AtomizationOutcome::default();
        if category != Category::ConjuntoPessoas {
            return outcome;
        }

        let parent = text.trim();
        for (segment, separator) in split_strong(parent) {
            let mut segment = segment;
            if let Some(found) = ET_AL_RE.find(&segment) {
                segment.truncate(found.start());
                outcome.had_unknown_collaborators = true;
            }
            let segment = strip_collection_numbers(&segment);
            if segment.is_empty() {
                continue;
            }

            let units: Vec<String> = NAME_WITH_INITIALS_RE
                .find_iter(&segment)
                .map(|m| m.as_str().to_string())
                .collect();
            if units.len() >= 2 {
                // Commas between repeated name units are promoted to
                // separators.
                for (index, unit) in units.into_iter().enumerate() {
                    let used = if index == 0 {
                        separator
                    } else {
                        SeparatorType::Comma
                    };
                    push_atom(&mut outcome.atoms, parent, &unit, used);
                }
            } else {
                push_atom(&mut outcome.atoms, parent, &segment, separator);
            }
        }

        outcome
    }
}

/// Split on the strong separators, remembering which one preceded each
/// segment. The first segment is preceded by none.
fn split_strong(text: &str) -> Vec<(String, SeparatorType)> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut pending = SeparatorType::None;
    for c in text.chars() {
        let separator = match c {
            ';' => Some(SeparatorType::Semicolon),
            '&' => Some(SeparatorType::Ampersand),
            '|' => Some(SeparatorType::Pipe),
            _ => None,
        };
        match separator {
            Some(separator) => {
                segments.push((std::mem::take(&mut current), pending));
                pending = separator;
            }
            None => current.push(c),
        }
    }
    segments.push((current, pending));
    segments
}

fn strip_collection_numbers(segment: &str) -> String {
    let stripped = ATTACHED_DIGITS_RE.replace_all(segment, "$1");
    let stripped = STANDALONE_DIGITS_RE.replace_all(&stripped, " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    TRAILING_STRAY_RE.replace(&collapsed, "").into_owned()
}

fn push_atom(
    atoms: &mut Vec<AtomizedName>,
    parent: &str,
    text: &str,
    separator_used: SeparatorType,
) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    atoms.push(AtomizedName {
        text: trimmed.to_string(),
        position: atoms.len(),
        separator_used,
        parent_raw_text: parent.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atoms(text: &str) -> Vec<String> {
        Atomizer::new()
            .atomize(text, Category::ConjuntoPessoas)
            .atoms
            .into_iter()
            .map(|a| a.text)
            .collect()
    }

    #[test]
    fn non_conjunto_yields_nothing() {
        let outcome = Atomizer::new().atomize("Silva, J.", Category::Pessoa);
        assert!(outcome.atoms.is_empty());
    }

    #[test]
    fn splits_on_all_strong_separators() {
        assert_eq!(
            atoms("Silva, J. & R.C. Forzza; Santos, M. | Souza, A."),
            vec!["Silva, J.", "R.C. Forzza", "Santos, M.", "Souza, A."]
        );
    }

    #[test]
    fn records_positions_and_separators() {
        let outcome = Atomizer::new().atomize(
            "Silva, J. & R.C. Forzza; Santos, M. et al.",
            Category::ConjuntoPessoas,
        );
        let got: Vec<(usize, SeparatorType, &str)> = outcome
            .atoms
            .iter()
            .map(|a| (a.position, a.separator_used, a.text.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                (0, SeparatorType::None, "Silva, J."),
                (1, SeparatorType::Ampersand, "R.C. Forzza"),
                (2, SeparatorType::Semicolon, "Santos, M."),
            ]
        );
        assert!(outcome.had_unknown_collaborators);
    }

    #[test]
    fn et_al_truncates_only_its_segment() {
        assert_eq!(
            atoms("Silva, J. et al.; Santos, M."),
            vec!["Silva, J.", "Santos, M."]
        );
        assert_eq!(atoms("Botelho, R.D. ET. AL."), vec!["Botelho, R.D."]);
        // Names past the next strong separator are unaffected.
        assert_eq!(
            atoms("Lima, P. et alli & Souza, A."),
            vec!["Lima, P.", "Souza, A."]
        );
    }

    #[test]
    fn commas_split_only_repeated_name_units() {
        assert_eq!(
            atoms("Silva, J., Santos, M., Souza, A.B."),
            vec!["Silva, J.", "Santos, M.", "Souza, A.B."]
        );
        // A single unit keeps its comma.
        assert_eq!(atoms("Silva, J."), vec!["Silva, J."]);
    }

    #[test]
    fn promoted_commas_are_recorded_as_separators() {
        let outcome =
            Atomizer::new().atomize("Silva, J., Santos, M.", Category::ConjuntoPessoas);
        assert_eq!(outcome.atoms[1].separator_used, SeparatorType::Comma);
    }

    #[test]
    fn collection_numbers_are_stripped() {
        assert_eq!(atoms("Silva, J. 4172 & Santos, M."), vec!["Silva, J.", "Santos, M."]);
        assert_eq!(atoms("Santo410 & Souza, A."), vec!["Santo", "Souza, A."]);
    }

    #[test]
    fn empty_segments_disappear() {
        assert_eq!(atoms(";; Silva, J. & "), vec!["Silva, J."]);
    }
}
