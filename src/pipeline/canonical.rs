// src/pipeline/canonical.rs
//
// Canonical display derivation. Persons become "Surname, Initials";
// institutions and groups are upper-cased; unknowns keep their source text.

use crate::models::EntityType;

/// Portuguese name particles: never a surname on their own and never a
/// source of initials.
const PARTICLES: [&str; 7] = ["da", "de", "do", "das", "dos", "du", "e"];

pub fn derive_canonical(display: &str, entity_type: EntityType) -> String {
    match entity_type {
        EntityType::Pessoa => person_canonical(display),
        EntityType::Empresa | EntityType::GrupoPessoas => display.to_uppercase(),
        EntityType::NaoDeterminado => display.to_string(),
    }
}

/// "Surname, Initials" for an individual name in any of the accepted
/// arrangements:
///
/// - `"Guimarães, T. M."` → `"Guimarães, T.M."` (already surname-first)
/// - `"D.R. Gonzaga"`     → `"Gonzaga, D.R."`   (initials first)
/// - `"Alisson Nogueira Braz"` → `"Braz, A.N."` (full given names)
/// - `"Débora G. Takaki"` → `"Takaki, D.G."`    (mixed given name + initial)
/// - `"Grespan, TIAGO"`   → `"Grespan, T."`     (undotted given name)
pub fn person_canonical(display: &str) -> String {
    let trimmed = display.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Some((surname_part, given_part)) = trimmed.split_once(',') {
        let surname = title_case_words(surname_part.trim());
        let initials = initials_of(given_part.trim());
        return if initials.is_empty() {
            surname
        } else {
            format!("{surname}, {initials}")
        };
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    match tokens.as_slice() {
        [] => String::new(),
        [only] => title_case_words(only),
        [given @ .., surname] => {
            let initials: String = given
                .iter()
                .filter(|token| !is_particle(token))
                .map(|token| initials_of(token))
                .collect();
            let surname = title_case_words(surname);
            if initials.is_empty() {
                surname
            } else {
                format!("{surname}, {initials}")
            }
        }
    }
}

fn is_particle(token: &str) -> bool {
    PARTICLES.iter().any(|p| token.eq_ignore_ascii_case(p))
}

/// Reduce a given-name section to dotted upper-case initials: each full
/// word contributes its first letter, dotted tokens contribute every
/// lettered position. `"Débora G."` → `"D.G."`, `"TIAGO"` → `"T."`.
fn initials_of(given: &str) -> String {
    let mut initials = String::new();
    for token in given.split_whitespace() {
        if is_particle(token) {
            continue;
        }
        if token.contains('.') || token.chars().filter(|c| c.is_alphabetic()).count() == 1 {
            for c in token.chars().filter(|c| c.is_alphabetic()) {
                push_initial(&mut initials, c);
            }
        } else if let Some(first) = token.chars().find(|c| c.is_alphabetic()) {
            push_initial(&mut initials, first);
        }
    }
    initials
}

fn push_initial(out: &mut String, c: char) {
    for upper in c.to_uppercase() {
        out.push(upper);
    }
    out.push('.');
}

/// Title-case each word, keeping Portuguese particles lower-case and
/// hyphenated surname components capitalized individually.
fn title_case_words(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            if is_particle(word) {
                word.to_lowercase()
            } else {
                word.split('-')
                    .map(title_case_component)
                    .collect::<Vec<_>>()
                    .join("-")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case_component(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => {
            let mut out: String = first.to_uppercase().collect();
            out.push_str(&chars.as_str().to_lowercase());
            out
        }
    }
}
