// src/phonetic.rs
//
// Metaphone-style coder used by the similarity kernel. Accented spellings of
// the same surname share a code, so folding happens here and only here: the
// rest of the pipeline treats diacritics as significant.

/// Fold accented Latin letters to their ASCII base. Unknown characters pass
/// through unchanged.
pub fn ascii_fold(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => out.push('A'),
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => out.push('a'),
            'Ç' => out.push('C'),
            'ç' => out.push('c'),
            'È' | 'É' | 'Ê' | 'Ë' => out.push('E'),
            'è' | 'é' | 'ê' | 'ë' => out.push('e'),
            'Ì' | 'Í' | 'Î' | 'Ï' => out.push('I'),
            'ì' | 'í' | 'î' | 'ï' => out.push('i'),
            'Ñ' => out.push('N'),
            'ñ' => out.push('n'),
            'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => out.push('O'),
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => out.push('o'),
            'Ù' | 'Ú' | 'Û' | 'Ü' => out.push('U'),
            'ù' | 'ú' | 'û' | 'ü' => out.push('u'),
            'Ý' => out.push('Y'),
            'ý' | 'ÿ' => out.push('y'),
            'Æ' => out.push_str("AE"),
            'æ' => out.push_str("ae"),
            'Œ' => out.push_str("OE"),
            'œ' => out.push_str("oe"),
            'ß' => out.push_str("ss"),
            'Š' => out.push('S'),
            'š' => out.push('s'),
            'Ž' => out.push('Z'),
            'ž' => out.push('z'),
            _ => out.push(c),
        }
    }
    out
}

fn is_vowel(b: u8) -> bool {
    matches!(b, b'A' | b'E' | b'I' | b'O' | b'U')
}

/// Compute the phonetic code of `input`.
///
/// Classic Metaphone over the ASCII-folded, letters-only form, with one
/// adaptation: a `W` not followed by a vowel codes as `F` instead of going
/// silent. Brazilian collections carry German-origin surnames whose -w, -v
/// and -ov spellings alternate (Kummrow / Kummrov / Kummorov), and those
/// must land in the same code.
pub fn metaphone(input: &str) -> String {
    let letters: Vec<u8> = ascii_fold(input)
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase() as u8)
        .collect();
    if letters.is_empty() {
        return String::new();
    }

    // Initial-cluster exceptions.
    let mut start = 0;
    match (letters.first().copied(), letters.get(1).copied()) {
        (Some(b'A'), Some(b'E')) => start = 1,
        (Some(b'G'), Some(b'N'))
        | (Some(b'K'), Some(b'N'))
        | (Some(b'P'), Some(b'N'))
        | (Some(b'W'), Some(b'R')) => start = 1,
        _ => {}
    }

    let n = letters.len();
    let mut code = String::with_capacity(8);
    let mut i = start;

    // Leading X sounds like S; leading WH like W.
    if i < n && letters[i] == b'X' {
        code.push('S');
        i += 1;
    } else if i + 1 < n && letters[i] == b'W' && letters[i + 1] == b'H' {
        code.push('W');
        i += 2;
    }

    while i < n {
        let c = letters[i];

        // Duplicate adjacent letters collapse, except C (as in "accept").
        if i > start && c == letters[i - 1] && c != b'C' {
            i += 1;
            continue;
        }

        let next = letters.get(i + 1).copied();
        let next2 = letters.get(i + 2).copied();
        let prev = if i > 0 { Some(letters[i - 1]) } else { None };

        match c {
            b'A' | b'E' | b'I' | b'O' | b'U' => {
                if i == start && code.is_empty() {
                    code.push(c as char);
                }
            }
            b'B' => {
                // Terminal MB is silent ("lamb").
                if !(i + 1 == n && prev == Some(b'M')) {
                    code.push('B');
                }
            }
            b'C' => {
                if next == Some(b'I') && next2 == Some(b'A') {
                    code.push('X');
                } else if next == Some(b'H') {
                    if prev == Some(b'S') {
                        code.push('K');
                    } else {
                        code.push('X');
                    }
                    i += 1;
                } else if matches!(next, Some(b'I') | Some(b'E') | Some(b'Y')) {
                    code.push('S');
                } else {
                    code.push('K');
                }
            }
            b'D' => {
                if next == Some(b'G') && matches!(next2, Some(b'E') | Some(b'I') | Some(b'Y')) {
                    code.push('J');
                    i += 1;
                } else {
                    code.push('T');
                }
            }
            b'G' => {
                if next == Some(b'H') {
                    // GH: silent unless the H is followed by a vowel.
                    if next2.map(is_vowel).unwrap_or(false) {
                        code.push('K');
                    }
                    i += 1;
                } else if next == Some(b'N') {
                    // GN keeps the hard G in Portuguese surnames ("Magnani").
                    code.push('K');
                } else if matches!(next, Some(b'I') | Some(b'E') | Some(b'Y')) {
                    code.push('J');
                } else {
                    code.push('K');
                }
            }
            b'H' => {
                let prev_vowel = prev.map(is_vowel).unwrap_or(false);
                let next_vowel = next.map(is_vowel).unwrap_or(false);
                if !(prev_vowel && !next_vowel) {
                    code.push('H');
                }
            }
            b'K' => {
                if prev != Some(b'C') {
                    code.push('K');
                }
            }
            b'P' => {
                if next == Some(b'H') {
                    code.push('F');
                    i += 1;
                } else {
                    code.push('P');
                }
            }
            b'Q' => code.push('K'),
            b'S' => {
                if next == Some(b'H') {
                    code.push('X');
                    i += 1;
                } else if next == Some(b'I') && matches!(next2, Some(b'O') | Some(b'A')) {
                    code.push('X');
                } else {
                    code.push('S');
                }
            }
            b'T' => {
                if next == Some(b'H') {
                    code.push('0');
                    i += 1;
                } else if next == Some(b'I') && matches!(next2, Some(b'O') | Some(b'A')) {
                    code.push('X');
                } else if next == Some(b'C') && next2 == Some(b'H') {
                    // TCH: the CH carries the sound.
                } else {
                    code.push('T');
                }
            }
            b'V' => code.push('F'),
            b'W' => {
                if next.map(is_vowel).unwrap_or(false) {
                    code.push('W');
                } else {
                    code.push('F');
                }
            }
            b'X' => code.push_str("KS"),
            b'Y' => {
                if next.map(is_vowel).unwrap_or(false) {
                    code.push('Y');
                }
            }
            b'Z' => code.push('S'),
            b'F' | b'J' | b'L' | b'M' | b'N' | b'R' => code.push(c as char),
            _ => {}
        }

        i += 1;
    }

    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_portuguese_accents() {
        assert_eq!(ascii_fold("Guimarães"), "Guimaraes");
        assert_eq!(ascii_fold("Conceição"), "Conceicao");
        assert_eq!(ascii_fold("Müller"), "Muller");
        assert_eq!(ascii_fold("EXPEDIÇÃO"), "EXPEDICAO");
    }

    #[test]
    fn accented_and_plain_spellings_share_codes() {
        assert_eq!(metaphone("Guimarães"), metaphone("Guimaraes"));
        assert_eq!(metaphone("Araújo"), metaphone("Araujo"));
        assert_eq!(metaphone("Gonçalves"), metaphone("Goncalves"));
    }

    #[test]
    fn germanic_surname_spellings_converge() {
        let codes: Vec<String> = ["Kumerrow", "Kummorov", "Kummrov", "Kummrow"]
            .iter()
            .map(|s| metaphone(s))
            .collect();
        assert!(codes.iter().all(|c| c == &codes[0]), "{codes:?}");
    }

    #[test]
    fn basic_consonant_mapping() {
        assert_eq!(metaphone("Forzza"), "FRS");
        assert_eq!(metaphone("Silva"), "SLF");
        assert_eq!(metaphone("Philips"), "FLPS");
        assert_eq!(metaphone("Xavier"), "SFR");
    }

    #[test]
    fn distinct_names_stay_distinct() {
        assert_ne!(metaphone("Silva"), metaphone("Santos"));
        assert_ne!(metaphone("Forzza"), metaphone("Braz"));
    }

    #[test]
    fn empty_and_nonalpha_inputs_yield_empty_codes() {
        assert_eq!(metaphone(""), "");
        assert_eq!(metaphone("1234 ?!"), "");
    }
}
