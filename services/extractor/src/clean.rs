//! Value and label cleaning helpers.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::mapping::ValueType;
use crate::table::is_placeholder;

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").unwrap());

/// Fixed substitution table for accented Latin letters (lowercase only;
/// callers lowercase first).
const TRANSLITERATIONS: &[(char, char)] = &[
    ('á', 'a'),
    ('à', 'a'),
    ('â', 'a'),
    ('ä', 'a'),
    ('é', 'e'),
    ('è', 'e'),
    ('ê', 'e'),
    ('ë', 'e'),
    ('í', 'i'),
    ('ì', 'i'),
    ('î', 'i'),
    ('ï', 'i'),
    ('ó', 'o'),
    ('ò', 'o'),
    ('ô', 'o'),
    ('ö', 'o'),
    ('ú', 'u'),
    ('ù', 'u'),
    ('û', 'u'),
    ('ü', 'u'),
    ('ñ', 'n'),
    ('ç', 'c'),
];

fn transliterate(ch: char) -> char {
    TRANSLITERATIONS
        .iter()
        .find(|(from, _)| *from == ch)
        .map(|(_, to)| *to)
        .unwrap_or(ch)
}

/// Lowercases and replaces accented letters with their ASCII base letter.
pub fn fold_accents(text: &str) -> String {
    text.to_lowercase().chars().map(transliterate).collect()
}

/// Field-name slug for labels the mapping table does not know.
///
/// "Año de Emisión" -> "ano_de_emision". Whitespace runs and hyphens become a
/// single underscore; anything else that is not ASCII alphanumeric is dropped.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for ch in fold_accents(label.trim()).chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            if !slug.is_empty() && !slug.ends_with('_') {
                slug.push('_');
            }
        } else if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

/// First maximal run of ASCII digits in the text.
pub fn first_digit_run(text: &str) -> Option<&str> {
    DIGIT_RUN.find(text).map(|m| m.as_str())
}

/// Canonical value for a raw value routed to a field of the given type.
///
/// Blank and placeholder values resolve to None. Identifiers keep only their
/// first digit run ("POL-1618805-A" -> "1618805") and fall back to the trimmed
/// text when there are no digits. Every other type is the trimmed text.
pub fn clean_value(raw: &str, value_type: ValueType) -> Option<String> {
    let trimmed = raw.trim();
    if is_placeholder(trimmed) {
        return None;
    }
    let cleaned = match value_type {
        ValueType::Identifier => first_digit_run(trimmed).unwrap_or(trimmed),
        ValueType::Text | ValueType::Number | ValueType::Date => trimmed,
    };
    Some(cleaned.to_string())
}
