use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static ORDINAL_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+\)\s*").expect("ordinal prefix pattern is valid"));

/// Canonical grouping key for a faculty or program label.
///
/// Upper-cases, strips diacritics and digits, and collapses whitespace.
pub fn normalize_group_label(raw: &str) -> String {
    let stripped: String = raw
        .to_uppercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c) && !c.is_ascii_digit())
        .collect();
    collapse_whitespace(&stripped)
}

/// Canonical form of a criterion header such as `"3)  Calidad  docente"`.
///
/// Drops the leading ordinal, strips diacritics, collapses whitespace and
/// keeps the original casing.
pub fn normalize_criterion_label(raw: &str) -> String {
    let without_ordinal = ORDINAL_PREFIX.replace(raw, "");
    let stripped: String = without_ordinal
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    collapse_whitespace(&stripped)
}

/// Group label for a raw cell; missing and null cells map to `""`.
pub fn group_label_of(cell: Option<&Value>) -> String {
    match cell_text(cell) {
        Some(text) => normalize_group_label(&text),
        None => String::new(),
    }
}

/// Textual form of a cell as the source data would have rendered it.
pub(crate) fn cell_text(cell: Option<&Value>) -> Option<String> {
    match cell? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
