//! Lexical query normalisation.

/// Terms shorter than this are dropped.
pub const MIN_TERM_CHARS: usize = 3;

/// Turn free text into full-text terms.
///
/// Punctuation becomes whitespace, terms of fewer than
/// [`MIN_TERM_CHARS`] characters are dropped, and the rest are lowercased
/// and deduplicated in order of first appearance.
pub fn normalize_terms(text: &str) -> Vec<String> {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect();

    let mut terms: Vec<String> = Vec::new();
    for word in cleaned.split_whitespace() {
        if word.chars().count() < MIN_TERM_CHARS {
            continue;
        }
        let term = word.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// AND-joined `to_tsquery` expression for `text`; empty when no term
/// survives normalisation.
pub fn to_tsquery(text: &str) -> String {
    normalize_terms(text).join(" & ")
}
