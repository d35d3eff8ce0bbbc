//! Title and key normalization shared by path resolution and section lookup.
//!
//! Section titles and mapping keys are compared case-insensitively with
//! underscores and spaces treated as the same separator, so
//! `account_overview` and `Account Overview` name the same section.

/// Title of the section that always sits at the end of a plan.
pub const RESEARCH_SOURCES: &str = "Research Sources";

/// Title-case a string: the first letter of every alphabetic run is
/// upper-cased and the rest lower-cased.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

/// Display form of a raw title or key: underscores become spaces, then
/// the result is title-cased.
pub fn normalize_title(raw: &str) -> String {
    title_case(&raw.trim().replace('_', " "))
}

/// Comparison form: underscores become spaces, trimmed, lower-cased.
pub fn loose_key(s: &str) -> String {
    s.replace('_', " ").trim().to_lowercase()
}

/// Whether two titles name the same section under normalized comparison.
pub fn titles_match(a: &str, b: &str) -> bool {
    loose_key(a) == loose_key(b)
}

/// Whether `title` names the research sources section.
pub fn is_research_sources(title: &str) -> bool {
    title.trim().eq_ignore_ascii_case(RESEARCH_SOURCES)
}
