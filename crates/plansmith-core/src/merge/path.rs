//! Dot-path resolution for update commands.

use serde_json::{Map, Value};

use super::MergeError;
use crate::document::{loose_key, normalize_title};

/// A parsed `section` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionPath {
    /// First segment as written by the model.
    pub raw_title: String,
    /// Display title used when a new section has to be created.
    pub title: String,
    /// Normalized sub-key inside mapping content, if the path has one.
    pub key: Option<String>,
}

impl SectionPath {
    /// Split `path` on `.` and derive the section title and target key.
    ///
    /// `Title.key` and `Title.content.key` both target `key`; a lone
    /// `Title.content` targets the key `Content`.
    pub fn parse(path: &str) -> Result<Self, MergeError> {
        let parts: Vec<&str> = path.split('.').collect();
        let raw_title = parts[0].trim();
        if raw_title.is_empty() {
            return Err(MergeError::EmptyPath(path.to_owned()));
        }

        let key = match parts.get(1).map(|p| p.trim()) {
            Some(second) if second.eq_ignore_ascii_case("content") && parts.len() > 2 => {
                Some(parts[2].trim())
            }
            Some(second) => Some(second),
            None => None,
        }
        .filter(|k| !k.is_empty())
        .map(normalize_title);

        Ok(Self {
            raw_title: raw_title.to_owned(),
            title: normalize_title(raw_title),
            key,
        })
    }
}

/// Map a normalized key onto the spelling already used in `map`.
///
/// Exact match first, then a case and separator insensitive match.
/// Unknown keys come back unchanged.
pub fn resolve_key(map: &Map<String, Value>, key: &str) -> String {
    if map.contains_key(key) {
        return key.to_owned();
    }
    let wanted = loose_key(key);
    map.keys()
        .find(|k| loose_key(k) == wanted)
        .cloned()
        .unwrap_or_else(|| key.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn title_only() {
        let p = SectionPath::parse("financials").unwrap();
        assert_eq!(p.raw_title, "financials");
        assert_eq!(p.title, "Financials");
        assert_eq!(p.key, None);
    }

    #[test]
    fn snake_case_path_normalizes_both_segments() {
        let p = SectionPath::parse("account_overview.client_snapshot").unwrap();
        assert_eq!(p.title, "Account Overview");
        assert_eq!(p.key.as_deref(), Some("Client Snapshot"));

        let q = SectionPath::parse("Account Overview.Client Snapshot").unwrap();
        assert_eq!(q.title, p.title);
        assert_eq!(q.key, p.key);
    }

    #[test]
    fn content_segment_is_skipped() {
        let p = SectionPath::parse("Financials.content.revenue_2024").unwrap();
        assert_eq!(p.key.as_deref(), Some("Revenue 2024"));
    }

    #[test]
    fn lone_content_segment_is_a_key() {
        let p = SectionPath::parse("Financials.content").unwrap();
        assert_eq!(p.key.as_deref(), Some("Content"));
    }

    #[test]
    fn trailing_dot_has_no_key() {
        let p = SectionPath::parse("Financials.").unwrap();
        assert_eq!(p.key, None);
    }

    #[test]
    fn empty_title_is_rejected() {
        assert!(matches!(
            SectionPath::parse(" .key"),
            Err(MergeError::EmptyPath(_))
        ));
    }

    #[test]
    fn resolve_key_matches_existing_spelling() {
        let map = json!({"client_snapshot": "x", "Risks": []});
        let map = map.as_object().unwrap();
        assert_eq!(resolve_key(map, "Client Snapshot"), "client_snapshot");
        assert_eq!(resolve_key(map, "Risks"), "Risks");
        assert_eq!(resolve_key(map, "Opportunities"), "Opportunities");
    }
}
