//! The account plan document: a versioned, ordered list of sections.
//!
//! Invariants held by this module:
//! - `version` increases by one on every committed mutation.
//! - History entries are [`PlanSnapshot`]s, which have no history field of
//!   their own, so snapshots can never nest.
//! - Section titles are unique under [`title::titles_match`]; the merge
//!   engine only creates a section when lookup finds no match.

pub mod render;
pub mod title;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use render::render_markdown;
pub use title::{RESEARCH_SOURCES, is_research_sources, loose_key, normalize_title, titles_match};

// ---------------------------------------------------------------------------
// Section content
// ---------------------------------------------------------------------------

/// Content of a section: a string, an ordered list, or an ordered mapping.
///
/// Serialized untagged so stored plans look like plain JSON documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SectionContent {
    Text(String),
    List(Vec<Value>),
    Map(Map<String, Value>),
}

impl SectionContent {
    /// Coerce an arbitrary JSON value into section content.
    ///
    /// Strings, arrays and objects map onto their variants. `null` becomes
    /// empty text; numbers and booleans become their textual form.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s),
            Value::Array(items) => Self::List(items),
            Value::Object(map) => Self::Map(map),
            Value::Null => Self::Text(String::new()),
            other => Self::Text(other.to_string()),
        }
    }

    /// Convert back into a JSON value.
    pub fn into_value(self) -> Value {
        match self {
            Self::Text(s) => Value::String(s),
            Self::List(items) => Value::Array(items),
            Self::Map(map) => Value::Object(map),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(map) => map.is_empty(),
        }
    }

    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl Default for SectionContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<Value> for SectionContent {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

/// A titled unit of the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    #[serde(default)]
    pub content: SectionContent,
}

impl Section {
    pub fn new(title: impl Into<String>, content: SectionContent) -> Self {
        Self {
            title: title.into(),
            content,
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// The plan's own fields, frozen before an update attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSnapshot {
    pub id: Uuid,
    pub user_id: String,
    pub company: String,
    pub goal: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    pub sections: Vec<Section>,
}

/// The versioned account plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: Uuid,
    pub user_id: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub history: Vec<PlanSnapshot>,
}

impl Plan {
    /// Create an empty plan at version 1.
    pub fn new(user_id: impl Into<String>, company: impl Into<String>, goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            company: company.into(),
            goal: goal.into(),
            title: None,
            created_at: now,
            updated_at: now,
            version: 1,
            sections: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Copy of every field except history.
    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            id: self.id,
            user_id: self.user_id.clone(),
            company: self.company.clone(),
            goal: self.goal.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
            sections: self.sections.clone(),
        }
    }

    /// Append the current state to history.
    pub fn record_snapshot(&mut self) {
        let snapshot = self.snapshot();
        self.history.push(snapshot);
    }

    /// Mark a mutation as committed: bump the version and touch `updated_at`.
    pub fn commit(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Set the display title. Returns `false` if the title was already set
    /// to the same value.
    pub fn set_title(&mut self, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() || self.title.as_deref() == Some(title) {
            return false;
        }
        self.record_snapshot();
        self.title = Some(title.to_string());
        self.commit();
        true
    }

    /// Replace the whole document with a client-edited copy.
    ///
    /// The current plan is snapshotted onto the existing history, which is
    /// carried forward; any history on `incoming` is discarded. The version
    /// is forced past the current one when the client did not bump it.
    pub fn replace_with(&mut self, incoming: Plan) {
        let mut history = std::mem::take(&mut self.history);
        history.push(self.snapshot());
        let current_version = self.version;

        *self = Plan { history, ..incoming };
        if self.version <= current_version {
            self.version = current_version + 1;
            self.updated_at = Utc::now();
        }
    }

    /// Locate a section by a raw title.
    ///
    /// Precedence: normalized-title match first, then a case-insensitive
    /// match on the raw title as given.
    pub fn find_section(&self, raw_title: &str) -> Option<usize> {
        let raw = raw_title.trim();
        let normalized = normalize_title(raw).to_lowercase();
        self.sections
            .iter()
            .position(|s| s.title.trim().to_lowercase().replace('_', " ") == normalized)
            .or_else(|| {
                let raw_lower = raw.to_lowercase();
                self.sections
                    .iter()
                    .position(|s| s.title.trim().to_lowercase() == raw_lower)
            })
    }

    pub fn section(&self, raw_title: &str) -> Option<&Section> {
        self.find_section(raw_title).map(|i| &self.sections[i])
    }

    /// Move the research sources section to the end if it is not already
    /// last. Returns whether anything moved.
    pub fn relocate_research_sources(&mut self) -> bool {
        let Some(idx) = self
            .sections
            .iter()
            .position(|s| is_research_sources(&s.title))
        else {
            return false;
        };
        if idx + 1 == self.sections.len() {
            return false;
        }
        let section = self.sections.remove(idx);
        self.sections.push(section);
        true
    }
}
