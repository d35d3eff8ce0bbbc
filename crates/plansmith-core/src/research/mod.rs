//! Research data and the per-session orchestration state machine.

pub mod state;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use state::{ResearchPhase, ResearchPlanStatus, ResearchRun, ResearchState};

/// One step of a multi-step research plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchTask {
    pub task: String,
}

impl ResearchTask {
    pub fn new(task: impl Into<String>) -> Self {
        Self { task: task.into() }
    }

    /// Accept `{"task": "..."}` or a bare string.
    pub fn from_value(value: &Value) -> Option<Self> {
        let text = match value {
            Value::String(s) => s.as_str(),
            Value::Object(map) => map.get("task").and_then(Value::as_str)?,
            _ => return None,
        };
        let text = text.trim();
        (!text.is_empty()).then(|| Self::new(text))
    }
}

/// Whether research runs as a one-off lookup or as an approved plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchMode {
    #[default]
    Single,
    Multi,
}

/// A cited source of a research result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default = "Source::default_title")]
    pub title: String,
    #[serde(default = "Source::default_url")]
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

impl Source {
    fn default_title() -> String {
        "Source".to_string()
    }

    fn default_url() -> String {
        "#".to_string()
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "title": self.title,
            "url": self.url,
            "snippet": self.snippet,
        })
    }
}

/// Output of one research execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchResult {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    /// Set when the research call failed; such a result carries no sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResearchResult {
    pub fn failed(query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The next unit of research the coordinator should execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingResearch {
    /// A one-off lookup requested by `CALL_RESEARCH`.
    Query {
        query: String,
        target_section: Option<String>,
    },
    /// The current step of an approved plan.
    Step {
        run_id: Uuid,
        index: usize,
        tasks: Vec<ResearchTask>,
    },
}

impl PendingResearch {
    /// Text describing what is being researched.
    pub fn query(&self) -> &str {
        match self {
            Self::Query { query, .. } => query,
            Self::Step { index, tasks, .. } => tasks.get(*index).map(|t| t.task.as_str()).unwrap_or(""),
        }
    }
}
