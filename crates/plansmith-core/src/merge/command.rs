//! Update commands and their lenient construction from model output.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::MergeError;

/// How an update command combines its content with the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    #[default]
    Replace,
    Append,
    Merge,
    Delete,
    Move,
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Merge => "merge",
            Self::Delete => "delete",
            Self::Move => "move",
        };
        f.write_str(s)
    }
}

impl FromStr for UpdateMode {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            "merge" => Ok(Self::Merge),
            "delete" => Ok(Self::Delete),
            "move" => Ok(Self::Move),
            other => Err(MergeError::UnknownMode(other.to_owned())),
        }
    }
}

/// One instruction to mutate a section.
///
/// `section` is a dot path: `<title>[.<key>]` or `<title>.content.<key>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCommand {
    pub section: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub mode: UpdateMode,
}

impl UpdateCommand {
    pub fn new(section: impl Into<String>, content: Value, mode: UpdateMode) -> Self {
        Self {
            section: section.into(),
            content,
            mode,
        }
    }

    /// Build a command from one JSON object of the model's `update` field.
    ///
    /// A missing `mode` means replace; a missing `content` means null.
    pub fn from_value(value: &Value) -> Result<Self, MergeError> {
        let obj = value.as_object().ok_or(MergeError::NotAnObject)?;

        let section = obj
            .get("section")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(MergeError::MissingSection)?;

        let mode = match obj.get("mode") {
            None | Some(Value::Null) => UpdateMode::Replace,
            Some(Value::String(s)) => s.parse()?,
            Some(other) => return Err(MergeError::UnknownMode(other.to_string())),
        };

        Ok(Self {
            section: section.to_owned(),
            content: obj.get("content").cloned().unwrap_or(Value::Null),
            mode,
        })
    }
}

/// Turn the model's `update` field into an ordered list of commands.
///
/// `null` yields nothing, an object yields one command, an array yields one
/// command per element. Malformed elements are logged and dropped so the
/// rest of the batch still applies.
pub fn parse_update(value: &Value) -> Vec<UpdateCommand> {
    let items: Vec<&Value> = match value {
        Value::Null => return Vec::new(),
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![value],
        other => {
            tracing::warn!(update = %other, "ignoring update that is neither object nor array");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match UpdateCommand::from_value(item) {
            Ok(cmd) => Some(cmd),
            Err(err) => {
                tracing::warn!(error = %err, command = %item, "skipping malformed update command");
                None
            }
        })
        .collect()
}
