//! Document merge engine: applies update commands to a [`Plan`].
//!
//! One call to [`apply`] is one update attempt. The plan is snapshotted
//! into history before any command runs, whether or not anything ends up
//! changing. Each command is applied independently; a malformed command is
//! logged and skipped without aborting the rest of the batch.

pub mod command;
pub mod path;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::document::{Plan, Section, SectionContent};

pub use command::{UpdateCommand, UpdateMode, parse_update};
pub use path::{SectionPath, resolve_key};

/// Key used when non-mapping content is converted into a mapping.
pub const GENERAL_KEY: &str = "General";

/// Why a single update command could not be applied.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("update command is not a JSON object")]
    NotAnObject,

    #[error("update command has no section path")]
    MissingSection,

    #[error("section path {0:?} has an empty title")]
    EmptyPath(String),

    #[error("unknown update mode {0:?} (expected replace, append, merge, delete, or move)")]
    UnknownMode(String),

    #[error("invalid move index {0}")]
    InvalidMoveIndex(String),

    #[error("move cannot target a key inside section {0:?}")]
    MoveTargetsKey(String),

    #[error("cannot move missing section {0:?}")]
    MoveMissingSection(String),
}

/// Apply an ordered batch of commands to `plan`.
///
/// Returns whether any section changed. When something changed the
/// research sources section is moved to the end and the plan version is
/// bumped. An empty batch is not an attempt and records nothing.
pub fn apply(plan: &mut Plan, commands: &[UpdateCommand]) -> bool {
    if commands.is_empty() {
        return false;
    }

    plan.record_snapshot();

    let mut changed = false;
    for command in commands {
        match apply_command(plan, command) {
            Ok(true) => {
                tracing::debug!(section = %command.section, mode = %command.mode, "applied update");
                changed = true;
            }
            Ok(false) => {
                tracing::debug!(section = %command.section, mode = %command.mode, "update was a no-op");
            }
            Err(err) => {
                tracing::warn!(
                    section = %command.section,
                    mode = %command.mode,
                    error = %err,
                    "skipping update command"
                );
            }
        }
    }

    if changed {
        plan.relocate_research_sources();
        plan.commit();
    }
    changed
}

/// Apply one command. `Ok(false)` means the command was valid but did not
/// change anything.
fn apply_command(plan: &mut Plan, command: &UpdateCommand) -> Result<bool, MergeError> {
    let path = SectionPath::parse(&command.section)?;
    let content = unwrap_content(command.content.clone());

    match plan.find_section(&path.raw_title) {
        Some(idx) => update_existing(plan, idx, &path, command.mode, content),
        None => create_section(plan, path, command.mode, content),
    }
}

/// Strip a redundant `{"content": ...}` wrapper the model sometimes adds
/// around the value. Applies when the object also has a `title` key or
/// has `content` as its only key.
fn unwrap_content(content: Value) -> Value {
    match content {
        Value::Object(mut map)
            if map.contains_key("content") && (map.contains_key("title") || map.len() == 1) =>
        {
            tracing::debug!("unwrapping nested content object");
            map.remove("content").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn update_existing(
    plan: &mut Plan,
    idx: usize,
    path: &SectionPath,
    mode: UpdateMode,
    content: Value,
) -> Result<bool, MergeError> {
    let key = path.key.as_deref().map(|k| match plan.sections[idx].content.as_map() {
        Some(map) => resolve_key(map, k),
        None => k.to_owned(),
    });

    match mode {
        UpdateMode::Delete => Ok(match key {
            Some(key) => match &mut plan.sections[idx].content {
                SectionContent::Map(map) => map.shift_remove(&key).is_some(),
                _ => false,
            },
            None => {
                plan.sections.remove(idx);
                true
            }
        }),
        UpdateMode::Move => {
            if key.is_some() {
                return Err(MergeError::MoveTargetsKey(plan.sections[idx].title.clone()));
            }
            let target = move_index(&content)?;
            let section = plan.sections.remove(idx);
            let position = target.min(plan.sections.len());
            plan.sections.insert(position, section);
            Ok(position != idx)
        }
        UpdateMode::Replace | UpdateMode::Append | UpdateMode::Merge => {
            let section = &mut plan.sections[idx];
            let before = section.content.clone();
            match key {
                Some(key) => {
                    let map = ensure_map(&mut section.content);
                    update_entry(map, key, mode, content);
                }
                None => {
                    let current = std::mem::take(&mut section.content);
                    section.content = update_content(current, mode, content);
                }
            }
            Ok(section.content != before)
        }
    }
}

fn create_section(
    plan: &mut Plan,
    path: SectionPath,
    mode: UpdateMode,
    content: Value,
) -> Result<bool, MergeError> {
    match mode {
        UpdateMode::Delete => Ok(false),
        UpdateMode::Move => Err(MergeError::MoveMissingSection(path.raw_title)),
        UpdateMode::Replace | UpdateMode::Append | UpdateMode::Merge => {
            let content = match path.key {
                Some(key) => {
                    let mut map = Map::new();
                    map.insert(key, content);
                    SectionContent::Map(map)
                }
                None => SectionContent::from_value(content),
            };
            plan.sections.push(Section::new(path.title, content));
            Ok(true)
        }
    }
}

/// Coerce a move target into a list index. Negative indexes clamp to 0.
fn move_index(content: &Value) -> Result<usize, MergeError> {
    let index = match content {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| MergeError::InvalidMoveIndex(content.to_string()))?;

    Ok(usize::try_from(index.max(0)).unwrap_or(usize::MAX))
}

/// View section content as a mapping, converting it in place if needed.
/// Non-empty content is preserved under [`GENERAL_KEY`].
fn ensure_map(content: &mut SectionContent) -> &mut Map<String, Value> {
    if !matches!(content, SectionContent::Map(_)) {
        let previous = std::mem::take(content);
        let mut map = Map::new();
        if !previous.is_empty() {
            map.insert(GENERAL_KEY.to_owned(), previous.into_value());
        }
        *content = SectionContent::Map(map);
    }
    match content {
        SectionContent::Map(map) => map,
        _ => unreachable!("content was just converted to a map"),
    }
}

fn update_entry(map: &mut Map<String, Value>, key: String, mode: UpdateMode, content: Value) {
    let merged = match mode {
        UpdateMode::Append => append_value(map.get(&key).cloned(), content),
        UpdateMode::Merge => match (map.get(&key).cloned(), content) {
            (Some(Value::Object(mut existing)), Value::Object(incoming)) => {
                existing.extend(incoming);
                Value::Object(existing)
            }
            (_, content) => content,
        },
        _ => content,
    };
    map.insert(key, merged);
}

fn update_content(current: SectionContent, mode: UpdateMode, content: Value) -> SectionContent {
    match (mode, current) {
        (UpdateMode::Append, current) => append_content(current, content),
        (UpdateMode::Merge, SectionContent::Map(mut existing)) => match content {
            Value::Object(incoming) => {
                existing.extend(incoming);
                SectionContent::Map(existing)
            }
            other => SectionContent::from_value(other),
        },
        (_, _) => SectionContent::from_value(content),
    }
}

/// Append rules for a value stored under a mapping key.
///
/// - absent or null: the new value is stored as is
/// - list + list: concatenated in order
/// - list + value: value pushed
/// - string + string: joined with a newline
/// - string + list: the string becomes the first element
/// - anything else: a two-element list `[current, new]`
pub fn append_value(current: Option<Value>, new: Value) -> Value {
    match (current, new) {
        (None | Some(Value::Null), new) => new,
        (Some(Value::Array(mut items)), Value::Array(more)) => {
            items.extend(more);
            Value::Array(items)
        }
        (Some(Value::Array(mut items)), new) => {
            items.push(new);
            Value::Array(items)
        }
        (Some(Value::String(a)), Value::String(b)) => Value::String(format!("{a}\n{b}")),
        (Some(Value::String(a)), Value::Array(more)) => {
            let mut items = Vec::with_capacity(more.len() + 1);
            items.push(Value::String(a));
            items.extend(more);
            Value::Array(items)
        }
        (Some(current), new) => Value::Array(vec![current, new]),
    }
}

/// Append rules for whole-section content. Same as [`append_value`]
/// except that text paragraphs are separated by a blank line, mapping +
/// mapping merges keys, and appending to empty text stores the value.
fn append_content(current: SectionContent, new: Value) -> SectionContent {
    match (current, new) {
        (SectionContent::Text(a), new) if a.is_empty() => SectionContent::from_value(new),
        (SectionContent::Text(a), Value::String(b)) => SectionContent::Text(format!("{a}\n\n{b}")),
        (SectionContent::Map(mut existing), Value::Object(incoming)) => {
            existing.extend(incoming);
            SectionContent::Map(existing)
        }
        (current, new) => SectionContent::from_value(append_value(Some(current.into_value()), new)),
    }
}
