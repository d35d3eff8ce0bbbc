//! Contract parser: recovers `{reply, control, update}` from model output.
//!
//! Recovery order:
//! 1. The whole text as JSON.
//! 2. The substring between the first `{` and the last `}`.
//! 3. A recovered object carrying `reply`, `control` or `update` is a
//!    directive; its fields are read with defaults.
//! 4. Any other recovered object or array is treated as an implicit merge
//!    into the section named by a short line of text preceding it.
//! 5. Otherwise the raw text is the reply and nothing is changed.
//!
//! Only outcome 5 is a protocol violation worth a correction retry; see
//! [`retry`].

pub mod retry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::merge::{UpdateCommand, UpdateMode, parse_update};
use crate::research::ResearchTask;

pub use retry::{ContractOutput, RetryPolicy, complete_with_retry};

/// Longest preamble that is still taken as a section title.
const MAX_IMPLICIT_TITLE_CHARS: usize = 100;

/// Research action requested by the model for this turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    #[default]
    None,
    CallResearch,
    PlanResearch,
    ExecutePlan,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::CallResearch => "CALL_RESEARCH",
            Self::PlanResearch => "PLAN_RESEARCH",
            Self::ExecutePlan => "EXECUTE_PLAN",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" | "" => Ok(Self::None),
            "CALL_RESEARCH" => Ok(Self::CallResearch),
            "PLAN_RESEARCH" => Ok(Self::PlanResearch),
            "EXECUTE_PLAN" => Ok(Self::ExecutePlan),
            other => Err(format!("unknown action {other:?}")),
        }
    }
}

/// The `control` object of a directive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlDirective {
    pub action: Action,
    pub research_query: String,
    pub research_plan: Vec<ResearchTask>,
    pub target_section: Option<String>,
    pub set_plan_title: Option<String>,
}

impl ControlDirective {
    /// Read a `control` object leniently. Unknown actions become
    /// [`Action::None`]; wrong-typed fields fall back to their defaults.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };

        let action = match obj.get("action").and_then(Value::as_str) {
            Some(raw) => raw.parse().unwrap_or_else(|err: String| {
                tracing::warn!(error = %err, "treating unknown action as NONE");
                Action::None
            }),
            None => Action::None,
        };

        let research_plan = obj
            .get("research_plan")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(ResearchTask::from_value).collect())
            .unwrap_or_default();

        Self {
            action,
            research_query: obj
                .get("research_query")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            research_plan,
            target_section: non_empty_str(obj.get("target_section")),
            set_plan_title: non_empty_str(obj.get("set_plan_title")),
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// How a piece of model output was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A directive-shaped object was recovered.
    Directive,
    /// Bare JSON preceded by a short title, applied as a merge.
    ImplicitUpdate,
    /// JSON was recovered but could not be interpreted.
    Unstructured,
    /// No JSON object or array could be recovered.
    Failed,
}

/// A parsed model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTurn {
    pub reply: String,
    pub control: ControlDirective,
    pub updates: Vec<UpdateCommand>,
    /// The output carried a non-empty update, even if every command in it
    /// was dropped as malformed.
    pub update_submitted: bool,
    pub outcome: ParseOutcome,
}

impl ParsedTurn {
    /// Degraded result: the raw text is the reply, nothing else happens.
    fn raw(text: &str, outcome: ParseOutcome) -> Self {
        Self {
            reply: text.to_string(),
            control: ControlDirective::default(),
            updates: Vec::new(),
            update_submitted: false,
            outcome,
        }
    }

    pub fn is_parse_failure(&self) -> bool {
        self.outcome == ParseOutcome::Failed
    }
}

/// Recover a JSON object or array from `text`.
pub fn recover_json(text: &str) -> Option<Value> {
    let structured = |v: &Value| v.is_object() || v.is_array();

    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        if structured(&value) {
            return Some(value);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(structured)
}

fn is_directive(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| ["reply", "control", "update"].iter().any(|k| obj.contains_key(*k)))
}

/// Parse one piece of model output.
pub fn parse(text: &str) -> ParsedTurn {
    let Some(value) = recover_json(text) else {
        tracing::debug!(output = %text, "model output contained no JSON");
        return ParsedTurn::raw(text, ParseOutcome::Failed);
    };

    if is_directive(&value) {
        return ParsedTurn {
            reply: reply_field(&value),
            control: value
                .get("control")
                .map(ControlDirective::from_value)
                .unwrap_or_default(),
            updates: parse_update(value.get("update").unwrap_or(&Value::Null)),
            update_submitted: value.get("update").is_some_and(has_update_payload),
            outcome: ParseOutcome::Directive,
        };
    }

    match implicit_title(text, &value) {
        Some(title) => {
            tracing::debug!(section = %title, "treating bare JSON as an implicit update");
            ParsedTurn {
                reply: format!("I've updated the {title} section."),
                control: ControlDirective::default(),
                updates: vec![UpdateCommand::new(title, value, UpdateMode::Merge)],
                update_submitted: true,
                outcome: ParseOutcome::ImplicitUpdate,
            }
        }
        None => ParsedTurn::raw(text, ParseOutcome::Unstructured),
    }
}

fn has_update_payload(update: &Value) -> bool {
    match update {
        Value::Object(obj) => !obj.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => false,
    }
}

fn reply_field(value: &Value) -> String {
    match value.get("reply") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Text before the opening delimiter of `value`, when short enough to be a
/// section title.
fn implicit_title(text: &str, value: &Value) -> Option<String> {
    let delimiter = if value.is_object() { '{' } else { '[' };
    let start = text.find(delimiter)?;
    let title = text[..start].trim();
    (!title.is_empty() && title.chars().count() < MAX_IMPLICIT_TITLE_CHARS).then(|| title.to_string())
}

/// The user-facing text of an assistant message.
///
/// Unwraps the `reply` field while the text (or its outermost braces)
/// parses as an object with one, so a reply that itself quotes a reply
/// object is unwrapped too. Text with no such object comes back unchanged.
/// Idempotent: applying it to its own output returns the same text.
pub fn extract_reply(content: &str) -> String {
    let mut current = content.to_string();
    // Each unwrap must shrink the text, which bounds the loop.
    while let Some(next) = reply_of_outermost(&current) {
        if next.len() >= current.len() {
            break;
        }
        current = next;
    }
    current
}

fn reply_of_outermost(content: &str) -> Option<String> {
    let reply_of = |candidate: &str| {
        serde_json::from_str::<Value>(candidate)
            .ok()
            .and_then(|v| v.get("reply").cloned())
            .map(|reply| match reply {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            })
    };

    if let Some(reply) = reply_of(content) {
        return Some(reply);
    }
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if start >= end {
        return None;
    }
    reply_of(&content[start..=end])
}

/// Build a protocol-conformant output. Used by fakes and by the greeting.
pub fn directive_json(reply: &str, action: Action, update: Value) -> String {
    json!({
        "reply": reply,
        "control": {
            "action": action.as_str(),
            "research_query": "",
            "research_plan": null,
            "target_section": null,
            "set_plan_title": null,
        },
        "update": update,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_directive() {
        let turn = parse(
            r#"{"reply":"hi","control":{"action":"NONE","research_query":""},"update":null}"#,
        );
        assert_eq!(turn.outcome, ParseOutcome::Directive);
        assert_eq!(turn.reply, "hi");
        assert_eq!(turn.control.action, Action::None);
        assert!(turn.updates.is_empty());
    }

    #[test]
    fn recovers_directive_after_prose() {
        let turn = parse("Some intro\n{\"reply\":\"hi\",\"control\":{\"action\":\"NONE\"}}");
        assert_eq!(turn.outcome, ParseOutcome::Directive);
        assert_eq!(turn.reply, "hi");
        assert_eq!(turn.control.action, Action::None);
    }

    #[test]
    fn recovers_directive_inside_code_fence() {
        let turn = parse("```json\n{\"reply\":\"ok\",\"update\":{\"section\":\"A\",\"content\":\"x\"}}\n```");
        assert_eq!(turn.reply, "ok");
        assert_eq!(turn.updates.len(), 1);
        assert_eq!(turn.updates[0].mode, UpdateMode::Replace);
    }

    #[test]
    fn malformed_text_is_a_failure() {
        let text = "Sorry, here's your update: {bad json";
        let turn = parse(text);
        assert!(turn.is_parse_failure());
        assert_eq!(turn.reply, text);
        assert_eq!(turn.control.action, Action::None);
        assert!(turn.updates.is_empty());
    }

    #[test]
    fn scalar_json_is_a_failure() {
        assert!(parse("42").is_parse_failure());
        assert!(parse("\"just a string\"").is_parse_failure());
    }

    #[test]
    fn control_fields_read_with_defaults() {
        let turn = parse(
            r#"{"reply":"Plan ready","control":{"action":"PLAN_RESEARCH",
                "research_plan":[{"task":"Revenue"},"Competitors",{"x":1}],
                "target_section":"","set_plan_title":" Nike Deep Dive "}}"#,
        );
        assert_eq!(turn.control.action, Action::PlanResearch);
        assert_eq!(turn.control.research_query, "");
        let tasks: Vec<&str> = turn.control.research_plan.iter().map(|t| t.task.as_str()).collect();
        assert_eq!(tasks, ["Revenue", "Competitors"]);
        assert_eq!(turn.control.target_section, None);
        assert_eq!(turn.control.set_plan_title.as_deref(), Some("Nike Deep Dive"));
    }

    #[test]
    fn unknown_action_becomes_none() {
        let turn = parse(r#"{"reply":"x","control":{"action":"SEARCH_WEB"}}"#);
        assert_eq!(turn.control.action, Action::None);
    }

    #[test]
    fn action_is_case_insensitive() {
        let turn = parse(r#"{"control":{"action":"execute_plan"}}"#);
        assert_eq!(turn.control.action, Action::ExecutePlan);
        assert_eq!(turn.reply, "");
    }

    #[test]
    fn update_array_is_ordered() {
        let turn = parse(
            r#"{"reply":"","control":{"action":"NONE"},"update":[
                {"section":"a","content":1,"mode":"append"},
                {"section":"b","content":2,"mode":"merge"}]}"#,
        );
        let modes: Vec<UpdateMode> = turn.updates.iter().map(|u| u.mode).collect();
        assert_eq!(modes, [UpdateMode::Append, UpdateMode::Merge]);
    }

    #[test]
    fn dropped_update_still_counts_as_submitted() {
        let turn = parse(r#"{"reply":"ok","control":{"action":"NONE"},"update":{"content":"x","mode":"replace"}}"#);
        assert!(turn.updates.is_empty());
        assert!(turn.update_submitted);

        let turn = parse(r#"{"reply":"ok","update":[]}"#);
        assert!(!turn.update_submitted);
        let turn = parse(r#"{"reply":"ok","update":null}"#);
        assert!(!turn.update_submitted);
        assert!(!parse("plain").update_submitted);
    }

    #[test]
    fn titled_bare_object_becomes_merge_update() {
        let turn = parse("Financials\n{\"Revenue\": \"$51B\"}");
        assert_eq!(turn.outcome, ParseOutcome::ImplicitUpdate);
        assert_eq!(turn.reply, "I've updated the Financials section.");
        assert_eq!(turn.updates.len(), 1);
        assert_eq!(turn.updates[0].section, "Financials");
        assert_eq!(turn.updates[0].mode, UpdateMode::Merge);
        assert_eq!(turn.updates[0].content, json!({"Revenue": "$51B"}));
    }

    #[test]
    fn bare_array_is_unstructured() {
        let turn = parse("[\"FX\", \"Supply\"]");
        assert_eq!(turn.outcome, ParseOutcome::Unstructured);
        assert!(turn.updates.is_empty());
    }

    #[test]
    fn untitled_bare_object_is_unstructured() {
        let text = "{\"Revenue\": 1}";
        let turn = parse(text);
        assert_eq!(turn.outcome, ParseOutcome::Unstructured);
        assert!(!turn.is_parse_failure());
        assert_eq!(turn.reply, text);
        assert!(turn.updates.is_empty());
    }

    #[test]
    fn long_preamble_is_not_a_title() {
        let text = format!("{} {{\"k\": 1}}", "x".repeat(120));
        let turn = parse(&text);
        assert_eq!(turn.outcome, ParseOutcome::Unstructured);
        assert_eq!(turn.reply, text);
    }

    #[test]
    fn extract_reply_variants() {
        assert_eq!(extract_reply(r#"{"reply":"hello"}"#), "hello");
        assert_eq!(extract_reply("prefix {\"reply\":\"x\"} suffix"), "x");
        assert_eq!(extract_reply("plain text"), "plain text");
        assert_eq!(extract_reply("{\"other\":1}"), "{\"other\":1}");
        assert_eq!(extract_reply(r#"{"reply":"Use {\"reply\": \"x\"} as the format"}"#), "x");
        assert_eq!(extract_reply(r#"{"reply":""}"#), "");
    }

    #[test]
    fn extract_reply_is_idempotent() {
        for input in [
            r#"{"reply":"hello","control":{"action":"NONE"}}"#,
            "plain",
            "{broken",
            "Intro {\"reply\":\"Done.\"} trailing",
            r#"{"reply":"Use {\"reply\": \"x\"} as the format"}"#,
            r#"{"reply":{"reply":"nested"}}"#,
        ] {
            let once = extract_reply(input);
            assert_eq!(extract_reply(&once), once);
        }
    }

    #[test]
    fn directive_json_round_trips_through_parse() {
        let text = directive_json("hi", Action::CallResearch, Value::Null);
        let turn = parse(&text);
        assert_eq!(turn.reply, "hi");
        assert_eq!(turn.control.action, Action::CallResearch);
    }
}
