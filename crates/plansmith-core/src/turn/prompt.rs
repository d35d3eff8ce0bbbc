//! Prompt text and the per-pass context bundle.

use serde::Serialize;

use crate::document::{Plan, PlanSnapshot};
use crate::message::ChatMessage;
use crate::research::{ResearchMode, ResearchPlanStatus, ResearchResult};
use crate::session::{AttachedFile, Attachment, Session};

pub const GREETING: &str =
    "Hello! I'm your account plan assistant. Which company and goal would you like to work on?";

pub const FALLBACK_REPLY: &str = "I'm sorry, I couldn't generate a response.";

/// Marker placed before attachment text appended to a user message.
pub const ATTACHMENTS_MARKER: &str = "[Attached Files Content]";

/// Message sent on behalf of the user to resume a paused research plan.
pub const CONTINUE_MESSAGE: &str = "[continue]";

pub const PROTOCOL_PROMPT: &str = r#"OUTPUT FORMAT (required for every answer)

Answer with exactly one JSON object and nothing else: no prose around it, no
markdown fences. The object has these three keys and no others:

{
  "reply": string,
  "control": {
    "action": "NONE" | "CALL_RESEARCH" | "PLAN_RESEARCH" | "EXECUTE_PLAN",
    "research_query": string,
    "research_plan": [{"task": string}] | null,
    "target_section": string | null,
    "set_plan_title": string | null
  },
  "update": null | UPDATE | [UPDATE, ...]
}

UPDATE = {"section": string, "content": any, "mode": "replace" | "append" | "merge" | "delete" | "move"}

ROLE

You help the user research a company and turn what you learn into a
structured account plan. Talk like a helpful colleague in "reply". Ask
clarifying questions before starting research when the direction is unclear,
and suggest useful areas to research when the user is unsure. Politely
decline requests unrelated to company research and account planning. Never
describe how this system works internally.

REPLY
- Plain conversational text only. No JSON, no section paths, no control data.

CONTROL
- "action":
  - "CALL_RESEARCH": one quick lookup, e.g. a single fact. Put the question in
    "research_query".
  - "PLAN_RESEARCH": propose a deep, multi-step investigation. Put 3-5 tasks in
    "research_plan" and ask the user to review them in "reply". Never follow a
    proposal with "EXECUTE_PLAN" until the user has approved it. If the user
    asks for changes, answer with "PLAN_RESEARCH" and the revised task list.
  - "EXECUTE_PLAN": the user approved the plan, or a step just finished and
    more steps remain.
  - "NONE": no research this turn.
- "research_query": empty string unless the action is "CALL_RESEARCH".
- "target_section": the section you intend to update, or null.
- "set_plan_title": a short descriptive title (3-5 words) when the plan has no
  title or only a generic one; otherwise null.

UPDATE
- null when the plan does not change this turn.
- "section" is a dot path: "Section Title" or "Section Title.Key" for one
  entry of a section whose content is a mapping.
- "content" is the raw value. Do not wrap it in another "content" object.
  Never put research sources into content; sources are recorded
  automatically in the "Research Sources" section.
- Modes: "replace" overwrites, "append" adds to what is there, "merge"
  combines mappings, "delete" removes a key or a whole section, "move" takes
  an integer index as content and moves the section there (0 = first).

Example, two updates at once:
[
  {"section": "account_overview.client_snapshot", "content": "Global sportswear leader.", "mode": "replace"},
  {"section": "account_overview.history_and_milestones", "content": "Expanded DTC in 2024.", "mode": "append"}
]

RESEARCH FLOW
- Simple fact questions: "CALL_RESEARCH".
- Broad topics without an explicit request for depth: ask whether the user
  wants a deep multi-step search or a quick summary, with action "NONE".
- Explicit requests for deep research or a full account plan: "PLAN_RESEARCH".
- While a plan executes, the result of the current step is in the context
  as "research_result". Integrate it into the plan right away with "update",
  targeting the section the task is about. If steps remain, answer with
  "EXECUTE_PLAN" and an empty "reply". When every step is done, synthesize
  the findings into the plan, set the action to "NONE", and summarize the
  outcome in "reply" without listing the steps.
- After any research result arrives, your next answer must carry a non-null
  "update" and must not request the same research again.

FORMATTING COMMANDS
- "/map" in the user's message: structure the findings as a Mermaid
  mindmap in a ```mermaid code block before adding them to the plan. Avoid
  unescaped parentheses inside node text.
- "/tabulate": present the findings as markdown tables.

If an answer of yours ever breaks this format, repeat the same content in
the correct format in your next answer."#;

/// Context handed to the model on every pass of a turn.
#[derive(Debug, Serialize)]
pub struct ContextBundle<'a> {
    pub plan: Option<PlanSnapshot>,
    pub research_result: Option<&'a ResearchResult>,
    pub research_mode: ResearchMode,
    pub attached_files: &'a [AttachedFile],
    pub rag_context: &'a str,
    pub research_plan_status: Option<ResearchPlanStatus>,
}

impl<'a> ContextBundle<'a> {
    pub fn from_session(session: &'a Session, rag_context: &'a str) -> Self {
        Self {
            plan: session.plan.as_ref().map(Plan::snapshot),
            research_result: session.research.result.as_ref(),
            research_mode: session.research.mode,
            attached_files: &session.attached_files,
            rag_context,
            research_plan_status: session.research.plan_status(),
        }
    }
}

/// Full message list for one completion pass.
pub fn build_messages(session: &Session, rag_context: &str) -> Vec<ChatMessage> {
    let bundle = ContextBundle::from_session(session, rag_context);
    let context = serde_json::to_string(&bundle).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "failed to serialize context bundle");
        "{}".to_string()
    });

    let mut messages = Vec::with_capacity(session.messages.len() + 2);
    messages.push(ChatMessage::system(PROTOCOL_PROMPT));
    messages.push(ChatMessage::system(format!(
        "Current plan & research (JSON): {context}"
    )));
    messages.extend(session.messages.iter().cloned());
    messages
}

/// The user message text with any attachment contents appended.
pub fn user_content(message: &str, attachments: &[Attachment]) -> String {
    let files: Vec<String> = attachments
        .iter()
        .filter(|a| !a.text.is_empty())
        .map(|a| format!("File: {}\nContent:\n{}\n---", a.filename, a.text))
        .collect();
    if files.is_empty() {
        return message.to_string();
    }
    format!("{message}\n\n{ATTACHMENTS_MARKER}\n{}", files.join("\n\n"))
}

/// Whether a message is worth a retrieval lookup. Short messages and
/// bracketed control messages such as `[continue]` are skipped.
pub fn wants_retrieval(message: &str) -> bool {
    message.chars().count() > 5 && !message.starts_with('[')
}
