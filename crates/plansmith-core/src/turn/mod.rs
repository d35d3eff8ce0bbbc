//! Turn coordinator: one inbound message to one outbound reply.
//!
//! A turn is a short loop of passes. Each pass asks the model for a
//! directive, applies its updates, and feeds its control block to the
//! research state machine. When the machine asks for research, one
//! research call runs and another pass follows so the model can integrate
//! the result. The loop stops when no research is needed, when the machine
//! pauses, or when the per-turn step budget is spent.

pub mod prompt;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{Action, RetryPolicy, complete_with_retry};
use crate::document::{Plan, RESEARCH_SOURCES};
use crate::merge::{self, UpdateCommand, UpdateMode};
use crate::message::ChatMessage;
use crate::progress::{self, Progress};
use crate::research::{ResearchMode, ResearchResult, ResearchTask};
use crate::service::{CompletionService, ResearchService, RetrievalService};
use crate::session::{AttachedFile, Attachment, Session, SessionStore};

pub use prompt::{CONTINUE_MESSAGE, FALLBACK_REPLY, GREETING};

pub const DEFAULT_MAX_RESEARCH_STEPS: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct TurnConfig {
    /// Research executions allowed per turn, whatever the model asks for.
    pub max_research_steps: u32,
    pub retry: RetryPolicy,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_research_steps: DEFAULT_MAX_RESEARCH_STEPS,
            retry: RetryPolicy::default(),
        }
    }
}

/// An inbound chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnRequest {
    pub user_id: String,
    pub message: String,
    pub attachments: Vec<Attachment>,
}

impl TurnRequest {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            message: message.into(),
            attachments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStatus {
    Idle,
    Researching,
    Done,
}

/// What a caller gets back from a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub reply: String,
    pub plan: Option<Plan>,
    pub messages: Vec<ChatMessage>,
    pub research_status: ResearchStatus,
    pub new_version_created: bool,
    pub progress: Option<Progress>,
    /// The research plan awaiting approval, if any.
    #[serde(rename = "researchPlan")]
    pub proposed_research_plan: Option<Vec<ResearchTask>>,
    pub attached_files: Vec<AttachedFile>,
}

impl TurnOutcome {
    /// Whether the turn stopped between plan steps and expects a resume.
    pub fn is_paused(&self) -> bool {
        self.research_status == ResearchStatus::Researching
    }
}

pub struct TurnCoordinator {
    completion: Arc<dyn CompletionService>,
    research: Arc<dyn ResearchService>,
    retrieval: Arc<dyn RetrievalService>,
    config: TurnConfig,
}

impl TurnCoordinator {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        research: Arc<dyn ResearchService>,
        retrieval: Arc<dyn RetrievalService>,
    ) -> Self {
        Self {
            completion,
            research,
            retrieval,
            config: TurnConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TurnConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// Load the session, run a turn, and store the result.
    ///
    /// A failure to store is logged; the caller still receives the outcome.
    /// Callers that allow concurrent requests for one session id must hold
    /// that session's lock around this call.
    pub async fn handle(
        &self,
        store: &dyn SessionStore,
        session_id: &str,
        request: TurnRequest,
    ) -> Result<TurnOutcome> {
        let mut session = store
            .get(session_id)
            .await
            .with_context(|| format!("failed to load session {session_id}"))?
            .unwrap_or_else(|| {
                tracing::info!(session_id, "starting new session");
                Session::new(request.user_id.clone())
            });

        let outcome = self.run_turn(&mut session, request).await;

        if let Err(err) = store.put(session_id, &session).await {
            tracing::warn!(session_id, error = %format!("{err:#}"), "failed to persist session");
        }
        Ok(outcome)
    }

    /// Run one turn against an in-memory session.
    pub async fn run_turn(&self, session: &mut Session, request: TurnRequest) -> TurnOutcome {
        session.user_id = request.user_id.clone();
        session.plan_mut();

        if session.messages.is_empty() && request.message.trim().is_empty() {
            session.messages.push(ChatMessage::assistant(GREETING));
            session.research.research_needed = false;
            session.research.last_action = Action::None;
            session.touch();
            return self.outcome(session, GREETING.to_string(), false);
        }

        let start_version = session.plan.as_ref().map_or(0, |p| p.version);

        session.research.begin_turn();
        session.attach(&request.attachments);
        session.messages.push(ChatMessage::user(prompt::user_content(
            &request.message,
            &request.attachments,
        )));

        let rag_context = self.retrieve(&request.message).await;
        let mut reply = FALLBACK_REPLY.to_string();

        for pass in 1u32.. {
            let messages = prompt::build_messages(session, &rag_context);
            let output = match complete_with_retry(self.completion.as_ref(), &messages, &self.config.retry).await {
                Ok(output) => output,
                Err(err) => {
                    tracing::warn!(pass, error = %err, "completion failed");
                    break;
                }
            };
            tracing::debug!(pass, attempts = output.attempts, output = %output.raw, "model output");

            session.messages.push(ChatMessage::assistant(output.raw));
            let parsed = output.parsed;
            reply = parsed.reply;

            let plan = session.plan_mut();
            if !parsed.updates.is_empty() {
                merge::apply(plan, &parsed.updates);
            } else if parsed.update_submitted {
                tracing::warn!(pass, "update carried no usable commands");
                plan.record_snapshot();
            }
            if let Some(title) = &parsed.control.set_plan_title {
                plan.set_title(title);
            }

            tracing::info!(pass, action = %parsed.control.action, updates = parsed.updates.len(), "applied directive");
            session.research.apply_directive(&parsed.control);

            if !session.research.research_needed {
                break;
            }
            if session.research.steps_in_current_turn >= self.config.max_research_steps {
                tracing::warn!(
                    steps = session.research.steps_in_current_turn,
                    "research step budget spent; pausing turn"
                );
                session.research.research_needed = false;
                session.research.continue_after_pause = true;
                break;
            }
            let Some(pending) = session.research.pending() else {
                tracing::warn!(mode = ?session.research.mode, "research requested but nothing is pending");
                session.research.research_needed = false;
                break;
            };

            let result = match self.research.research(&pending).await {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(query = pending.query(), error = %format!("{err:#}"), "research failed");
                    ResearchResult::failed(pending.query(), format!("{err:#}"))
                }
            };
            tracing::info!(step = session.research.steps_in_current_turn + 1, query = pending.query(), "research step finished");
            session.research.record(&pending, result);
            self.record_sources(session);
        }

        session.touch();
        let version_now = session.plan.as_ref().map_or(0, |p| p.version);
        self.outcome(session, reply, version_now > start_version)
    }

    async fn retrieve(&self, message: &str) -> String {
        if !prompt::wants_retrieval(message) {
            return String::new();
        }
        match self.retrieval.query(message).await {
            Ok(context) => context,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "retrieval failed");
                String::new()
            }
        }
    }

    /// Append the current result's sources to the plan and strip them from
    /// the result, so the model sees findings but not citations.
    fn record_sources(&self, session: &mut Session) {
        let sources = session.research.take_sources();
        if sources.is_empty() {
            return;
        }
        let content = Value::Array(sources.iter().map(|s| s.to_value()).collect());
        let command = UpdateCommand::new(RESEARCH_SOURCES, content, UpdateMode::Append);
        merge::apply(session.plan_mut(), &[command]);
    }

    fn outcome(&self, session: &Session, reply: String, new_version_created: bool) -> TurnOutcome {
        let research = &session.research;
        let research_status = if research.is_researching() {
            ResearchStatus::Researching
        } else if research.last_action == Action::CallResearch
            || (research.mode == ResearchMode::Single && research.result.is_some())
        {
            ResearchStatus::Done
        } else {
            ResearchStatus::Idle
        };

        TurnOutcome {
            reply,
            plan: session.plan.clone(),
            messages: session.display_messages(),
            research_status,
            new_version_created,
            progress: progress::project(research),
            proposed_research_plan: research.proposed_plan().map(<[ResearchTask]>::to_vec),
            attached_files: session.attached_files.clone(),
        }
    }
}
