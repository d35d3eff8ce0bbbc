//! Collaborator interfaces the turn coordinator talks to.
//!
//! Each collaborator is an object-safe async trait so the coordinator can
//! hold it as `Arc<dyn ...>` and tests can substitute scripted fakes.

pub mod openai;
pub mod researcher;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::ChatMessage;
use crate::research::{PendingResearch, ResearchResult};

pub use openai::OpenAiCompletion;
pub use researcher::CompletionResearcher;

/// Failure of a completion call.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("completion endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion response contained no message content")]
    EmptyResponse,

    #[error("completion service unavailable: {0}")]
    Unavailable(String),
}

/// A language-model completion endpoint.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Complete a role-tagged conversation and return the raw text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;
}

/// Executes one unit of research: a single-shot query or one plan step.
#[async_trait]
pub trait ResearchService: Send + Sync {
    async fn research(&self, request: &PendingResearch) -> anyhow::Result<ResearchResult>;
}

/// Advisory context lookup for a user message.
#[async_trait]
pub trait RetrievalService: Send + Sync {
    async fn query(&self, text: &str) -> anyhow::Result<String>;
}

/// Retrieval that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetrieval;

#[async_trait]
impl RetrievalService for NoRetrieval {
    async fn query(&self, _text: &str) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

const _: () = {
    fn _assert_object_safe(
        _: &dyn CompletionService,
        _: &dyn ResearchService,
        _: &dyn RetrievalService,
    ) {
    }
};
