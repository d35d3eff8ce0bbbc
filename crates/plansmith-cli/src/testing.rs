//! Scripted collaborators for command tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use plansmith_core::message::ChatMessage;
use plansmith_core::research::{PendingResearch, ResearchResult};
use plansmith_core::service::{CompletionError, CompletionService, NoRetrieval, ResearchService};
use plansmith_core::turn::TurnCoordinator;

/// Replies with queued outputs in order, then with a plain reply.
#[derive(Default)]
pub struct Scripted {
    outputs: Mutex<VecDeque<String>>,
}

impl Scripted {
    pub fn new<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outputs: Mutex::new(outputs.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl CompletionService for Scripted {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let next = self.outputs.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| r#"{"reply": "ok", "control": {"action": "NONE"}}"#.into()))
    }
}

pub struct EchoResearch;

#[async_trait]
impl ResearchService for EchoResearch {
    async fn research(&self, pending: &PendingResearch) -> anyhow::Result<ResearchResult> {
        let query = pending.query().to_string();
        Ok(ResearchResult {
            summary: format!("notes on {query}"),
            query,
            ..ResearchResult::default()
        })
    }
}

pub fn coordinator<I, S>(outputs: I) -> Arc<TurnCoordinator>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Arc::new(TurnCoordinator::new(
        Arc::new(Scripted::new(outputs)),
        Arc::new(EchoResearch),
        Arc::new(NoRetrieval),
    ))
}
