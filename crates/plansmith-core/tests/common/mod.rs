//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use plansmith_core::message::ChatMessage;
use plansmith_core::research::{PendingResearch, ResearchResult, Source};
use plansmith_core::service::{
    CompletionError, CompletionService, NoRetrieval, ResearchService, RetrievalService,
};
use plansmith_core::turn::TurnCoordinator;

/// Completion service that replays a fixed list of outputs.
#[derive(Default)]
pub struct ScriptedCompletion {
    outputs: Mutex<VecDeque<Result<String, CompletionError>>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompletion {
    pub fn new<I, S>(outputs: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            outputs: Mutex::new(outputs.into_iter().map(|s| Ok(s.into())).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with_results(outputs: Vec<Result<String, CompletionError>>) -> Arc<Self> {
        Arc::new(Self {
            outputs: Mutex::new(outputs.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, output: impl Into<String>) {
        self.outputs.lock().unwrap().push_back(Ok(output.into()));
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Parsed context bundle of the given call.
    pub fn context_of(&self, call: usize) -> Value {
        let calls = self.calls();
        let text = calls[call][1]
            .content
            .strip_prefix("Current plan & research (JSON): ")
            .expect("second message carries the context bundle");
        serde_json::from_str(text).expect("context bundle is JSON")
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::Unavailable("script exhausted".into())))
    }
}

/// Research service that records requests and answers with canned results.
#[derive(Default)]
pub struct ScriptedResearch {
    requests: Mutex<Vec<PendingResearch>>,
    failures: Mutex<VecDeque<bool>>,
}

impl ScriptedResearch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next call fail.
    pub fn fail_next(&self) {
        self.failures.lock().unwrap().push_back(true);
    }

    pub fn requests(&self) -> Vec<PendingResearch> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResearchService for ScriptedResearch {
    async fn research(&self, request: &PendingResearch) -> anyhow::Result<ResearchResult> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failures.lock().unwrap().pop_front().unwrap_or(false) {
            anyhow::bail!("search backend timed out");
        }
        let query = request.query().to_string();
        Ok(ResearchResult {
            summary: format!("Findings for {query}"),
            key_points: vec![format!("Point about {query}")],
            sources: vec![Source {
                title: format!("Source for {query}"),
                url: format!("https://example.com/{}", query.replace(' ', "-")),
                snippet: String::new(),
            }],
            conflicts: Vec::new(),
            error: None,
            query,
        })
    }
}

/// Retrieval that echoes a fixed context and counts calls.
#[derive(Default)]
pub struct RecordingRetrieval {
    pub queries: Mutex<Vec<String>>,
}

#[async_trait]
impl RetrievalService for RecordingRetrieval {
    async fn query(&self, text: &str) -> anyhow::Result<String> {
        self.queries.lock().unwrap().push(text.to_string());
        Ok("Acme sells rockets.".to_string())
    }
}

pub struct FailingRetrieval;

#[async_trait]
impl RetrievalService for FailingRetrieval {
    async fn query(&self, _text: &str) -> anyhow::Result<String> {
        anyhow::bail!("vector index offline")
    }
}

pub fn coordinator(
    completion: &Arc<ScriptedCompletion>,
    research: &Arc<ScriptedResearch>,
) -> TurnCoordinator {
    TurnCoordinator::new(completion.clone(), research.clone(), Arc::new(NoRetrieval))
}

/// A protocol-conformant model output.
pub fn directive(reply: &str, control: Value, update: Value) -> String {
    json!({"reply": reply, "control": control, "update": update}).to_string()
}

pub fn none() -> Value {
    json!({"action": "NONE", "research_query": ""})
}
