//! Research executed by asking the completion service for a report.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::{CompletionService, ResearchService};
use crate::contract::recover_json;
use crate::message::ChatMessage;
use crate::research::{PendingResearch, ResearchResult, Source};

const RESEARCH_PROMPT: &str = "You are a company research analyst. Investigate the request \
and answer with ONLY a JSON object of the form \
{\"summary\": string, \"key_points\": [string], \
\"sources\": [{\"title\": string, \"url\": string, \"snippet\": string}], \
\"conflicts\": [string]}. List in \"conflicts\" any points where sources disagree.";

/// A [`ResearchService`] that delegates to a completion model.
pub struct CompletionResearcher {
    completion: Arc<dyn CompletionService>,
}

impl CompletionResearcher {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }
}

/// The user message describing one unit of research.
pub fn research_request(pending: &PendingResearch) -> String {
    match pending {
        PendingResearch::Query {
            query,
            target_section,
        } => match target_section {
            Some(section) => format!("Research: {query}\nThe findings will go into the \"{section}\" section."),
            None => format!("Research: {query}"),
        },
        PendingResearch::Step { index, tasks, .. } => {
            let mut text = format!(
                "This is step {} of {} of a research plan.\n",
                index + 1,
                tasks.len()
            );
            for (i, task) in tasks.iter().enumerate() {
                let marker = if i == *index { "->" } else { "  " };
                text.push_str(&format!("{marker} {}. {}\n", i + 1, task.task));
            }
            text.push_str(&format!("Research only the current step: {}", pending.query()));
            text
        }
    }
}

#[async_trait]
impl ResearchService for CompletionResearcher {
    async fn research(&self, pending: &PendingResearch) -> Result<ResearchResult> {
        let messages = [
            ChatMessage::system(RESEARCH_PROMPT),
            ChatMessage::user(research_request(pending)),
        ];
        let raw = self
            .completion
            .complete(&messages)
            .await
            .context("research completion failed")?;
        Ok(parse_report(pending.query(), &raw))
    }
}

/// Read a research report leniently. Output without a JSON object becomes
/// the summary verbatim.
pub fn parse_report(query: &str, raw: &str) -> ResearchResult {
    let Some(Value::Object(report)) = recover_json(raw) else {
        tracing::debug!(query, "research output was not JSON; using it as the summary");
        return ResearchResult {
            query: query.to_string(),
            summary: raw.trim().to_string(),
            ..ResearchResult::default()
        };
    };

    let strings = |key: &str| -> Vec<String> {
        match report.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    };

    let sources = report
        .get("sources")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| match v {
                    Value::Object(_) => serde_json::from_value::<Source>(v.clone()).ok(),
                    Value::String(url) => Some(Source {
                        title: "Source".to_string(),
                        url: url.clone(),
                        snippet: String::new(),
                    }),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    ResearchResult {
        query: query.to_string(),
        summary: report
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        key_points: strings("key_points"),
        sources,
        conflicts: strings("conflicts"),
        error: None,
    }
}
