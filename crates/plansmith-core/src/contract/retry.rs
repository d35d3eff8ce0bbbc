//! Bounded correction retry around a completion call.

use crate::message::ChatMessage;
use crate::service::{CompletionError, CompletionService};

use super::{ParsedTurn, parse};

/// Builds the system message sent after an output that broke the protocol.
pub type CorrectionBuilder = fn(&str) -> String;

/// How many completion calls a turn may spend getting a parseable answer.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    pub correction: CorrectionBuilder,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            correction: correction_message,
        }
    }
}

/// Default correction instruction.
pub fn correction_message(_failed_output: &str) -> String {
    "ERROR: Your previous response was not valid JSON. Return ONLY a single JSON \
     object with the keys \"reply\", \"control\" and \"update\". Do not output plain \
     text. Please retry."
        .to_string()
}

/// The final model output of a turn and its interpretation.
#[derive(Debug, Clone)]
pub struct ContractOutput {
    /// Raw text of the output that was kept.
    pub raw: String,
    pub parsed: ParsedTurn,
    /// Completion calls made, successful or not.
    pub attempts: u32,
}

/// Call the completion service and re-ask while the output cannot be parsed.
///
/// Each retry sends the previous context, the failed output as an
/// assistant message, and a correction instruction. The first call's error
/// is returned to the caller. A failing retry keeps the last output, which
/// then degrades to a raw-text reply.
pub async fn complete_with_retry(
    service: &dyn CompletionService,
    messages: &[ChatMessage],
    policy: &RetryPolicy,
) -> Result<ContractOutput, CompletionError> {
    let raw = service.complete(messages).await?;
    let mut output = ContractOutput {
        parsed: parse(&raw),
        raw,
        attempts: 1,
    };

    let mut context = messages.to_vec();
    while output.parsed.is_parse_failure() && output.attempts < policy.max_attempts {
        tracing::warn!(attempt = output.attempts, "model output broke the protocol; retrying");
        context.push(ChatMessage::assistant(output.raw.clone()));
        context.push(ChatMessage::system((policy.correction)(&output.raw)));
        output.attempts += 1;

        match service.complete(&context).await {
            Ok(raw) => {
                tracing::debug!(attempt = output.attempts, output = %raw, "retry output");
                output.parsed = parse(&raw);
                output.raw = raw;
            }
            Err(err) => {
                tracing::warn!(attempt = output.attempts, error = %err, "correction retry failed");
                break;
            }
        }
    }

    if output.parsed.is_parse_failure() {
        tracing::warn!(attempts = output.attempts, "falling back to raw model text");
    }
    Ok(output)
}
