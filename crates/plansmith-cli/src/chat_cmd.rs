use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use plansmith_core::session::SessionStore;
use plansmith_core::turn::{CONTINUE_MESSAGE, TurnCoordinator, TurnOutcome, TurnRequest};

/// Automatic resumes allowed after one user message.
pub const MAX_AUTO_CONTINUES: usize = 10;

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub session_id: String,
    pub user_id: String,
    pub auto_continue: bool,
}

/// Interactive chat over `input`, writing replies to `out`.
///
/// `/quit`, `/exit` or end of input stop the loop. When a turn pauses
/// between research steps the loop sends the continue message itself,
/// unless auto-continue is off.
pub async fn run_chat<R, W>(
    coordinator: &TurnCoordinator,
    store: &dyn SessionStore,
    options: &ChatOptions,
    input: R,
    out: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let existing = store.get(&options.session_id).await?;
    match existing.filter(|s| !s.messages.is_empty()) {
        Some(session) => {
            writeln!(out, "Resuming session {} ({} messages).", options.session_id, session.messages.len())?;
            if let Some(last) = session.display_messages().last() {
                writeln!(out, "{}", last.content)?;
            }
        }
        None => {
            let outcome = turn(coordinator, store, options, "").await?;
            print_outcome(out, &outcome)?;
        }
    }

    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await.context("failed to read input")? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if matches!(message, "/quit" | "/exit") {
            break;
        }

        let mut outcome = turn(coordinator, store, options, message).await?;
        print_outcome(out, &outcome)?;

        let mut resumes = 0;
        while outcome.is_paused() {
            if !options.auto_continue {
                writeln!(out, "(research paused; send {CONTINUE_MESSAGE} to resume)")?;
                break;
            }
            if resumes == MAX_AUTO_CONTINUES {
                tracing::warn!(resumes, "auto-continue limit reached");
                writeln!(out, "(research still running; send {CONTINUE_MESSAGE} to resume)")?;
                break;
            }
            resumes += 1;
            outcome = turn(coordinator, store, options, CONTINUE_MESSAGE).await?;
            print_outcome(out, &outcome)?;
        }
    }

    writeln!(out)?;
    Ok(())
}

async fn turn(
    coordinator: &TurnCoordinator,
    store: &dyn SessionStore,
    options: &ChatOptions,
    message: &str,
) -> Result<TurnOutcome> {
    coordinator
        .handle(
            store,
            &options.session_id,
            TurnRequest::new(&options.user_id, message),
        )
        .await
}

fn print_outcome<W: Write>(out: &mut W, outcome: &TurnOutcome) -> Result<()> {
    writeln!(out, "{}", outcome.reply)?;

    if let Some(progress) = &outcome.progress {
        writeln!(out, "  [{}]", progress.label)?;
        for conflict in &progress.conflicts {
            writeln!(out, "  ! {conflict}")?;
        }
    }

    if let Some(tasks) = &outcome.proposed_research_plan {
        writeln!(out, "  Proposed research plan:")?;
        for (i, task) in tasks.iter().enumerate() {
            writeln!(out, "    {}. {}", i + 1, task.task)?;
        }
    }

    if outcome.new_version_created {
        if let Some(plan) = &outcome.plan {
            writeln!(out, "  (plan updated to version {})", plan.version)?;
        }
    }
    Ok(())
}
