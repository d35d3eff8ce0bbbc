//! Read-only session commands: `history`, `show` and `sessions`.

use std::io::Write;

use anyhow::{Result, bail};

use plansmith_core::document::render_markdown;
use plansmith_core::message::Role;
use plansmith_core::session::SessionStore;

/// Print the display-cleaned conversation of a session.
pub async fn run_history<W: Write>(store: &dyn SessionStore, session_id: &str, out: &mut W) -> Result<()> {
    let Some(session) = store.get(session_id).await? else {
        bail!("session {session_id} not found");
    };

    for message in session.display_messages() {
        let who = match message.role {
            Role::User => "you",
            _ => "assistant",
        };
        writeln!(out, "{who}: {}", message.content)?;
    }
    if !session.attached_files.is_empty() {
        writeln!(out)?;
        writeln!(out, "Attached files:")?;
        for file in &session.attached_files {
            writeln!(out, "  {} ({})", file.filename, file.id)?;
        }
    }
    Ok(())
}

/// Print a session's plan as markdown.
pub async fn run_show<W: Write>(store: &dyn SessionStore, session_id: &str, out: &mut W) -> Result<()> {
    let Some(session) = store.get(session_id).await? else {
        bail!("session {session_id} not found");
    };
    match &session.plan {
        Some(plan) => write!(out, "{}", render_markdown(plan))?,
        None => writeln!(out, "Session {session_id} has no plan yet.")?,
    }
    Ok(())
}

pub async fn run_list<W: Write>(store: &dyn SessionStore, out: &mut W) -> Result<()> {
    let ids = store.list_ids().await?;
    if ids.is_empty() {
        writeln!(out, "No sessions.")?;
    }
    for id in ids {
        writeln!(out, "{id}")?;
    }
    Ok(())
}
