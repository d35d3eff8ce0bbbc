//! Per-conversation state and its persistence interface.

pub mod lock;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contract::extract_reply;
use crate::document::Plan;
use crate::message::{ChatMessage, Role};
use crate::research::ResearchState;

pub use lock::{SessionGuard, SessionLocks};
pub use store::{FileSessionStore, InMemorySessionStore, SessionStore};

/// A file attached to a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub id: String,
    pub filename: String,
}

/// A file sent along with one message, including its extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub text: String,
}

/// Everything the assistant knows about one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub research: ResearchState,
    #[serde(default)]
    pub attached_files: Vec<AttachedFile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            messages: Vec::new(),
            plan: None,
            research: ResearchState::default(),
            attached_files: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The session's plan, created empty on first use.
    pub fn plan_mut(&mut self) -> &mut Plan {
        let user_id = &self.user_id;
        self.plan.get_or_insert_with(|| Plan::new(user_id.clone(), "", ""))
    }

    /// Record attachments. Returns whether any new file was added.
    pub fn attach(&mut self, attachments: &[Attachment]) -> bool {
        let mut added = false;
        for attachment in attachments {
            if self.attached_files.iter().any(|f| f.id == attachment.id) {
                continue;
            }
            self.attached_files.push(AttachedFile {
                id: attachment.id.clone(),
                filename: attachment.filename.clone(),
            });
            added = true;
        }
        added
    }

    /// Conversation as shown to a person: assistant messages are reduced to
    /// their reply text and system messages are hidden.
    pub fn display_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| match m.role {
                Role::Assistant => ChatMessage::assistant(extract_reply(&m.content)),
                _ => m.clone(),
            })
            .collect()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_is_created_lazily_with_placeholders() {
        let mut session = Session::new("user-7");
        assert!(session.plan.is_none());
        let id = session.plan_mut().id;
        let plan = session.plan.as_ref().unwrap();
        assert_eq!(plan.user_id, "user-7");
        assert!(plan.company.is_empty());
        assert!(plan.goal.is_empty());
        assert_eq!(session.plan_mut().id, id);
    }

    #[test]
    fn attach_deduplicates_by_id() {
        let mut session = Session::new("u");
        let a = Attachment {
            id: "f1".into(),
            filename: "deck.pdf".into(),
            text: "slides".into(),
        };
        assert!(session.attach(&[a.clone()]));
        assert!(!session.attach(&[a]));
        assert_eq!(session.attached_files.len(), 1);
    }

    #[test]
    fn display_messages_strip_protocol() {
        let mut session = Session::new("u");
        session.messages.push(ChatMessage::user("hello"));
        session.messages.push(ChatMessage::assistant(
            r#"{"reply":"Hi there","control":{"action":"NONE"},"update":null}"#,
        ));
        let shown = session.display_messages();
        assert_eq!(shown[0].content, "hello");
        assert_eq!(shown[1].content, "Hi there");
    }

    #[test]
    fn session_round_trips_through_json() {
        let mut session = Session::new("u");
        session.plan_mut().set_title("Acme Plan");
        session.messages.push(ChatMessage::user("hi"));
        let text = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&text).unwrap();
        assert_eq!(back, session);
    }
}
