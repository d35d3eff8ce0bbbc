//! Session persistence: the store interface plus memory and file backends.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Session;

/// Load and save sessions by id.
///
/// Implementations must return exactly what was last written for an id,
/// including section content shapes and plan history.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>>;

    async fn put(&self, id: &str, session: &Session) -> Result<()>;

    /// Find the session that owns the plan with `plan_id`.
    async fn find_by_plan(&self, plan_id: Uuid) -> Result<Option<(String, Session)>>;

    async fn list_ids(&self) -> Result<Vec<String>>;
}

fn owns_plan(session: &Session, plan_id: Uuid) -> bool {
    session.plan.as_ref().is_some_and(|p| p.id == plan_id)
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<BTreeMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn put(&self, id: &str, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(id.to_string(), session.clone());
        Ok(())
    }

    async fn find_by_plan(&self, plan_id: Uuid) -> Result<Option<(String, Session)>> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .find(|(_, s)| owns_plan(s, plan_id))
            .map(|(id, s)| (id.clone(), s.clone())))
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.sessions.read().await.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// All sessions in one JSON document, keyed by session id.
///
/// The document is loaded once on open and rewritten on every `put`
/// through a temporary file in the same directory, so a crash mid-write
/// leaves the previous document intact. A failed write leaves the
/// in-memory view unchanged too.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    sessions: RwLock<BTreeMap<String, Session>>,
}

impl FileSessionStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let sessions = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("failed to parse session file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read session file {}", path.display()));
            }
        };
        tracing::debug!(path = %path.display(), sessions = sessions.len(), "opened session file");
        Ok(Self {
            path,
            sessions: RwLock::new(sessions),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Atomically replace `path` with `bytes` via a temp file in the same directory.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes).context("failed to write session file")?;
    tmp.flush().context("failed to flush session file")?;
    tmp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn put(&self, id: &str, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let mut next = sessions.clone();
        next.insert(id.to_string(), session.clone());
        let bytes = serde_json::to_vec_pretty(&next).context("failed to serialize sessions")?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .context("session file writer panicked")??;
        *sessions = next;
        Ok(())
    }

    async fn find_by_plan(&self, plan_id: Uuid) -> Result<Option<(String, Session)>> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .find(|(_, s)| owns_plan(s, plan_id))
            .map(|(id, s)| (id.clone(), s.clone())))
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.sessions.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Section, SectionContent};
    use crate::message::ChatMessage;
    use serde_json::json;

    fn sample_session() -> Session {
        let mut session = Session::new("u1");
        session.messages.push(ChatMessage::user("hi"));
        let plan = session.plan_mut();
        plan.record_snapshot();
        plan.sections.push(Section::new(
            "Account Overview",
            SectionContent::from_value(json!({"zeta": "z", "alpha": ["a"]})),
        ));
        plan.sections
            .push(Section::new("Notes", SectionContent::Text("n".into())));
        plan.commit();
        session
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = InMemorySessionStore::new();
        assert!(store.get("s").await.unwrap().is_none());

        let session = sample_session();
        store.put("s", &session).await.unwrap();
        assert_eq!(store.get("s").await.unwrap(), Some(session.clone()));

        let plan_id = session.plan.as_ref().unwrap().id;
        let (id, found) = store.find_by_plan(plan_id).await.unwrap().unwrap();
        assert_eq!(id, "s");
        assert_eq!(found, session);
        assert!(store.find_by_plan(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.json");

        let session = sample_session();
        {
            let store = FileSessionStore::open(&path).unwrap();
            store.put("a", &session).await.unwrap();
            store.put("b", &Session::new("u2")).await.unwrap();
        }

        let store = FileSessionStore::open(&path).unwrap();
        assert_eq!(store.list_ids().await.unwrap(), ["a", "b"]);
        let back = store.get("a").await.unwrap().unwrap();
        assert_eq!(back, session);

        let keys: Vec<&String> = back.plan.as_ref().unwrap().sections[0]
            .content
            .as_map()
            .unwrap()
            .keys()
            .collect();
        assert_eq!(keys, ["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn failed_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        let store = FileSessionStore::open(blocker.join("sessions.json")).unwrap();
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = store.put("a", &sample_session()).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to create directory"));
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.list_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path().join("none.json")).unwrap();
        assert!(store.list_ids().await.unwrap().is_empty());
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = FileSessionStore::open(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse session file"));
    }
}
