//! PostgreSQL-backed [`SessionStore`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use plansmith_core::session::{Session, SessionStore};

/// Sessions stored as rows of the `sessions` table.
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode(id: &str, data: &str) -> Result<Session> {
    serde_json::from_str(data).with_context(|| format!("failed to decode session {id}"))
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data::text FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to fetch session {id}"))?;

        row.map(|(data,)| decode(id, &data)).transpose()
    }

    async fn put(&self, id: &str, session: &Session) -> Result<()> {
        let data = serde_json::to_string(session).context("failed to encode session")?;
        let plan_id = session.plan.as_ref().map(|p| p.id);

        // The text parameter is cast to `json`, which keeps it verbatim.
        sqlx::query(
            "INSERT INTO sessions (id, user_id, plan_id, data, created_at, updated_at) \
             VALUES ($1, $2, $3, $4::json, $5, $6) \
             ON CONFLICT (id) DO UPDATE \
             SET user_id = EXCLUDED.user_id, \
                 plan_id = EXCLUDED.plan_id, \
                 data = EXCLUDED.data, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(id)
        .bind(&session.user_id)
        .bind(plan_id)
        .bind(data)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store session {id}"))?;

        tracing::debug!(session_id = id, "session stored");
        Ok(())
    }

    async fn find_by_plan(&self, plan_id: Uuid) -> Result<Option<(String, Session)>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT id, data::text FROM sessions WHERE plan_id = $1 \
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to look up session for plan {plan_id}"))?;

        row.map(|(id, data)| decode(&id, &data).map(|s| (id, s)))
            .transpose()
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM sessions ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("failed to list sessions")?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}
