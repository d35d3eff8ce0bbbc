use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use plansmith_core::document::Plan;
use plansmith_core::message::ChatMessage;
use plansmith_core::session::{AttachedFile, Attachment, SessionLocks, SessionStore};
use plansmith_core::turn::{TurnCoordinator, TurnRequest};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{err:#}"), "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// State and wire types
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<TurnCoordinator>,
    pub store: Arc<dyn SessionStore>,
    pub locks: Arc<SessionLocks>,
}

impl AppState {
    pub fn new(coordinator: Arc<TurnCoordinator>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            coordinator,
            store,
            locks: Arc::new(SessionLocks::new()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub user_id: String,
    #[serde(default)]
    pub message: String,
    pub conversation_id: Option<String>,
    pub plan_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl ChatRequest {
    /// Conversation id, else plan id, else one session per user.
    pub fn session_id(&self) -> String {
        fn present(id: &Option<String>) -> Option<&str> {
            id.as_deref().filter(|id| !id.is_empty())
        }
        present(&self.conversation_id)
            .or_else(|| present(&self.plan_id))
            .map(str::to_string)
            .unwrap_or_else(|| format!("session-{}", self.user_id))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub messages: Vec<ChatMessage>,
    pub attached_files: Vec<AttachedFile>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/history/{id}", get(history))
        .route("/api/plans/{id}", get(get_plan).put(put_plan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("plansmith serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("plansmith serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<axum::response::Response, AppError> {
    if body.user_id.trim().is_empty() {
        return Err(AppError::bad_request("userId is required"));
    }
    let session_id = body.session_id();
    let request = TurnRequest {
        user_id: body.user_id,
        message: body.message,
        attachments: body.attachments,
    };

    let _guard = state.locks.lock(&session_id).await;
    let outcome = state
        .coordinator
        .handle(state.store.as_ref(), &session_id, request)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(outcome).into_response())
}

async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let session = state.store.get(&id).await.map_err(AppError::internal)?;
    let response = match session {
        Some(session) => HistoryResponse {
            messages: session.display_messages(),
            attached_files: session.attached_files,
        },
        None => HistoryResponse {
            messages: Vec::new(),
            attached_files: Vec::new(),
        },
    };
    Ok(Json(response).into_response())
}

async fn get_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let plan = state
        .store
        .find_by_plan(id)
        .await
        .map_err(AppError::internal)?
        .and_then(|(_, session)| session.plan)
        .ok_or_else(|| AppError::not_found(format!("plan {id} not found")))?;

    Ok(Json(plan).into_response())
}

async fn put_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(incoming): Json<Plan>,
) -> Result<axum::response::Response, AppError> {
    let (session_id, _) = state
        .store
        .find_by_plan(id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("plan {id} not found")))?;

    let _guard = state.locks.lock(&session_id).await;
    // Reload under the lock; a turn may have finished in between.
    let mut session = state
        .store
        .get(&session_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("plan {id} not found")))?;

    let plan = session.plan_mut();
    plan.replace_with(Plan { id, ..incoming });
    let saved = plan.clone();
    session.touch();

    state
        .store
        .put(&session_id, &session)
        .await
        .map_err(AppError::internal)?;
    tracing::info!(session_id = %session_id, plan_id = %id, version = saved.version, "plan replaced");

    Ok(Json(saved).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use plansmith_core::session::{InMemorySessionStore, SessionStore};
    use plansmith_core::turn::GREETING;

    use super::AppState;
    use crate::testing::coordinator;

    const UPDATE: &str = r#"{"reply": "Added the overview.", "control": {"action": "NONE"}, "update": {"section": "Account Overview", "content": "Acme builds rockets.", "mode": "merge"}}"#;

    fn state(outputs: Vec<&str>) -> AppState {
        AppState::new(coordinator(outputs), Arc::new(InMemorySessionStore::new()))
    }

    async fn send(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> axum::response::Response {
        let app = super::build_router(state.clone());
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.oneshot(request).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn session_id_precedence() {
        let req: super::ChatRequest =
            serde_json::from_value(json!({"userId": "u", "conversationId": "c", "planId": "p"})).unwrap();
        assert_eq!(req.session_id(), "c");
        let req: super::ChatRequest =
            serde_json::from_value(json!({"userId": "u", "planId": "p"})).unwrap();
        assert_eq!(req.session_id(), "p");
        let req: super::ChatRequest =
            serde_json::from_value(json!({"userId": "u", "conversationId": "", "planId": "p"})).unwrap();
        assert_eq!(req.session_id(), "p");
        let req: super::ChatRequest =
            serde_json::from_value(json!({"userId": "u", "conversationId": "", "planId": ""})).unwrap();
        assert_eq!(req.session_id(), "session-u");
        let req: super::ChatRequest = serde_json::from_value(json!({"userId": "u"})).unwrap();
        assert_eq!(req.session_id(), "session-u");
    }

    #[tokio::test]
    async fn empty_first_message_gets_greeting() {
        let state = state(vec![]);
        let resp = send(&state, "POST", "/api/chat", Some(json!({"userId": "u1", "message": ""}))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["reply"], GREETING);
        assert_eq!(json["researchStatus"], "idle");
        assert!(state.store.get("session-u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn chat_applies_update_and_reports_version() {
        let state = state(vec![UPDATE]);
        let resp = send(
            &state,
            "POST",
            "/api/chat",
            Some(json!({"userId": "u1", "message": "Acme builds rockets", "conversationId": "c1"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["reply"], "Added the overview.");
        assert_eq!(json["newVersionCreated"], true);
        assert_eq!(json["plan"]["sections"][0]["title"], "Account Overview");
        assert_eq!(json["messages"][1]["content"], "Added the overview.");
    }

    #[tokio::test]
    async fn chat_requires_user_id() {
        let state = state(vec![]);
        let resp = send(&state, "POST", "/api/chat", Some(json!({"userId": " ", "message": "hi"}))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "userId is required");
    }

    #[tokio::test]
    async fn history_of_unknown_session_is_empty() {
        let state = state(vec![]);
        let resp = send(&state, "GET", "/api/history/nobody", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"messages": [], "attachedFiles": []}));
    }

    #[tokio::test]
    async fn history_shows_clean_replies_and_attachments() {
        let state = state(vec![UPDATE]);
        send(
            &state,
            "POST",
            "/api/chat",
            Some(json!({
                "userId": "u1",
                "message": "See the attached brief",
                "conversationId": "c1",
                "attachments": [{"id": "f1", "filename": "brief.txt", "text": "Acme brief"}]
            })),
        )
        .await;

        let resp = send(&state, "GET", "/api/history/c1", None).await;
        let json = body_json(resp).await;
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["content"], "Added the overview.");
        assert_eq!(json["attachedFiles"], json!([{"id": "f1", "filename": "brief.txt"}]));
    }

    #[tokio::test]
    async fn plan_routes_404_for_unknown_plan() {
        let state = state(vec![]);
        let id = uuid::Uuid::new_v4();
        let resp = send(&state, "GET", &format!("/api/plans/{id}"), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let plan = plansmith_core::document::Plan::new("u1", "Acme", "Grow");
        let body = serde_json::to_value(&plan).unwrap();
        let resp = send(&state, "PUT", &format!("/api/plans/{id}"), Some(body)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn put_plan_replaces_document_and_keeps_history() {
        let state = state(vec![UPDATE]);
        let resp = send(
            &state,
            "POST",
            "/api/chat",
            Some(json!({"userId": "u1", "message": "Acme builds rockets", "conversationId": "c1"})),
        )
        .await;
        let outcome = body_json(resp).await;
        let plan_id = outcome["plan"]["id"].as_str().unwrap().to_string();
        let version = outcome["plan"]["version"].as_u64().unwrap();

        let resp = send(&state, "GET", &format!("/api/plans/{plan_id}"), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let mut edited = body_json(resp).await;
        edited["title"] = json!("Acme 2027");
        edited["history"] = json!([]);

        let resp = send(&state, "PUT", &format!("/api/plans/{plan_id}"), Some(edited)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let saved = body_json(resp).await;
        assert_eq!(saved["title"], "Acme 2027");
        assert_eq!(saved["version"].as_u64().unwrap(), version + 1);
        let history = saved["history"].as_array().unwrap();
        assert!(!history.is_empty());
        assert!(history.iter().all(|h| h.get("history").is_none()));

        let stored = state.store.get("c1").await.unwrap().unwrap();
        assert_eq!(stored.plan.unwrap().title.as_deref(), Some("Acme 2027"));
    }
}
