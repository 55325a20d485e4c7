//! `/api/sessions*` and `/api/health` (§6). Bodies are JSON; auth is a
//! bearer token verified through the `TokenVerifier` capability, never
//! owned here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use nix::sys::signal::Signal;
use serde::Deserialize;

use super::AppState;
use crate::error::CoreError;
use crate::session::registry::CreateSessionRequest;
use crate::session::{SessionMeta, SessionStatus, WireTitleMode};

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/input", post(post_input))
        .route("/api/sessions/{id}/resize", post(post_resize))
        .route("/api/health", get(health))
}

type Bearer_ = Option<TypedHeader<Authorization<Bearer>>>;

fn check_auth(state: &AppState, auth: &Bearer_) -> Result<(), StatusCode> {
    match auth {
        Some(TypedHeader(Authorization(bearer))) if state.auth.verify(bearer.token()) => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    auth: Bearer_,
) -> Result<Json<Vec<SessionMeta>>, StatusCode> {
    check_auth(&state, &auth)?;
    Ok(Json(state.registry.list().await))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CommandField {
    Argv(Vec<String>),
    Line(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody {
    command: CommandField,
    working_dir: String,
    name: Option<String>,
    cols: Option<u16>,
    rows: Option<u16>,
    title_mode: Option<WireTitleMode>,
    #[serde(default)]
    #[allow(dead_code)]
    spawn_terminal: bool,
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    auth: Bearer_,
    Json(body): Json<CreateSessionBody>,
) -> Result<impl IntoResponse, StatusCode> {
    check_auth(&state, &auth)?;

    let argv = match body.command {
        CommandField::Argv(argv) => argv,
        CommandField::Line(line) => split_command_line(&line),
    };
    if argv.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if !std::path::Path::new(&body.working_dir).exists() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let req = CreateSessionRequest {
        command: argv,
        working_dir: body.working_dir,
        name: body.name,
        cols: body.cols,
        rows: body.rows,
        title_mode: body.title_mode.unwrap_or(WireTitleMode::None),
    };

    match state.registry.create(req).await {
        Ok(session_id) => Ok((StatusCode::CREATED, Json(serde_json::json!({ "sessionId": session_id })))),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    auth: Bearer_,
    Path(id): Path<String>,
) -> Result<Json<SessionMeta>, StatusCode> {
    check_auth(&state, &auth)?;
    let session = state.registry.get(&id).await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(session.snapshot_meta().await))
}

/// Running sessions are killed; exited ones are cleaned up (§6). The kill
/// itself runs in the background so the response isn't held open for the
/// SIGTERM→SIGKILL grace period (§4.3).
async fn delete_session(
    State(state): State<Arc<AppState>>,
    auth: Bearer_,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    check_auth(&state, &auth)?;
    let session = state.registry.get(&id).await.ok_or(StatusCode::NOT_FOUND)?;
    let status = session.snapshot_meta().await.status;

    match status {
        SessionStatus::Exited { .. } => {
            state
                .registry
                .cleanup(&id)
                .await
                .map_err(StatusCode::from)?;
        }
        SessionStatus::Starting | SessionStatus::Running { .. } => {
            let registry = state.registry.clone();
            tokio::spawn(async move {
                let _ = registry.kill(&id, Signal::SIGTERM).await;
            });
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct InputBody {
    data: String,
}

async fn post_input(
    State(state): State<Arc<AppState>>,
    auth: Bearer_,
    Path(id): Path<String>,
    Json(body): Json<InputBody>,
) -> Result<StatusCode, StatusCode> {
    check_auth(&state, &auth)?;
    match state.registry.write_stdin(&id, body.data.as_bytes()).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(CoreError::InvalidOperation) => Err(StatusCode::CONFLICT),
        Err(e) => Err(StatusCode::from(e)),
    }
}

#[derive(Deserialize)]
struct ResizeBody {
    cols: u16,
    rows: u16,
}

async fn post_resize(
    State(state): State<Arc<AppState>>,
    auth: Bearer_,
    Path(id): Path<String>,
    Json(body): Json<ResizeBody>,
) -> Result<StatusCode, StatusCode> {
    check_auth(&state, &auth)?;
    match state.registry.resize(&id, body.cols, body.rows).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(StatusCode::from(e)),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Minimal POSIX-shell-style word splitting for `command` given as a single
/// string (§6): honors single/double quotes, no other shell semantics.
fn split_command_line(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut has_current = false;

    for c in line.chars() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                has_current = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_current = true;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_current {
                    words.push(std::mem::take(&mut current));
                    has_current = false;
                }
            }
            c => {
                current.push(c);
                has_current = true;
            }
        }
    }
    if has_current {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_words() {
        assert_eq!(split_command_line("ls -la /tmp"), vec!["ls", "-la", "/tmp"]);
    }

    #[test]
    fn honors_double_quoted_words() {
        assert_eq!(
            split_command_line(r#"sh -c "echo hello world""#),
            vec!["sh", "-c", "echo hello world"]
        );
    }

    #[test]
    fn collapses_repeated_whitespace() {
        assert_eq!(split_command_line("  bash   -l  "), vec!["bash", "-l"]);
    }
}
