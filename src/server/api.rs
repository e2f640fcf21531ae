use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Deserialize;
use taskboard_common::{
    CLIENT_ID_HEADER, ClientId, CreateColumnInput, CreateTaskInput, KanbanEvent,
    UpdateColumnInput, UpdateTaskInput,
};
use tokio_util::sync::CancellationToken;

use super::broker::Broker;
#[cfg(test)]
use super::db::BoardDb;
use super::db::DbHandle;
use super::ws;
use crate::errors::BoardError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub broker: Broker,
    /// Parent of every subscription's cancellation token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(db: DbHandle, broker: Broker) -> Self {
        Self {
            db,
            broker,
            shutdown: CancellationToken::new(),
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct NameRequest {
    pub name: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

/// Picks the status from the typed `BoardError` anywhere in the chain.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<BoardError>() {
            Some(board) if board.is_not_found() => ApiError::NotFound(board.to_string()),
            Some(board @ (BoardError::InvalidOrder { .. } | BoardError::BadRequest(_))) => {
                ApiError::BadRequest(board.to_string())
            }
            _ => ApiError::Internal(format!("{:#}", err)),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/teams", get(list_teams).post(create_team))
        .route(
            "/api/teams/{team_id}/projects",
            get(list_projects).post(create_project),
        )
        .route(
            "/api/teams/{team_id}/projects/{project_id}/subscribe",
            get(ws::subscribe_handler),
        )
        .route(
            "/api/projects/{project_id}/boards",
            get(list_boards).post(create_board),
        )
        .route("/api/boards/{board_id}/columns", get(board_columns))
        .route("/api/kanban-columns", post(create_column))
        .route(
            "/api/kanban-columns/{id}",
            patch(update_column).delete(delete_column),
        )
        .route("/api/tasks", post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// The mutating session's id from `x-client-id`. Malformed values are ignored.
fn origin_client(headers: &HeaderMap) -> Option<ClientId> {
    let raw = headers.get(CLIENT_ID_HEADER)?.to_str().ok()?;
    match raw.parse::<ClientId>() {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::debug!(header = raw, error = %e, "Ignoring malformed client id header");
            None
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_teams(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let teams = state.db.call(|db| db.list_teams()).await?;
    Ok(Json(teams))
}

async fn create_team(
    State(state): State<SharedState>,
    Json(req): Json<NameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let team = state.db.call(move |db| db.create_team(&req.name)).await?;
    tracing::info!(team_id = %team.id, "Team created");
    Ok((StatusCode::CREATED, Json(team)))
}

async fn list_projects(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let projects = state
        .db
        .call(move |db| {
            if db.get_team(&team_id)?.is_none() {
                return Err(BoardError::TeamNotFound { id: team_id }.into());
            }
            db.list_projects(&team_id)
        })
        .await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
    Json(req): Json<NameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.create_project(&team_id, &req.name))
        .await?;
    tracing::info!(project_id = %project.id, team_id = %project.team_id, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

async fn list_boards(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let boards = state
        .db
        .call(move |db| {
            if db.get_project(&project_id)?.is_none() {
                return Err(BoardError::ProjectNotFound { id: project_id }.into());
            }
            db.list_boards(&project_id)
        })
        .await?;
    Ok(Json(boards))
}

async fn create_board(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    Json(req): Json<NameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| db.create_board(&project_id, &req.name))
        .await?;
    tracing::info!(board_id = %board.id, project_id = %board.project_id, "Board created");
    Ok((StatusCode::CREATED, Json(board)))
}

async fn board_columns(
    State(state): State<SharedState>,
    Path(board_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let columns = state.db.call(move |db| db.board_columns(&board_id)).await?;
    Ok(Json(columns))
}

async fn create_column(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(input): Json<CreateColumnInput>,
) -> Result<impl IntoResponse, ApiError> {
    let origin = origin_client(&headers);
    let (column, scope) = state
        .db
        .call(move |db| {
            let column = db.create_column(&input)?;
            let scope = db.board_scope(&column.board_id)?;
            Ok((column, scope))
        })
        .await?;
    tracing::info!(column_id = %column.id, order = column.order, origin = ?origin, "Column created");
    state.broker.publish(KanbanEvent::KanbanColumnCreated {
        team_id: scope.team_id,
        project_id: scope.project_id,
        board_id: scope.board_id,
        column: column.clone(),
    });
    Ok((StatusCode::CREATED, Json(column)))
}

async fn update_column(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(mut input): Json<UpdateColumnInput>,
) -> Result<impl IntoResponse, ApiError> {
    if !input.id.is_empty() && input.id != id {
        return Err(ApiError::BadRequest(format!(
            "Body id {} does not match path id {}",
            input.id, id
        )));
    }
    input.id = id;
    let origin = origin_client(&headers);
    let (column, scope) = state
        .db
        .call(move |db| {
            let column = db.update_column(&input)?;
            let scope = db.board_scope(&column.board_id)?;
            Ok((column, scope))
        })
        .await?;
    state.broker.publish(KanbanEvent::KanbanColumnUpdated {
        team_id: scope.team_id,
        project_id: scope.project_id,
        board_id: scope.board_id,
        column: column.clone(),
        client_id: origin,
    });
    Ok(Json(column))
}

async fn delete_column(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let origin = origin_client(&headers);
    let column_id = id.clone();
    let (deleted, scope) = state
        .db
        .call(move |db| {
            let scope = db.column_scope(&column_id)?;
            let deleted = db.delete_column(&column_id)?;
            Ok((deleted, scope))
        })
        .await?;
    match deleted {
        Some(column) => {
            tracing::info!(column_id = %column.id, origin = ?origin, "Column deleted");
            state.broker.publish(KanbanEvent::KanbanColumnDeleted {
                team_id: scope.team_id,
                project_id: scope.project_id,
                board_id: scope.board_id,
                column_id: column.id,
            });
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::NotFound(format!("Column {} not found", id))),
    }
}

async fn create_task(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(input): Json<CreateTaskInput>,
) -> Result<impl IntoResponse, ApiError> {
    let origin = origin_client(&headers);
    let (task, scope) = state
        .db
        .call(move |db| {
            let task = db.create_task(&input)?;
            let scope = db.column_scope(&task.kanban_column_id)?;
            Ok((task, scope))
        })
        .await?;
    tracing::info!(task_id = task.id, column_id = %task.kanban_column_id, origin = ?origin, "Task created");
    state.broker.publish(KanbanEvent::TaskCreated {
        team_id: scope.team_id,
        project_id: scope.project_id,
        board_id: scope.board_id,
        task: task.clone(),
    });
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.db.call(move |db| db.get_task(id)).await?;
    match task {
        Some(task) => Ok(Json(task)),
        None => Err(ApiError::NotFound(format!("Task {} not found", id))),
    }
}

async fn update_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(mut input): Json<UpdateTaskInput>,
) -> Result<impl IntoResponse, ApiError> {
    if input.id != 0 && input.id != id {
        return Err(ApiError::BadRequest(format!(
            "Body id {} does not match path id {}",
            input.id, id
        )));
    }
    input.id = id;
    let origin = origin_client(&headers);
    let (task, scope) = state
        .db
        .call(move |db| {
            let task = db.update_task(&input)?;
            let scope = db.column_scope(&task.kanban_column_id)?;
            Ok((task, scope))
        })
        .await?;
    state.broker.publish(KanbanEvent::TaskUpdated {
        team_id: scope.team_id,
        project_id: scope.project_id,
        board_id: scope.board_id,
        task: task.clone(),
        client_id: origin,
    });
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let origin = origin_client(&headers);
    let deleted = state
        .db
        .call(move |db| {
            let Some(task) = db.get_task(id)? else {
                return Ok(None);
            };
            let scope = db.column_scope(&task.kanban_column_id)?;
            let deleted = db.delete_task(id)?;
            Ok(deleted.map(|task| (task, scope)))
        })
        .await?;
    match deleted {
        Some((task, scope)) => {
            tracing::info!(task_id = task.id, origin = ?origin, "Task deleted");
            state.broker.publish(KanbanEvent::TaskDeleted {
                team_id: scope.team_id,
                project_id: scope.project_id,
                board_id: scope.board_id,
                task_id: task.id,
                kanban_column_id: task.kanban_column_id,
            });
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::NotFound(format!("Task {} not found", id))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
