use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use taskboard_common::{
    Board, ColumnWithTasks, CreateColumnInput, CreateTaskInput, KanbanColumn, SubscriptionScope,
    Task, UpdateColumnInput, UpdateTaskInput,
};

use super::session::ClientSession;
use crate::errors::SyncError;

/// Request/response access to the board server.
///
/// Mutations identify the calling session so the resulting update events can
/// be recognised as echoes.
#[async_trait]
pub trait KanbanApi: Send + Sync {
    async fn create_task(&self, input: &CreateTaskInput) -> Result<Task, SyncError>;
    async fn update_task(&self, input: &UpdateTaskInput) -> Result<Task, SyncError>;
    async fn delete_task(&self, id: i64) -> Result<(), SyncError>;
    async fn create_kanban_column(
        &self,
        input: &CreateColumnInput,
    ) -> Result<KanbanColumn, SyncError>;
    async fn update_kanban_column(
        &self,
        input: &UpdateColumnInput,
    ) -> Result<KanbanColumn, SyncError>;
    async fn delete_kanban_column(&self, id: &str) -> Result<(), SyncError>;
    async fn list_boards(&self, project_id: &str) -> Result<Vec<Board>, SyncError>;
    async fn board_columns(&self, board_id: &str) -> Result<Vec<ColumnWithTasks>, SyncError>;
}

/// [`KanbanApi`] over HTTP with `reqwest`.
pub struct HttpKanbanApi {
    client: Client,
    base_url: Url,
    session: ClientSession,
}

impl HttpKanbanApi {
    pub fn new(server_url: &str, session: ClientSession) -> Result<Self, SyncError> {
        Ok(Self {
            client: Client::new(),
            base_url: parse_base_url(server_url)?,
            session,
        })
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// WebSocket URL of the subscription feed for `scope`, identifying this
    /// session as the recipient.
    pub fn subscribe_url(&self, scope: &SubscriptionScope) -> Result<Url, SyncError> {
        subscribe_url(&self.base_url, scope, &self.session)
    }

    fn url(&self, path: &str) -> Result<Url, SyncError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| SyncError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl KanbanApi for HttpKanbanApi {
    async fn create_task(&self, input: &CreateTaskInput) -> Result<Task, SyncError> {
        let resp = self
            .client
            .post(self.url("api/tasks")?)
            .headers(self.session.mutation_headers())
            .json(input)
            .send()
            .await?;
        decode(resp).await
    }

    async fn update_task(&self, input: &UpdateTaskInput) -> Result<Task, SyncError> {
        let resp = self
            .client
            .patch(self.url(&format!("api/tasks/{}", input.id))?)
            .headers(self.session.mutation_headers())
            .json(input)
            .send()
            .await?;
        decode(resp).await
    }

    async fn delete_task(&self, id: i64) -> Result<(), SyncError> {
        let resp = self
            .client
            .delete(self.url(&format!("api/tasks/{}", id))?)
            .headers(self.session.mutation_headers())
            .send()
            .await?;
        expect_success(resp).await
    }

    async fn create_kanban_column(
        &self,
        input: &CreateColumnInput,
    ) -> Result<KanbanColumn, SyncError> {
        let resp = self
            .client
            .post(self.url("api/kanban-columns")?)
            .headers(self.session.mutation_headers())
            .json(input)
            .send()
            .await?;
        decode(resp).await
    }

    async fn update_kanban_column(
        &self,
        input: &UpdateColumnInput,
    ) -> Result<KanbanColumn, SyncError> {
        let resp = self
            .client
            .patch(self.url(&format!("api/kanban-columns/{}", input.id))?)
            .headers(self.session.mutation_headers())
            .json(input)
            .send()
            .await?;
        decode(resp).await
    }

    async fn delete_kanban_column(&self, id: &str) -> Result<(), SyncError> {
        let resp = self
            .client
            .delete(self.url(&format!("api/kanban-columns/{}", id))?)
            .headers(self.session.mutation_headers())
            .send()
            .await?;
        expect_success(resp).await
    }

    async fn list_boards(&self, project_id: &str) -> Result<Vec<Board>, SyncError> {
        let resp = self
            .client
            .get(self.url(&format!("api/projects/{}/boards", project_id))?)
            .send()
            .await?;
        decode(resp).await
    }

    async fn board_columns(&self, board_id: &str) -> Result<Vec<ColumnWithTasks>, SyncError> {
        let resp = self
            .client
            .get(self.url(&format!("api/boards/{}/columns", board_id))?)
            .send()
            .await?;
        decode(resp).await
    }
}

fn parse_base_url(server_url: &str) -> Result<Url, SyncError> {
    let invalid = |message: String| SyncError::InvalidUrl {
        url: server_url.to_string(),
        message,
    };
    let mut url = Url::parse(server_url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    // Url::join replaces the last segment unless the path ends in '/'.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// `ws(s)://…/api/teams/{team}/projects/{project}/subscribe?clientId=…`
pub fn subscribe_url(
    base_url: &Url,
    scope: &SubscriptionScope,
    session: &ClientSession,
) -> Result<Url, SyncError> {
    let invalid = |message: String| SyncError::InvalidUrl {
        url: base_url.to_string(),
        message,
    };
    let mut url = base_url
        .join(&format!(
            "api/teams/{}/projects/{}/subscribe",
            scope.team_id, scope.project_id
        ))
        .map_err(|e| invalid(e.to_string()))?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot use scheme '{}'", scheme)))?;
    url.query_pairs_mut()
        .append_pair("clientId", &session.client_id().to_string());
    Ok(url)
}

async fn error_for_status(resp: Response) -> Result<Response, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
        .unwrap_or(body);
    Err(SyncError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, SyncError> {
    let bytes = error_for_status(resp).await?.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn expect_success(resp: Response) -> Result<(), SyncError> {
    error_for_status(resp).await.map(|_| ())
}
