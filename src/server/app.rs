use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use taskboard_common::{Board, CreateColumnInput};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState, SharedState};
use super::broker::{Broker, DEFAULT_CAPACITY};
use super::db::{BoardDb, DbHandle};

const DEMO_COLUMNS: [(&str, &str); 3] = [
    ("To Do", "#64748b"),
    ("In Progress", "#3b82f6"),
    ("Done", "#22c55e"),
];

/// Configuration for the taskboard server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub broker_capacity: usize,
    /// Seed a demo team, project and board when the database is empty.
    pub init_demo: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            db_path: PathBuf::from(".taskboard/taskboard.db"),
            dev_mode: false,
            broker_capacity: DEFAULT_CAPACITY,
            init_demo: false,
        }
    }
}

/// Build the full application router: REST API, subscription socket and
/// request tracing. Dev mode adds permissive CORS.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Create the demo board if no team exists yet. Returns the board when one
/// was created.
pub fn init_demo_board(db: &BoardDb) -> Result<Option<Board>> {
    if !db.list_teams()?.is_empty() {
        return Ok(None);
    }
    let team = db.create_team("Demo team")?;
    let project = db.create_project(&team.id, "Demo project")?;
    let board = db.create_board(&project.id, "Board")?;
    for (name, color) in DEMO_COLUMNS {
        db.create_column(&CreateColumnInput {
            board_id: board.id.clone(),
            name: name.to_string(),
            color: Some(color.to_string()),
            order: None,
        })?;
    }
    tracing::info!(
        team_id = %team.id,
        project_id = %project.id,
        board_id = %board.id,
        "Seeded demo board"
    );
    Ok(Some(board))
}

/// Start the taskboard server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    // Ensure parent directory exists for DB
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }

    let db = BoardDb::new(&config.db_path).with_context(|| {
        format!(
            "Failed to initialize database at {}",
            config.db_path.display()
        )
    })?;
    if config.init_demo {
        if let Some(board) = init_demo_board(&db)? {
            let scope = db.board_scope(&board.id)?;
            println!(
                "Demo board ready: --team {} --project {} --board {}",
                scope.team_id, scope.project_id, scope.board_id
            );
        }
    }

    let state = Arc::new(AppState::new(
        DbHandle::new(db),
        Broker::new(config.broker_capacity),
    ));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    println!("Taskboard running at http://{}", local_addr);

    serve(listener, state, config.dev_mode, shutdown_signal()).await?;

    println!("Server shut down gracefully.");
    Ok(())
}

/// Serve on an already-bound listener until `shutdown` resolves. Live
/// subscriptions are cancelled when shutdown begins so graceful shutdown
/// does not wait on open sockets.
pub async fn serve<F>(
    listener: TcpListener,
    state: SharedState,
    dev_mode: bool,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = state.shutdown.clone();
    let app = build_router(state, dev_mode);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            token.cancel();
        })
        .await
        .context("Server error")?;
    Ok(())
}

/// Bind an ephemeral port and serve in the background. Returns the bound
/// address; cancelling `state.shutdown` stops the server.
pub async fn spawn_ephemeral(state: SharedState) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("Failed to bind ephemeral port")?;
    let addr = listener.local_addr()?;
    let token = state.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = serve(listener, state, false, token.cancelled_owned()).await {
            tracing::error!(error = %e, "Background server failed");
        }
    });
    Ok(addr)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => println!("\nShutting down..."),
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
