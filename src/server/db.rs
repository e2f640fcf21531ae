use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, params};
use taskboard_common::{
    Board, ColumnWithTasks, CreateColumnInput, CreateTaskInput, KanbanColumn, Priority, Project,
    Task, Team, UpdateColumnInput, UpdateTaskInput,
};
use uuid::Uuid;

use crate::errors::BoardError;

const DEFAULT_COLUMN_COLOR: &str = "#64748b";
const DATE_FORMAT: &str = "%Y-%m-%d";

const TASK_FIELDS: &str = "t.id, t.kanban_column_id, t.sort_order, t.title, t.description, t.priority, \
     t.assignee_id, t.creator_id, t.start_date, t.end_date";

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads. The single mutex also serializes
/// every order assignment, so concurrent inserts cannot claim the same slot.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|_| BoardError::LockPoisoned.into())
    }
}

/// Team/project/board that owns a row, used to scope published events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardScope {
    pub team_id: String,
    pub project_id: String,
    pub board_id: String,
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS teams (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS boards (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS kanban_columns (
                    id TEXT PRIMARY KEY,
                    board_id TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    color TEXT NOT NULL DEFAULT '#64748b',
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    kanban_column_id TEXT NOT NULL REFERENCES kanban_columns(id) ON DELETE CASCADE,
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    title TEXT NOT NULL,
                    description TEXT,
                    priority TEXT NOT NULL DEFAULT 'medium',
                    assignee_id TEXT,
                    creator_id TEXT,
                    start_date TEXT,
                    end_date TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_projects_team ON projects(team_id);
                CREATE INDEX IF NOT EXISTS idx_boards_project ON boards(project_id);
                CREATE INDEX IF NOT EXISTS idx_columns_board ON kanban_columns(board_id, sort_order);
                CREATE INDEX IF NOT EXISTS idx_tasks_column ON tasks(kanban_column_id, sort_order);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Teams & projects ──────────────────────────────────────────────

    pub fn create_team(&self, name: &str) -> Result<Team> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO teams (id, name) VALUES (?1, ?2)",
                params![id, name],
            )
            .context("Failed to insert team")?;
        self.get_team(&id)?.context("Team not found after insert")
    }

    pub fn list_teams(&self) -> Result<Vec<Team>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM teams ORDER BY created_at, id")
            .context("Failed to prepare list_teams")?;
        let rows = stmt
            .query_map([], row_to_team)
            .context("Failed to query teams")?;
        let mut teams = Vec::new();
        for row in rows {
            teams.push(row.context("Failed to read team row")?);
        }
        Ok(teams)
    }

    pub fn get_team(&self, id: &str) -> Result<Option<Team>> {
        self.conn
            .query_row(
                "SELECT id, name, created_at FROM teams WHERE id = ?1",
                params![id],
                row_to_team,
            )
            .optional()
            .context("Failed to query team")
    }

    pub fn create_project(&self, team_id: &str, name: &str) -> Result<Project> {
        if self.get_team(team_id)?.is_none() {
            return Err(BoardError::TeamNotFound {
                id: team_id.to_string(),
            }
            .into());
        }
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO projects (id, team_id, name) VALUES (?1, ?2, ?3)",
                params![id, team_id, name],
            )
            .context("Failed to insert project")?;
        self.get_project(&id)?
            .context("Project not found after insert")
    }

    pub fn list_projects(&self, team_id: &str) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, team_id, name, created_at FROM projects
                 WHERE team_id = ?1 ORDER BY created_at, id",
            )
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map(params![team_id], row_to_project)
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?);
        }
        Ok(projects)
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT id, team_id, name, created_at FROM projects WHERE id = ?1",
                params![id],
                row_to_project,
            )
            .optional()
            .context("Failed to query project")
    }

    // ── Boards ────────────────────────────────────────────────────────

    pub fn create_board(&self, project_id: &str, name: &str) -> Result<Board> {
        if self.get_project(project_id)?.is_none() {
            return Err(BoardError::ProjectNotFound {
                id: project_id.to_string(),
            }
            .into());
        }
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO boards (id, project_id, name) VALUES (?1, ?2, ?3)",
                params![id, project_id, name],
            )
            .context("Failed to insert board")?;
        self.get_board(&id)?.context("Board not found after insert")
    }

    pub fn list_boards(&self, project_id: &str) -> Result<Vec<Board>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, project_id, name FROM boards
                 WHERE project_id = ?1 ORDER BY created_at, id",
            )
            .context("Failed to prepare list_boards")?;
        let rows = stmt
            .query_map(params![project_id], row_to_board)
            .context("Failed to query boards")?;
        let mut boards = Vec::new();
        for row in rows {
            boards.push(row.context("Failed to read board row")?);
        }
        Ok(boards)
    }

    pub fn get_board(&self, id: &str) -> Result<Option<Board>> {
        self.conn
            .query_row(
                "SELECT id, project_id, name FROM boards WHERE id = ?1",
                params![id],
                row_to_board,
            )
            .optional()
            .context("Failed to query board")
    }

    /// Columns of a board in order, each with its tasks in order.
    pub fn board_columns(&self, board_id: &str) -> Result<Vec<ColumnWithTasks>> {
        if self.get_board(board_id)?.is_none() {
            return Err(BoardError::BoardNotFound {
                id: board_id.to_string(),
            }
            .into());
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, board_id, name, color, sort_order FROM kanban_columns
                 WHERE board_id = ?1 ORDER BY sort_order, id",
            )
            .context("Failed to prepare board columns")?;
        let rows = stmt
            .query_map(params![board_id], row_to_column)
            .context("Failed to query board columns")?;
        let mut columns = Vec::new();
        for row in rows {
            columns.push(ColumnWithTasks::empty(
                row.context("Failed to read column row")?,
            ));
        }

        let sql = format!(
            "SELECT {TASK_FIELDS} FROM tasks t
             JOIN kanban_columns c ON c.id = t.kanban_column_id
             WHERE c.board_id = ?1 ORDER BY t.sort_order, t.id"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare board tasks")?;
        let rows = stmt
            .query_map(params![board_id], TaskRow::from_row)
            .context("Failed to query board tasks")?;

        let index: HashMap<String, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.column.id.clone(), i))
            .collect();
        for row in rows {
            let task = row.context("Failed to read task row")?.into_task()?;
            if let Some(&i) = index.get(&task.kanban_column_id) {
                columns[i].tasks.push(task);
            }
        }
        Ok(columns)
    }

    pub fn board_scope(&self, board_id: &str) -> Result<BoardScope> {
        self.conn
            .query_row(
                "SELECT p.team_id, b.project_id, b.id FROM boards b
                 JOIN projects p ON p.id = b.project_id
                 WHERE b.id = ?1",
                params![board_id],
                row_to_scope,
            )
            .optional()
            .context("Failed to query board scope")?
            .ok_or_else(|| {
                BoardError::BoardNotFound {
                    id: board_id.to_string(),
                }
                .into()
            })
    }

    pub fn column_scope(&self, column_id: &str) -> Result<BoardScope> {
        self.conn
            .query_row(
                "SELECT p.team_id, b.project_id, b.id FROM kanban_columns c
                 JOIN boards b ON b.id = c.board_id
                 JOIN projects p ON p.id = b.project_id
                 WHERE c.id = ?1",
                params![column_id],
                row_to_scope,
            )
            .optional()
            .context("Failed to query column scope")?
            .ok_or_else(|| {
                BoardError::ColumnNotFound {
                    id: column_id.to_string(),
                }
                .into()
            })
    }

    // ── Columns ───────────────────────────────────────────────────────

    pub fn get_column(&self, id: &str) -> Result<Option<KanbanColumn>> {
        self.conn
            .query_row(
                "SELECT id, board_id, name, color, sort_order FROM kanban_columns WHERE id = ?1",
                params![id],
                row_to_column,
            )
            .optional()
            .context("Failed to query column")
    }

    /// Insert a column at `input.order` (or last), shifting later siblings.
    pub fn create_column(&self, input: &CreateColumnInput) -> Result<KanbanColumn> {
        if self.get_board(&input.board_id)?.is_none() {
            return Err(BoardError::BoardNotFound {
                id: input.board_id.clone(),
            }
            .into());
        }

        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let count: i32 = tx
            .query_row(
                "SELECT COUNT(*) FROM kanban_columns WHERE board_id = ?1",
                params![input.board_id],
                |row| row.get(0),
            )
            .context("Failed to count columns")?;
        let order = insert_position(input.order, count)?;

        tx.execute(
            "UPDATE kanban_columns SET sort_order = sort_order + 1
             WHERE board_id = ?1 AND sort_order >= ?2",
            params![input.board_id, order],
        )
        .context("Failed to shift columns")?;

        let id = Uuid::new_v4().to_string();
        let color = input.color.as_deref().unwrap_or(DEFAULT_COLUMN_COLOR);
        tx.execute(
            "INSERT INTO kanban_columns (id, board_id, name, color, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, input.board_id, input.name, color, order],
        )
        .context("Failed to insert column")?;

        tx.commit().context("Failed to commit column insert")?;
        self.get_column(&id)?.context("Column not found after insert")
    }

    /// Update name, color and position. A new `order` moves the column: the
    /// gap it leaves is closed and later siblings shift to make room, so
    /// board orders stay dense.
    pub fn update_column(&self, input: &UpdateColumnInput) -> Result<KanbanColumn> {
        if let Some(order) = input.order {
            if order < 0 {
                return Err(BoardError::InvalidOrder { order }.into());
            }
        }
        let current = self
            .get_column(&input.id)?
            .ok_or_else(|| BoardError::ColumnNotFound {
                id: input.id.clone(),
            })?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(name) = &input.name {
            tx.execute(
                "UPDATE kanban_columns SET name = ?1 WHERE id = ?2",
                params![name, input.id],
            )
            .context("Failed to update column name")?;
        }
        if let Some(color) = &input.color {
            tx.execute(
                "UPDATE kanban_columns SET color = ?1 WHERE id = ?2",
                params![color, input.id],
            )
            .context("Failed to update column color")?;
        }
        if let Some(requested) = input.order {
            tx.execute(
                "UPDATE kanban_columns SET sort_order = sort_order - 1
                 WHERE board_id = ?1 AND sort_order > ?2 AND id != ?3",
                params![current.board_id, current.order, input.id],
            )
            .context("Failed to compact columns")?;
            let siblings: i32 = tx
                .query_row(
                    "SELECT COUNT(*) FROM kanban_columns WHERE board_id = ?1 AND id != ?2",
                    params![current.board_id, input.id],
                    |row| row.get(0),
                )
                .context("Failed to count columns")?;
            let order = insert_position(Some(requested), siblings)?;
            tx.execute(
                "UPDATE kanban_columns SET sort_order = sort_order + 1
                 WHERE board_id = ?1 AND sort_order >= ?2 AND id != ?3",
                params![current.board_id, order, input.id],
            )
            .context("Failed to shift columns")?;
            tx.execute(
                "UPDATE kanban_columns SET sort_order = ?1 WHERE id = ?2",
                params![order, input.id],
            )
            .context("Failed to update column order")?;
        }
        tx.commit().context("Failed to commit column update")?;

        self.get_column(&input.id)?
            .context("Column not found after update")
    }

    /// Delete a column (and its tasks) and close the gap it leaves.
    /// Returns the deleted row, or `None` if it did not exist.
    pub fn delete_column(&self, id: &str) -> Result<Option<KanbanColumn>> {
        let Some(column) = self.get_column(id)? else {
            return Ok(None);
        };

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM kanban_columns WHERE id = ?1", params![id])
            .context("Failed to delete column")?;
        tx.execute(
            "UPDATE kanban_columns SET sort_order = sort_order - 1
             WHERE board_id = ?1 AND sort_order > ?2",
            params![column.board_id, column.order],
        )
        .context("Failed to compact columns")?;
        tx.commit().context("Failed to commit column delete")?;

        Ok(Some(column))
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_FIELDS} FROM tasks t WHERE t.id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], TaskRow::from_row)
            .optional()
            .context("Failed to query task")?;
        row.map(TaskRow::into_task).transpose()
    }

    /// Insert a task at `input.order` (or last) in its column, shifting later
    /// siblings.
    pub fn create_task(&self, input: &CreateTaskInput) -> Result<Task> {
        if self.get_column(&input.kanban_column_id)?.is_none() {
            return Err(BoardError::ColumnNotFound {
                id: input.kanban_column_id.clone(),
            }
            .into());
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let count: i32 = tx
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE kanban_column_id = ?1",
                params![input.kanban_column_id],
                |row| row.get(0),
            )
            .context("Failed to count tasks")?;
        let order = insert_position(input.order, count)?;

        tx.execute(
            "UPDATE tasks SET sort_order = sort_order + 1
             WHERE kanban_column_id = ?1 AND sort_order >= ?2",
            params![input.kanban_column_id, order],
        )
        .context("Failed to shift tasks")?;

        let priority = input.priority.unwrap_or_default();
        tx.execute(
            "INSERT INTO tasks (kanban_column_id, sort_order, title, description, priority,
                                assignee_id, creator_id, start_date, end_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                input.kanban_column_id,
                order,
                input.title,
                input.description,
                priority.as_str(),
                input.assignee_id,
                input.creator_id,
                input.start_date.map(format_date),
                input.end_date.map(format_date),
            ],
        )
        .context("Failed to insert task")?;
        let id = tx.last_insert_rowid();

        tx.commit().context("Failed to commit task insert")?;
        self.get_task(id)?.context("Task not found after insert")
    }

    /// Update a task's fields. A new column or order moves the task: its old
    /// column is compacted and the target column shifts to make room, so
    /// orders stay dense in both. A task may only move between columns of
    /// the same board; a column change without an order appends.
    pub fn update_task(&self, input: &UpdateTaskInput) -> Result<Task> {
        if let Some(order) = input.order {
            if order < 0 {
                return Err(BoardError::InvalidOrder { order }.into());
            }
        }
        let current = self
            .get_task(input.id)?
            .ok_or(BoardError::TaskNotFound { id: input.id })?;

        if let Some(target) = &input.kanban_column_id {
            if *target != current.kanban_column_id {
                let from = self.column_scope(&current.kanban_column_id)?;
                let to = self.column_scope(target)?;
                if from.board_id != to.board_id {
                    return Err(BoardError::BadRequest(format!(
                        "Task {} cannot move to column {} on another board",
                        input.id, target
                    ))
                    .into());
                }
            }
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        if input.kanban_column_id.is_some() || input.order.is_some() {
            let target = input
                .kanban_column_id
                .as_deref()
                .unwrap_or(&current.kanban_column_id);
            let requested = match input.order {
                Some(order) => Some(order),
                None if target != current.kanban_column_id => None,
                None => Some(current.order),
            };

            tx.execute(
                "UPDATE tasks SET sort_order = sort_order - 1
                 WHERE kanban_column_id = ?1 AND sort_order > ?2 AND id != ?3",
                params![current.kanban_column_id, current.order, input.id],
            )
            .context("Failed to compact tasks")?;
            let siblings: i32 = tx
                .query_row(
                    "SELECT COUNT(*) FROM tasks WHERE kanban_column_id = ?1 AND id != ?2",
                    params![target, input.id],
                    |row| row.get(0),
                )
                .context("Failed to count tasks")?;
            let order = insert_position(requested, siblings)?;
            tx.execute(
                "UPDATE tasks SET sort_order = sort_order + 1
                 WHERE kanban_column_id = ?1 AND sort_order >= ?2 AND id != ?3",
                params![target, order, input.id],
            )
            .context("Failed to shift tasks")?;
            tx.execute(
                "UPDATE tasks SET kanban_column_id = ?1, sort_order = ?2,
                                  updated_at = datetime('now')
                 WHERE id = ?3",
                params![target, order, input.id],
            )
            .context("Failed to update task position")?;
        }
        if let Some(title) = &input.title {
            tx.execute(
                "UPDATE tasks SET title = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![title, input.id],
            )
            .context("Failed to update task title")?;
        }
        if let Some(description) = &input.description {
            tx.execute(
                "UPDATE tasks SET description = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![description, input.id],
            )
            .context("Failed to update task description")?;
        }
        if let Some(priority) = input.priority {
            tx.execute(
                "UPDATE tasks SET priority = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![priority.as_str(), input.id],
            )
            .context("Failed to update task priority")?;
        }
        if let Some(assignee) = &input.assignee_id {
            tx.execute(
                "UPDATE tasks SET assignee_id = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![assignee, input.id],
            )
            .context("Failed to update task assignee")?;
        }
        if let Some(start) = input.start_date {
            tx.execute(
                "UPDATE tasks SET start_date = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![format_date(start), input.id],
            )
            .context("Failed to update task start date")?;
        }
        if let Some(end) = input.end_date {
            tx.execute(
                "UPDATE tasks SET end_date = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![format_date(end), input.id],
            )
            .context("Failed to update task end date")?;
        }

        tx.commit().context("Failed to commit task update")?;
        self.get_task(input.id)?
            .context("Task not found after update")
    }

    /// Delete a task and close the gap in its column.
    /// Returns the deleted row, or `None` if it did not exist.
    pub fn delete_task(&self, id: i64) -> Result<Option<Task>> {
        let Some(task) = self.get_task(id)? else {
            return Ok(None);
        };

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        tx.execute(
            "UPDATE tasks SET sort_order = sort_order - 1
             WHERE kanban_column_id = ?1 AND sort_order > ?2",
            params![task.kanban_column_id, task.order],
        )
        .context("Failed to compact tasks")?;
        tx.commit().context("Failed to commit task delete")?;

        Ok(Some(task))
    }
}

/// Clamp a requested insert position to `0..=count`; `None` appends.
fn insert_position(requested: Option<i32>, count: i32) -> Result<i32> {
    match requested {
        None => Ok(count),
        Some(order) if order < 0 => Err(BoardError::InvalidOrder { order }.into()),
        Some(order) => Ok(order.min(count)),
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(raw: Option<String>) -> Result<Option<NaiveDate>> {
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, DATE_FORMAT)
            .with_context(|| format!("Invalid stored date '{}'", s))
    })
    .transpose()
}

fn row_to_team(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        team_id: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_board(row: &Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
    })
}

fn row_to_column(row: &Row<'_>) -> rusqlite::Result<KanbanColumn> {
    Ok(KanbanColumn {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
        order: row.get(4)?,
    })
}

fn row_to_scope(row: &Row<'_>) -> rusqlite::Result<BoardScope> {
    Ok(BoardScope {
        team_id: row.get(0)?,
        project_id: row.get(1)?,
        board_id: row.get(2)?,
    })
}

/// Raw task row; priority and dates are stored as text.
struct TaskRow {
    id: i64,
    kanban_column_id: String,
    sort_order: i32,
    title: String,
    description: Option<String>,
    priority: String,
    assignee_id: Option<String>,
    creator_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kanban_column_id: row.get(1)?,
            sort_order: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            priority: row.get(5)?,
            assignee_id: row.get(6)?,
            creator_id: row.get(7)?,
            start_date: row.get(8)?,
            end_date: row.get(9)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let priority = Priority::from_str(&self.priority).map_err(|e| anyhow::anyhow!(e))?;
        Ok(Task {
            id: self.id,
            kanban_column_id: self.kanban_column_id,
            order: self.sort_order,
            title: self.title,
            description: self.description,
            priority,
            assignee_id: self.assignee_id,
            creator_id: self.creator_id,
            start_date: parse_date(self.start_date)?,
            end_date: parse_date(self.end_date)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        db: BoardDb,
        board: Board,
    }

    fn fixture() -> Fixture {
        let db = BoardDb::new_in_memory().unwrap();
        let team = db.create_team("Core").unwrap();
        let project = db.create_project(&team.id, "Roadmap").unwrap();
        let board = db.create_board(&project.id, "Sprint").unwrap();
        Fixture { db, board }
    }

    fn add_column(f: &Fixture, name: &str, order: Option<i32>) -> KanbanColumn {
        f.db.create_column(&CreateColumnInput {
            board_id: f.board.id.clone(),
            name: name.to_string(),
            color: None,
            order,
        })
        .unwrap()
    }

    fn add_task(db: &BoardDb, column_id: &str, title: &str, order: Option<i32>) -> Task {
        db.create_task(&CreateTaskInput {
            kanban_column_id: column_id.to_string(),
            title: title.to_string(),
            order,
            ..Default::default()
        })
        .unwrap()
    }

    fn column_orders(f: &Fixture) -> Vec<(String, i32)> {
        f.db.board_columns(&f.board.id)
            .unwrap()
            .into_iter()
            .map(|c| (c.column.name, c.column.order))
            .collect()
    }

    fn task_orders(db: &BoardDb, board_id: &str, column_id: &str) -> Vec<(String, i32)> {
        db.board_columns(board_id)
            .unwrap()
            .into_iter()
            .find(|c| c.column.id == column_id)
            .unwrap()
            .tasks
            .into_iter()
            .map(|t| (t.title, t.order))
            .collect()
    }

    #[test]
    fn test_create_project_requires_team() {
        let db = BoardDb::new_in_memory().unwrap();
        let err = db.create_project("missing", "p").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::TeamNotFound { .. })
        ));
    }

    #[test]
    fn test_list_projects_and_boards_are_scoped() {
        let f = fixture();
        let other_team = f.db.create_team("Other").unwrap();
        f.db.create_project(&other_team.id, "Elsewhere").unwrap();

        let board_scope = f.db.board_scope(&f.board.id).unwrap();
        let projects = f.db.list_projects(&board_scope.team_id).unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "Roadmap");

        let boards = f.db.list_boards(&board_scope.project_id).unwrap();
        assert_eq!(boards, vec![f.board.clone()]);
    }

    #[test]
    fn test_columns_append_by_default() {
        let f = fixture();
        add_column(&f, "Todo", None);
        add_column(&f, "Doing", None);
        add_column(&f, "Done", None);
        assert_eq!(
            column_orders(&f),
            vec![
                ("Todo".to_string(), 0),
                ("Doing".to_string(), 1),
                ("Done".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_column_insert_shifts_later_siblings() {
        let f = fixture();
        add_column(&f, "x", None);
        add_column(&f, "y", None);
        add_column(&f, "z", Some(1));
        assert_eq!(
            column_orders(&f),
            vec![("x".to_string(), 0), ("z".to_string(), 1), ("y".to_string(), 2)]
        );
    }

    #[test]
    fn test_column_insert_past_end_is_clamped() {
        let f = fixture();
        add_column(&f, "x", None);
        let col = add_column(&f, "y", Some(10));
        assert_eq!(col.order, 1);
    }

    #[test]
    fn test_column_negative_order_rejected() {
        let f = fixture();
        let err = f
            .db
            .create_column(&CreateColumnInput {
                board_id: f.board.id.clone(),
                name: "bad".to_string(),
                color: None,
                order: Some(-1),
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::InvalidOrder { order: -1 })
        ));
    }

    #[test]
    fn test_delete_column_compacts_and_cascades() {
        let f = fixture();
        add_column(&f, "a", None);
        let b = add_column(&f, "b", None);
        add_column(&f, "c", None);
        let task = add_task(&f.db, &b.id, "inside b", None);

        let deleted = f.db.delete_column(&b.id).unwrap().unwrap();
        assert_eq!(deleted.id, b.id);
        assert_eq!(
            column_orders(&f),
            vec![("a".to_string(), 0), ("c".to_string(), 1)]
        );
        assert!(f.db.get_task(task.id).unwrap().is_none());
        assert!(f.db.delete_column(&b.id).unwrap().is_none());
    }

    #[test]
    fn test_update_column_keeps_unspecified_fields() {
        let f = fixture();
        let col = add_column(&f, "Todo", None);
        let updated = f
            .db
            .update_column(&UpdateColumnInput {
                id: col.id.clone(),
                color: Some("#ff0000".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.name, "Todo");
        assert_eq!(updated.color, "#ff0000");
        assert_eq!(updated.order, 0);
    }

    #[test]
    fn test_update_missing_column_is_not_found() {
        let f = fixture();
        let err = f
            .db
            .update_column(&UpdateColumnInput::reposition("nope", 0))
            .unwrap_err();
        assert!(err.downcast_ref::<BoardError>().unwrap().is_not_found());
    }

    #[test]
    fn test_task_insert_positions_are_dense() {
        let f = fixture();
        let col = add_column(&f, "Todo", None);
        add_task(&f.db, &col.id, "a", None);
        add_task(&f.db, &col.id, "b", None);
        add_task(&f.db, &col.id, "first", Some(0));
        assert_eq!(
            task_orders(&f.db, &f.board.id, &col.id),
            vec![
                ("first".to_string(), 0),
                ("a".to_string(), 1),
                ("b".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_delete_task_compacts_column() {
        let f = fixture();
        let col = add_column(&f, "Todo", None);
        add_task(&f.db, &col.id, "a", None);
        let b = add_task(&f.db, &col.id, "b", None);
        add_task(&f.db, &col.id, "c", None);

        let deleted = f.db.delete_task(b.id).unwrap().unwrap();
        assert_eq!(deleted.kanban_column_id, col.id);
        assert_eq!(
            task_orders(&f.db, &f.board.id, &col.id),
            vec![("a".to_string(), 0), ("c".to_string(), 1)]
        );
        assert!(f.db.delete_task(b.id).unwrap().is_none());
    }

    #[test]
    fn test_update_task_moves_between_columns() {
        let f = fixture();
        let a = add_column(&f, "A", None);
        let b = add_column(&f, "B", None);
        let task = add_task(&f.db, &a.id, "mover", None);

        let moved = f
            .db
            .update_task(&UpdateTaskInput::reposition(task.id, b.id.clone(), 0))
            .unwrap();
        assert_eq!(moved.kanban_column_id, b.id);
        assert_eq!(moved.order, 0);
        assert_eq!(moved.title, "mover");
    }

    #[test]
    fn test_update_task_rejects_cross_board_move() {
        let f = fixture();
        let a = add_column(&f, "A", None);
        let scope = f.db.board_scope(&f.board.id).unwrap();
        let other_board = f.db.create_board(&scope.project_id, "Other").unwrap();
        let foreign = f
            .db
            .create_column(&CreateColumnInput {
                board_id: other_board.id.clone(),
                name: "Elsewhere".to_string(),
                color: None,
                order: None,
            })
            .unwrap();
        let task = add_task(&f.db, &a.id, "stay", None);

        let err = f
            .db
            .update_task(&UpdateTaskInput::reposition(task.id, foreign.id, 0))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::BadRequest(_))
        ));
    }

    fn names(orders: &[(String, i32)]) -> Vec<&str> {
        orders.iter().map(|(name, _)| name.as_str()).collect()
    }

    fn assert_dense(orders: &[(String, i32)]) {
        let got: Vec<i32> = orders.iter().map(|(_, order)| *order).collect();
        let want: Vec<i32> = (0..orders.len() as i32).collect();
        assert_eq!(got, want, "orders not dense: {:?}", orders);
    }

    #[test]
    fn test_task_move_across_columns_keeps_both_dense() {
        let f = fixture();
        let a = add_column(&f, "A", None);
        let b = add_column(&f, "B", None);
        let t1 = add_task(&f.db, &a.id, "t1", None);
        add_task(&f.db, &a.id, "t2", None);
        add_task(&f.db, &a.id, "t3", None);
        add_task(&f.db, &b.id, "t4", None);

        f.db.update_task(&UpdateTaskInput::reposition(t1.id, b.id.clone(), 0))
            .unwrap();

        let in_a = task_orders(&f.db, &f.board.id, &a.id);
        let in_b = task_orders(&f.db, &f.board.id, &b.id);
        assert_eq!(names(&in_a), vec!["t2", "t3"]);
        assert_eq!(names(&in_b), vec!["t1", "t4"]);
        assert_dense(&in_a);
        assert_dense(&in_b);
    }

    #[test]
    fn test_task_move_within_column_keeps_dense() {
        let f = fixture();
        let a = add_column(&f, "A", None);
        let t1 = add_task(&f.db, &a.id, "t1", None);
        add_task(&f.db, &a.id, "t2", None);
        add_task(&f.db, &a.id, "t3", None);
        let t4 = add_task(&f.db, &a.id, "t4", None);

        f.db.update_task(&UpdateTaskInput::reposition(t1.id, a.id.clone(), 2))
            .unwrap();
        let orders = task_orders(&f.db, &f.board.id, &a.id);
        assert_eq!(names(&orders), vec!["t2", "t3", "t1", "t4"]);
        assert_dense(&orders);

        let moved = f
            .db
            .update_task(&UpdateTaskInput {
                id: t4.id,
                order: Some(0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(moved.order, 0);
        let orders = task_orders(&f.db, &f.board.id, &a.id);
        assert_eq!(names(&orders), vec!["t4", "t2", "t3", "t1"]);
        assert_dense(&orders);

        let clamped = f
            .db
            .update_task(&UpdateTaskInput::reposition(t4.id, a.id.clone(), 99))
            .unwrap();
        assert_eq!(clamped.order, 3);
        assert_dense(&task_orders(&f.db, &f.board.id, &a.id));
    }

    #[test]
    fn test_task_column_change_without_order_appends() {
        let f = fixture();
        let a = add_column(&f, "A", None);
        let b = add_column(&f, "B", None);
        let t1 = add_task(&f.db, &a.id, "t1", None);
        add_task(&f.db, &a.id, "t2", None);
        add_task(&f.db, &b.id, "t3", None);

        let moved = f
            .db
            .update_task(&UpdateTaskInput {
                id: t1.id,
                kanban_column_id: Some(b.id.clone()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(moved.order, 1);
        assert_eq!(
            task_orders(&f.db, &f.board.id, &a.id),
            vec![("t2".to_string(), 0)]
        );
        assert_eq!(
            task_orders(&f.db, &f.board.id, &b.id),
            vec![("t3".to_string(), 0), ("t1".to_string(), 1)]
        );
    }

    #[test]
    fn test_column_move_keeps_board_dense() {
        let f = fixture();
        add_column(&f, "A", None);
        add_column(&f, "B", None);
        let c = add_column(&f, "C", None);
        add_column(&f, "D", None);

        f.db.update_column(&UpdateColumnInput::reposition(c.id.clone(), 0))
            .unwrap();
        let orders = column_orders(&f);
        assert_eq!(names(&orders), vec!["C", "A", "B", "D"]);
        assert_dense(&orders);

        let a = f.db.board_columns(&f.board.id).unwrap()[1].column.clone();
        let moved = f
            .db
            .update_column(&UpdateColumnInput::reposition(a.id, 10))
            .unwrap();
        assert_eq!(moved.order, 3);
        let orders = column_orders(&f);
        assert_eq!(names(&orders), vec!["C", "B", "D", "A"]);
        assert_dense(&orders);
    }

    #[test]
    fn test_partial_column_batch_leaves_board_dense() {
        let f = fixture();
        let ids: HashMap<String, String> = ["A", "B", "C", "D", "E"]
            .into_iter()
            .map(|name| (name.to_string(), add_column(&f, name, None).id))
            .collect();
        // A client dragging [A,B,C,D,E] into [C,B,E,D,A] sends these in order.
        let batch: Vec<UpdateColumnInput> = ["C", "B", "E", "D", "A"]
            .iter()
            .enumerate()
            .map(|(i, name)| UpdateColumnInput::reposition(ids[*name].clone(), i as i32))
            .collect();

        for update in &batch[..2] {
            f.db.update_column(update).unwrap();
        }
        let partial = column_orders(&f);
        assert_eq!(names(&partial), vec!["C", "B", "A", "D", "E"]);
        assert_dense(&partial);

        for update in &batch[2..] {
            f.db.update_column(update).unwrap();
        }
        let done = column_orders(&f);
        assert_eq!(names(&done), vec!["C", "B", "E", "D", "A"]);
        assert_dense(&done);
    }

    #[test]
    fn test_task_dates_and_priority_roundtrip() {
        let f = fixture();
        let col = add_column(&f, "Todo", None);
        let created = f
            .db
            .create_task(&CreateTaskInput {
                kanban_column_id: col.id.clone(),
                title: "dated".to_string(),
                priority: Some(Priority::Urgent),
                start_date: NaiveDate::from_ymd_opt(2024, 5, 1),
                end_date: NaiveDate::from_ymd_opt(2024, 5, 3),
                ..Default::default()
            })
            .unwrap();
        let fetched = f.db.get_task(created.id).unwrap().unwrap();
        assert_eq!(fetched.priority, Priority::Urgent);
        assert_eq!(fetched.start_date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(fetched.end_date, NaiveDate::from_ymd_opt(2024, 5, 3));
    }

    #[test]
    fn test_column_scope_resolves_team_and_project() {
        let f = fixture();
        let col = add_column(&f, "Todo", None);
        let scope = f.db.column_scope(&col.id).unwrap();
        assert_eq!(scope, f.db.board_scope(&f.board.id).unwrap());
        assert_eq!(scope.board_id, f.board.id);
    }

    #[test]
    fn test_board_columns_missing_board() {
        let db = BoardDb::new_in_memory().unwrap();
        let err = db.board_columns("nope").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::BoardNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_db_handle_call_runs_closure() {
        let handle = DbHandle::new(BoardDb::new_in_memory().unwrap());
        let team = handle
            .call(|db| db.create_team("async"))
            .await
            .unwrap();
        let teams = handle.call(|db| db.list_teams()).await.unwrap();
        assert_eq!(teams, vec![team]);
    }

    #[test]
    fn test_on_disk_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.db");
        {
            let db = BoardDb::new(&path).unwrap();
            db.create_team("persisted").unwrap();
        }
        let db = BoardDb::new(&path).unwrap();
        assert_eq!(db.list_teams().unwrap()[0].name, "persisted");
    }
}
