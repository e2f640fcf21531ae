//! Client-side query cache: board snapshots keyed by `(projectId, boardId)`
//! plus each project's board list.
//!
//! Entries are never evicted by invalidation. A stale entry keeps serving its
//! last data until a refresh replaces it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use taskboard_common::{Board, ColumnWithTasks};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoardKey {
    pub project_id: String,
    pub board_id: String,
}

impl BoardKey {
    pub fn new(project_id: impl Into<String>, board_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            board_id: board_id.into(),
        }
    }
}

/// Optimistic-edit state of one board view.
///
/// `Idle` → `Optimistic` when a local reorder is applied ahead of the server;
/// `Optimistic` → `Reconciled` once every persistence call succeeded, or
/// `RolledBack` after the pre-drag snapshot was restored. Only `Optimistic`
/// blocks a new reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewState {
    #[default]
    Idle,
    Optimistic,
    Reconciled,
    RolledBack,
}

impl ViewState {
    pub fn is_at_rest(&self) -> bool {
        !matches!(self, Self::Optimistic)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardEntry {
    pub columns: Vec<ColumnWithTasks>,
    pub stale: bool,
    pub view: ViewState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardList {
    pub boards: Vec<Board>,
    pub stale: bool,
}

/// Pre-mutation copy of one board's columns. Handed back to
/// [`QueryCache::restore`] to undo an optimistic change.
#[derive(Debug, Clone)]
pub struct Snapshot {
    key: BoardKey,
    columns: Vec<ColumnWithTasks>,
}

impl Snapshot {
    pub fn key(&self) -> &BoardKey {
        &self.key
    }

    pub fn columns(&self) -> &[ColumnWithTasks] {
        &self.columns
    }
}

#[derive(Debug, Default)]
pub struct QueryCache {
    boards: HashMap<BoardKey, BoardEntry>,
    board_lists: HashMap<String, BoardList>,
}

pub type SharedCache = Arc<Mutex<QueryCache>>;

pub fn shared(cache: QueryCache) -> SharedCache {
    Arc::new(Mutex::new(cache))
}

/// Lock the cache. A panic elsewhere while holding the lock cannot leave the
/// cache half-written (every mutation is a single assignment or a sync
/// function), so a poisoned lock is recovered.
pub fn lock(cache: &SharedCache) -> MutexGuard<'_, QueryCache> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store freshly fetched columns. Clears the stale flag and keeps the
    /// current view state.
    pub fn set_columns(&mut self, key: BoardKey, columns: Vec<ColumnWithTasks>) {
        match self.boards.get_mut(&key) {
            Some(entry) => {
                entry.columns = columns;
                entry.stale = false;
            }
            None => {
                self.boards.insert(
                    key,
                    BoardEntry {
                        columns,
                        stale: false,
                        view: ViewState::Idle,
                    },
                );
            }
        }
    }

    pub fn entry(&self, key: &BoardKey) -> Option<&BoardEntry> {
        self.boards.get(key)
    }

    pub fn entry_mut(&mut self, key: &BoardKey) -> Option<&mut BoardEntry> {
        self.boards.get_mut(key)
    }

    pub fn columns(&self, key: &BoardKey) -> Option<&[ColumnWithTasks]> {
        self.boards.get(key).map(|e| e.columns.as_slice())
    }

    pub fn view_state(&self, key: &BoardKey) -> Option<ViewState> {
        self.boards.get(key).map(|e| e.view)
    }

    pub fn set_view(&mut self, key: &BoardKey, view: ViewState) {
        if let Some(entry) = self.boards.get_mut(key) {
            entry.view = view;
        }
    }

    pub fn set_boards(&mut self, project_id: impl Into<String>, boards: Vec<Board>) {
        self.board_lists.insert(
            project_id.into(),
            BoardList {
                boards,
                stale: false,
            },
        );
    }

    pub fn boards(&self, project_id: &str) -> Option<&BoardList> {
        self.board_lists.get(project_id)
    }

    pub fn invalidate_board(&mut self, key: &BoardKey) {
        if let Some(entry) = self.boards.get_mut(key) {
            entry.stale = true;
        }
    }

    /// Mark every board entry and the board list of a project stale.
    pub fn invalidate_project(&mut self, project_id: &str) {
        for (key, entry) in self.boards.iter_mut() {
            if key.project_id == project_id {
                entry.stale = true;
            }
        }
        if let Some(list) = self.board_lists.get_mut(project_id) {
            list.stale = true;
        }
    }

    pub fn stale_boards(&self) -> Vec<BoardKey> {
        let mut keys: Vec<BoardKey> = self
            .boards
            .iter()
            .filter(|(_, e)| e.stale)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn stale_board_lists(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .board_lists
            .iter()
            .filter(|(_, l)| l.stale)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self, key: &BoardKey) -> Option<Snapshot> {
        self.boards.get(key).map(|e| Snapshot {
            key: key.clone(),
            columns: e.columns.clone(),
        })
    }

    /// Put a board's columns back to the snapshot. No-op if the board has
    /// been dropped from the cache since.
    pub fn restore(&mut self, snapshot: Snapshot) {
        if let Some(entry) = self.boards.get_mut(&snapshot.key) {
            entry.columns = snapshot.columns;
        }
    }
}
