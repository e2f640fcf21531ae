//! Optimistic drag-and-drop reordering.
//!
//! Each operation runs in three steps:
//!
//! 1. Under one cache lock: check the board is cached and at rest, take a
//!    [`Snapshot`], apply the new arrangement and mark the view `Optimistic`.
//! 2. Without the lock: persist the moved items, one call at a time.
//! 3. Under the lock again: mark the view `Reconciled`, or on the first
//!    failure restore the snapshot, mark it `RolledBack` and stale, then
//!    re-fetch stale boards so writes that did land show up.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use taskboard_common::{ColumnWithTasks, UpdateColumnInput, UpdateTaskInput};

use super::api::KanbanApi;
use super::cache::{self, BoardKey, SharedCache, Snapshot, ViewState};
use super::reconcile::{renumber_columns, renumber_tasks};
use super::sync::refresh_stale;
use crate::errors::{ReorderError, SyncError};

enum Persist {
    Columns(Vec<UpdateColumnInput>),
    Tasks(Vec<UpdateTaskInput>),
}

impl Persist {
    fn is_empty(&self) -> bool {
        match self {
            Self::Columns(updates) => updates.is_empty(),
            Self::Tasks(updates) => updates.is_empty(),
        }
    }
}

pub struct ReorderController {
    api: Arc<dyn KanbanApi>,
    cache: SharedCache,
}

impl ReorderController {
    pub fn new(api: Arc<dyn KanbanApi>, cache: SharedCache) -> Self {
        Self { api, cache }
    }

    /// Drop the board's columns into `arrangement` (every column id exactly
    /// once, in the new display order).
    pub async fn reorder_columns(
        &self,
        key: &BoardKey,
        arrangement: &[String],
    ) -> Result<(), ReorderError> {
        let arrangement = arrangement.to_vec();
        self.run(key, move |columns| {
            arrange_columns(columns, &arrangement)
        })
        .await
    }

    /// Drag one column to `to_index` (clamped to the last slot).
    pub async fn move_column(
        &self,
        key: &BoardKey,
        column_id: &str,
        to_index: usize,
    ) -> Result<(), ReorderError> {
        let column_id = column_id.to_string();
        self.run(key, move |columns| {
            let Some(from) = columns.iter().position(|c| c.column.id == column_id) else {
                return Err(ReorderError::UnknownColumn { id: column_id });
            };
            let mut arrangement: Vec<String> =
                columns.iter().map(|c| c.column.id.clone()).collect();
            let moved = arrangement.remove(from);
            let at = to_index.min(arrangement.len());
            arrangement.insert(at, moved);
            arrange_columns(columns, &arrangement)
        })
        .await
    }

    /// Drag a task into `to_column_id` at `to_index` (clamped to the end of
    /// that column). Works within one column or across columns.
    pub async fn move_task(
        &self,
        key: &BoardKey,
        task_id: i64,
        to_column_id: &str,
        to_index: usize,
    ) -> Result<(), ReorderError> {
        let to_column_id = to_column_id.to_string();
        self.run(key, move |columns| {
            relocate_task(columns, task_id, &to_column_id, to_index)
        })
        .await
    }

    async fn run<F>(&self, key: &BoardKey, arrange: F) -> Result<(), ReorderError>
    where
        F: FnOnce(&mut Vec<ColumnWithTasks>) -> Result<Persist, ReorderError>,
    {
        let (snapshot, persist) = {
            let mut cache = cache::lock(&self.cache);
            let Some(entry) = cache.entry(key) else {
                return Err(ReorderError::NotCached {
                    board_id: key.board_id.clone(),
                });
            };
            if !entry.view.is_at_rest() {
                return Err(ReorderError::InFlight {
                    board_id: key.board_id.clone(),
                });
            }
            let Some(snapshot) = cache.snapshot(key) else {
                return Err(ReorderError::NotCached {
                    board_id: key.board_id.clone(),
                });
            };

            let mut columns = snapshot.columns().to_vec();
            let persist = arrange(&mut columns)?;
            if persist.is_empty() {
                return Ok(());
            }
            if let Some(entry) = cache.entry_mut(key) {
                entry.columns = columns;
                entry.view = ViewState::Optimistic;
            }
            (snapshot, persist)
        };

        match self.persist(persist).await {
            Ok(()) => {
                cache::lock(&self.cache).set_view(key, ViewState::Reconciled);
                Ok(())
            }
            Err(source) => {
                tracing::warn!(
                    board_id = %key.board_id,
                    error = %source,
                    "Reorder failed, restoring previous order"
                );
                self.roll_back(key, snapshot);
                if let Err(e) = refresh_stale(self.api.as_ref(), &self.cache).await {
                    tracing::warn!(
                        board_id = %key.board_id,
                        error = %e,
                        "Failed to re-fetch board after rollback"
                    );
                }
                Err(ReorderError::Persist { source })
            }
        }
    }

    /// Sequential on purpose: each write lands before the next is issued.
    async fn persist(&self, persist: Persist) -> Result<(), SyncError> {
        match persist {
            Persist::Columns(updates) => {
                for update in &updates {
                    self.api.update_kanban_column(update).await?;
                }
            }
            Persist::Tasks(updates) => {
                for update in &updates {
                    self.api.update_task(update).await?;
                }
            }
        }
        Ok(())
    }

    fn roll_back(&self, key: &BoardKey, snapshot: Snapshot) {
        let mut cache = cache::lock(&self.cache);
        cache.restore(snapshot);
        cache.set_view(key, ViewState::RolledBack);
        // Earlier calls in the batch may have been committed.
        cache.invalidate_board(key);
    }
}

/// The run from the first to the last item matching `moved`, inclusive.
///
/// The server places each write at its index and shifts siblings, so every
/// item inside the run is sent in final order, moved or not.
fn changed_span<T>(items: &[T], moved: impl Fn(&T) -> bool) -> &[T] {
    match (items.iter().position(&moved), items.iter().rposition(&moved)) {
        (Some(first), Some(last)) => &items[first..=last],
        _ => &[],
    }
}

/// Reorder `columns` to match `arrangement` and return the updates covering
/// every column whose order changed, in new display order.
fn arrange_columns(
    columns: &mut Vec<ColumnWithTasks>,
    arrangement: &[String],
) -> Result<Persist, ReorderError> {
    if arrangement.len() != columns.len() {
        return Err(ReorderError::InvalidArrangement(format!(
            "expected {} columns, got {}",
            columns.len(),
            arrangement.len()
        )));
    }
    let mut seen = HashSet::new();
    for id in arrangement {
        if !seen.insert(id.as_str()) {
            return Err(ReorderError::InvalidArrangement(format!(
                "column {} listed twice",
                id
            )));
        }
    }

    let previous: HashMap<String, i32> = columns
        .iter()
        .map(|c| (c.column.id.clone(), c.column.order))
        .collect();
    let mut by_id: HashMap<String, ColumnWithTasks> = columns
        .drain(..)
        .map(|c| (c.column.id.clone(), c))
        .collect();
    let mut arranged = Vec::with_capacity(arrangement.len());
    for id in arrangement {
        let column = by_id
            .remove(id)
            .ok_or_else(|| ReorderError::UnknownColumn { id: id.clone() })?;
        arranged.push(column);
    }
    renumber_columns(&mut arranged);

    let updates = changed_span(&arranged, |c| {
        previous.get(&c.column.id) != Some(&c.column.order)
    })
    .iter()
    .map(|c| UpdateColumnInput::reposition(c.column.id.clone(), c.column.order))
        .collect();
    *columns = arranged;
    Ok(Persist::Columns(updates))
}

/// Move one task and return `{id, kanbanColumnId, order}` updates covering
/// every task whose column or position changed: target column first, then
/// the source column's compacted siblings.
fn relocate_task(
    columns: &mut [ColumnWithTasks],
    task_id: i64,
    to_column_id: &str,
    to_index: usize,
) -> Result<Persist, ReorderError> {
    let Some(target) = columns.iter().position(|c| c.column.id == to_column_id) else {
        return Err(ReorderError::UnknownColumn {
            id: to_column_id.to_string(),
        });
    };
    let Some((source, from)) = columns.iter().enumerate().find_map(|(ci, c)| {
        c.tasks
            .iter()
            .position(|t| t.id == task_id)
            .map(|ti| (ci, ti))
    }) else {
        return Err(ReorderError::UnknownTask { id: task_id });
    };

    let previous: HashMap<i64, (String, i32)> = [source, target]
        .iter()
        .flat_map(|&ci| columns[ci].tasks.iter())
        .map(|t| (t.id, (t.kanban_column_id.clone(), t.order)))
        .collect();

    let mut task = columns[source].tasks.remove(from);
    renumber_tasks(&mut columns[source].tasks);
    task.kanban_column_id = to_column_id.to_string();
    let at = to_index.min(columns[target].tasks.len());
    columns[target].tasks.insert(at, task);
    renumber_tasks(&mut columns[target].tasks);

    let mut touched = vec![target];
    if source != target {
        touched.push(source);
    }
    let updates = touched
        .iter()
        .flat_map(|&ci| {
            changed_span(&columns[ci].tasks, |t| {
                previous.get(&t.id) != Some(&(t.kanban_column_id.clone(), t.order))
            })
        })
        .map(|t| UpdateTaskInput::reposition(t.id, t.kanban_column_id.clone(), t.order))
        .collect();
    Ok(Persist::Tasks(updates))
}
