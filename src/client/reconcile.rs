//! Applies live kanban events to the cached board views.
//!
//! Order handling mirrors the server: placing an item at `order = k` shifts
//! every sibling at `k` or later down by one, and removing an item closes the
//! gap. Column and task lists stay sorted with dense `0..N-1` orders, so any
//! replay of the same event converges on the same result.

use taskboard_common::{
    ColumnWithTasks, IncomingEvent, KanbanColumn, KanbanEvent, SubscriptionScope, Task, Tracked,
};

use super::cache::{self, BoardKey, SharedCache};
use super::session::ClientSession;

/// What [`Reconciler::apply`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Update originating from this session; cache left untouched.
    SkippedEcho,
    /// The board is not cached here.
    SkippedNotCached,
    /// Event belongs to another team or project.
    SkippedOutOfScope,
    /// Could not be patched in place; the affected entries were marked stale.
    Invalidated,
}

// ── Ordering primitives ──────────────────────────────────────────────

/// Set every task's `order` to its index.
pub fn renumber_tasks(tasks: &mut [Task]) {
    for (i, task) in tasks.iter_mut().enumerate() {
        task.order = i as i32;
    }
}

/// Set every column's `order` to its index.
pub fn renumber_columns(columns: &mut [ColumnWithTasks]) {
    for (i, column) in columns.iter_mut().enumerate() {
        column.column.order = i as i32;
    }
}

fn slot(order: i32, len: usize) -> usize {
    (order.max(0) as usize).min(len)
}

/// Remove a task by id from whichever column holds it, compacting that
/// column. Returns the id of the column it was removed from.
pub fn take_task(columns: &mut [ColumnWithTasks], task_id: i64) -> Option<String> {
    for column in columns.iter_mut() {
        if let Some(pos) = column.tasks.iter().position(|t| t.id == task_id) {
            column.tasks.remove(pos);
            renumber_tasks(&mut column.tasks);
            return Some(column.column.id.clone());
        }
    }
    None
}

/// Insert `task` into its `kanban_column_id` at its `order`, replacing any
/// copy already on the board. Returns `false` (board untouched) when the
/// target column is not present.
pub fn place_task(columns: &mut [ColumnWithTasks], task: Task) -> bool {
    if !columns.iter().any(|c| c.column.id == task.kanban_column_id) {
        return false;
    }
    take_task(columns, task.id);
    let Some(target) = columns
        .iter_mut()
        .find(|c| c.column.id == task.kanban_column_id)
    else {
        return false;
    };
    target.tasks.sort_by_key(|t| t.order);
    let at = slot(task.order, target.tasks.len());
    target.tasks.insert(at, task);
    renumber_tasks(&mut target.tasks);
    true
}

/// Remove a task from the named column only. Returns `true` if it was there.
pub fn remove_task(columns: &mut [ColumnWithTasks], column_id: &str, task_id: i64) -> bool {
    let Some(column) = columns.iter_mut().find(|c| c.column.id == column_id) else {
        return false;
    };
    let before = column.tasks.len();
    column.tasks.retain(|t| t.id != task_id);
    renumber_tasks(&mut column.tasks);
    column.tasks.len() != before
}

/// Insert or move a column to `column.order`. An existing column with the
/// same id keeps its cached tasks.
pub fn place_column(columns: &mut Vec<ColumnWithTasks>, column: KanbanColumn) {
    let tasks = match columns.iter().position(|c| c.column.id == column.id) {
        Some(pos) => columns.remove(pos).tasks,
        None => Vec::new(),
    };
    columns.sort_by_key(|c| c.column.order);
    let at = slot(column.order, columns.len());
    columns.insert(at, ColumnWithTasks { column, tasks });
    renumber_columns(columns);
}

/// Remove a column by id and compact its siblings.
pub fn remove_column(columns: &mut Vec<ColumnWithTasks>, column_id: &str) -> bool {
    let before = columns.len();
    columns.retain(|c| c.column.id != column_id);
    renumber_columns(columns);
    columns.len() != before
}

// ── Reconciler ───────────────────────────────────────────────────────

/// Consumes one subscription's events for the session's current scope.
pub struct Reconciler {
    session: ClientSession,
    scope: SubscriptionScope,
    cache: SharedCache,
}

impl Reconciler {
    pub fn new(session: ClientSession, scope: SubscriptionScope, cache: SharedCache) -> Self {
        Self {
            session,
            scope,
            cache,
        }
    }

    pub fn scope(&self) -> &SubscriptionScope {
        &self.scope
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn apply(&self, tracked: &Tracked<IncomingEvent>) -> ApplyOutcome {
        let event = match &tracked.data {
            IncomingEvent::Known(event) => event,
            IncomingEvent::Unrecognized { event_type } => {
                tracing::info!(
                    event_type = event_type.as_deref().unwrap_or("<missing>"),
                    project_id = %self.scope.project_id,
                    "Unrecognized kanban event, invalidating project"
                );
                cache::lock(&self.cache).invalidate_project(&self.scope.project_id);
                return ApplyOutcome::Invalidated;
            }
        };

        if !event.matches_scope(&self.scope) {
            return ApplyOutcome::SkippedOutOfScope;
        }
        if self.session.is_own(event.origin_client_id()) {
            tracing::trace!(event_type = event.event_type(), "Skipping own echo");
            return ApplyOutcome::SkippedEcho;
        }

        let key = BoardKey::new(event.project_id(), event.board_id());
        let mut cache = cache::lock(&self.cache);
        let Some(entry) = cache.entry_mut(&key) else {
            return ApplyOutcome::SkippedNotCached;
        };
        let columns = &mut entry.columns;

        let applied = match event {
            KanbanEvent::TaskCreated { task, .. } | KanbanEvent::TaskUpdated { task, .. } => {
                place_task(columns, task.clone())
            }
            KanbanEvent::TaskDeleted {
                task_id,
                kanban_column_id,
                ..
            } => {
                remove_task(columns, kanban_column_id, *task_id);
                true
            }
            KanbanEvent::KanbanColumnCreated { column, .. } => {
                place_column(columns, column.clone());
                true
            }
            KanbanEvent::KanbanColumnUpdated { column, .. } => {
                if columns.iter().any(|c| c.column.id == column.id) {
                    place_column(columns, column.clone());
                    true
                } else {
                    false
                }
            }
            KanbanEvent::KanbanColumnDeleted { column_id, .. } => {
                remove_column(columns, column_id);
                true
            }
        };

        if applied {
            ApplyOutcome::Applied
        } else {
            tracing::debug!(
                event_type = event.event_type(),
                board_id = %key.board_id,
                "Event references a column missing from cache, invalidating board"
            );
            entry.stale = true;
            ApplyOutcome::Invalidated
        }
    }

    /// A fresh subscription cannot replay what was missed; mark everything
    /// in scope stale.
    pub fn on_resubscribe(&self) {
        cache::lock(&self.cache).invalidate_project(&self.scope.project_id);
    }
}

#[cfg(test)]
mod tests {
    use taskboard_common::{ClientId, Priority};

    use super::*;
    use crate::client::cache::{QueryCache, ViewState, shared};

    const TEAM: &str = "teamA";
    const PROJECT: &str = "projectA";
    const BOARD: &str = "b1";

    fn key() -> BoardKey {
        BoardKey::new(PROJECT, BOARD)
    }

    fn kcol(id: &str, order: i32) -> KanbanColumn {
        KanbanColumn {
            id: id.to_string(),
            board_id: BOARD.to_string(),
            name: id.to_uppercase(),
            color: "#000".to_string(),
            order,
        }
    }

    fn task(id: i64, column: &str, order: i32) -> Task {
        Task {
            id,
            kanban_column_id: column.to_string(),
            order,
            title: format!("Task {}", id),
            description: None,
            priority: Priority::Medium,
            assignee_id: None,
            creator_id: None,
            start_date: None,
            end_date: None,
        }
    }

    fn col(id: &str, order: i32, tasks: Vec<Task>) -> ColumnWithTasks {
        ColumnWithTasks {
            column: kcol(id, order),
            tasks,
        }
    }

    fn setup(columns: Vec<ColumnWithTasks>) -> (Reconciler, ClientSession) {
        let mut cache = QueryCache::new();
        cache.set_columns(key(), columns);
        let session = ClientSession::new();
        let reconciler = Reconciler::new(
            session,
            SubscriptionScope::new(TEAM, PROJECT),
            shared(cache),
        );
        (reconciler, session)
    }

    fn deliver(reconciler: &Reconciler, event: KanbanEvent) -> ApplyOutcome {
        reconciler.apply(&Tracked {
            id: ClientId::generate(),
            data: IncomingEvent::Known(event),
        })
    }

    fn columns(reconciler: &Reconciler) -> Vec<ColumnWithTasks> {
        cache::lock(reconciler.cache())
            .columns(&key())
            .unwrap()
            .to_vec()
    }

    fn column_orders(reconciler: &Reconciler) -> Vec<(String, i32)> {
        columns(reconciler)
            .into_iter()
            .map(|c| (c.column.id, c.column.order))
            .collect()
    }

    fn task_orders(reconciler: &Reconciler, column: &str) -> Vec<(i64, i32)> {
        columns(reconciler)
            .into_iter()
            .find(|c| c.column.id == column)
            .unwrap()
            .tasks
            .into_iter()
            .map(|t| (t.id, t.order))
            .collect()
    }

    fn task_created(task: Task) -> KanbanEvent {
        KanbanEvent::TaskCreated {
            team_id: TEAM.to_string(),
            project_id: PROJECT.to_string(),
            board_id: BOARD.to_string(),
            task,
        }
    }

    fn task_updated(task: Task, client_id: Option<ClientId>) -> KanbanEvent {
        KanbanEvent::TaskUpdated {
            team_id: TEAM.to_string(),
            project_id: PROJECT.to_string(),
            board_id: BOARD.to_string(),
            task,
            client_id,
        }
    }

    fn column_created(column: KanbanColumn) -> KanbanEvent {
        KanbanEvent::KanbanColumnCreated {
            team_id: TEAM.to_string(),
            project_id: PROJECT.to_string(),
            board_id: BOARD.to_string(),
            column,
        }
    }

    #[test]
    fn test_column_created_shifts_later_siblings() {
        let (r, _) = setup(vec![col("x", 0, vec![]), col("y", 1, vec![])]);
        assert_eq!(deliver(&r, column_created(kcol("z", 1))), ApplyOutcome::Applied);
        assert_eq!(
            column_orders(&r),
            vec![
                ("x".to_string(), 0),
                ("z".to_string(), 1),
                ("y".to_string(), 2)
            ]
        );
        assert!(columns(&r)[1].tasks.is_empty());
    }

    #[test]
    fn test_column_created_replay_does_not_duplicate() {
        let (r, _) = setup(vec![col("x", 0, vec![]), col("y", 1, vec![])]);
        deliver(&r, column_created(kcol("z", 1)));
        deliver(&r, column_created(kcol("z", 1)));
        assert_eq!(column_orders(&r).len(), 3);
        assert_eq!(column_orders(&r)[1], ("z".to_string(), 1));
    }

    #[test]
    fn test_task_deleted_only_touches_named_column() {
        let (r, _) = setup(vec![
            col("colA", 0, vec![task(1, "colA", 0)]),
            col("colB", 1, vec![task(5, "colB", 0), task(9, "colB", 1)]),
        ]);
        let outcome = deliver(
            &r,
            KanbanEvent::TaskDeleted {
                team_id: TEAM.to_string(),
                project_id: PROJECT.to_string(),
                board_id: BOARD.to_string(),
                task_id: 5,
                kanban_column_id: "colB".to_string(),
            },
        );
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(task_orders(&r, "colB"), vec![(9, 0)]);
        assert_eq!(task_orders(&r, "colA"), vec![(1, 0)]);
    }

    #[test]
    fn test_own_task_update_is_an_echo() {
        let before = vec![
            col("colA", 0, vec![task(5, "colA", 0)]),
            col("colB", 1, vec![]),
        ];
        let (r, session) = setup(before.clone());
        let outcome = deliver(
            &r,
            task_updated(task(5, "colB", 0), Some(session.client_id())),
        );
        assert_eq!(outcome, ApplyOutcome::SkippedEcho);
        assert_eq!(columns(&r), before);
    }

    #[test]
    fn test_own_column_update_is_an_echo() {
        let before = vec![col("x", 0, vec![]), col("y", 1, vec![])];
        let (r, session) = setup(before.clone());
        let outcome = deliver(
            &r,
            KanbanEvent::KanbanColumnUpdated {
                team_id: TEAM.to_string(),
                project_id: PROJECT.to_string(),
                board_id: BOARD.to_string(),
                column: kcol("y", 0),
                client_id: Some(session.client_id()),
            },
        );
        assert_eq!(outcome, ApplyOutcome::SkippedEcho);
        assert_eq!(columns(&r), before);
    }

    #[test]
    fn test_foreign_task_update_moves_task() {
        let (r, _) = setup(vec![
            col("colA", 0, vec![task(5, "colA", 0), task(6, "colA", 1)]),
            col("colB", 1, vec![task(9, "colB", 0)]),
        ]);
        let outcome = deliver(
            &r,
            task_updated(task(5, "colB", 0), Some(ClientId::generate())),
        );
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(task_orders(&r, "colA"), vec![(6, 0)]);
        assert_eq!(task_orders(&r, "colB"), vec![(5, 0), (9, 1)]);
    }

    #[test]
    fn test_update_without_origin_is_applied() {
        let (r, _) = setup(vec![col("colA", 0, vec![task(5, "colA", 0)])]);
        let mut renamed = task(5, "colA", 0);
        renamed.title = "Renamed".to_string();
        assert_eq!(deliver(&r, task_updated(renamed, None)), ApplyOutcome::Applied);
        assert_eq!(columns(&r)[0].tasks[0].title, "Renamed");
    }

    #[test]
    fn test_task_created_twice_appears_once() {
        let (r, _) = setup(vec![col("colA", 0, vec![task(1, "colA", 0)])]);
        deliver(&r, task_created(task(2, "colA", 1)));
        deliver(&r, task_created(task(2, "colA", 1)));
        assert_eq!(task_orders(&r, "colA"), vec![(1, 0), (2, 1)]);
    }

    #[test]
    fn test_task_created_leaves_other_columns_alone() {
        let other = col("colB", 1, vec![task(9, "colB", 0)]);
        let (r, _) = setup(vec![col("colA", 0, vec![]), other.clone()]);
        deliver(&r, task_created(task(2, "colA", 0)));
        assert_eq!(columns(&r)[1], other);
    }

    #[test]
    fn test_task_for_unknown_column_invalidates_board() {
        let (r, _) = setup(vec![col("colA", 0, vec![])]);
        let outcome = deliver(&r, task_created(task(2, "ghost", 0)));
        assert_eq!(outcome, ApplyOutcome::Invalidated);
        let cache = cache::lock(r.cache());
        assert!(cache.entry(&key()).unwrap().stale);
        assert!(cache.columns(&key()).unwrap()[0].tasks.is_empty());
    }

    #[test]
    fn test_column_update_keeps_tasks() {
        let (r, _) = setup(vec![
            col("x", 0, vec![task(1, "x", 0)]),
            col("y", 1, vec![]),
        ]);
        let mut moved = kcol("x", 1);
        moved.name = "Renamed".to_string();
        moved.color = "#fff".to_string();
        let outcome = deliver(
            &r,
            KanbanEvent::KanbanColumnUpdated {
                team_id: TEAM.to_string(),
                project_id: PROJECT.to_string(),
                board_id: BOARD.to_string(),
                column: moved,
                client_id: None,
            },
        );
        assert_eq!(outcome, ApplyOutcome::Applied);
        let cols = columns(&r);
        assert_eq!(cols[1].column.id, "x");
        assert_eq!(cols[1].column.name, "Renamed");
        assert_eq!(cols[1].column.color, "#fff");
        assert_eq!(cols[1].tasks.len(), 1);
        assert_eq!(cols[0].column.order, 0);
    }

    #[test]
    fn test_column_deleted_compacts() {
        let (r, _) = setup(vec![
            col("a", 0, vec![]),
            col("b", 1, vec![]),
            col("c", 2, vec![]),
        ]);
        deliver(
            &r,
            KanbanEvent::KanbanColumnDeleted {
                team_id: TEAM.to_string(),
                project_id: PROJECT.to_string(),
                board_id: BOARD.to_string(),
                column_id: "a".to_string(),
            },
        );
        assert_eq!(
            column_orders(&r),
            vec![("b".to_string(), 0), ("c".to_string(), 1)]
        );
    }

    #[test]
    fn test_out_of_scope_event_is_ignored() {
        let before = vec![col("x", 0, vec![])];
        let (r, _) = setup(before.clone());
        let outcome = deliver(
            &r,
            KanbanEvent::KanbanColumnCreated {
                team_id: "teamB".to_string(),
                project_id: PROJECT.to_string(),
                board_id: BOARD.to_string(),
                column: kcol("z", 0),
            },
        );
        assert_eq!(outcome, ApplyOutcome::SkippedOutOfScope);
        assert_eq!(columns(&r), before);
    }

    #[test]
    fn test_uncached_board_is_skipped() {
        let (r, _) = setup(vec![]);
        let outcome = deliver(
            &r,
            KanbanEvent::KanbanColumnCreated {
                team_id: TEAM.to_string(),
                project_id: PROJECT.to_string(),
                board_id: "other-board".to_string(),
                column: kcol("z", 0),
            },
        );
        assert_eq!(outcome, ApplyOutcome::SkippedNotCached);
    }

    #[test]
    fn test_unrecognized_event_invalidates_columns_and_boards() {
        let (r, _) = setup(vec![col("x", 0, vec![])]);
        cache::lock(r.cache()).set_boards(PROJECT, vec![]);

        let tracked: Tracked<IncomingEvent> = serde_json::from_value(serde_json::json!({
            "id": ClientId::generate().to_string(),
            "data": {"type": "comment_added", "payload": {"teamId": TEAM}}
        }))
        .unwrap();
        assert_eq!(r.apply(&tracked), ApplyOutcome::Invalidated);

        let cache = cache::lock(r.cache());
        assert_eq!(cache.stale_boards(), vec![key()]);
        assert_eq!(cache.stale_board_lists(), vec![PROJECT.to_string()]);
    }

    #[test]
    fn test_resubscribe_invalidates_scope() {
        let (r, _) = setup(vec![col("x", 0, vec![])]);
        r.on_resubscribe();
        assert_eq!(cache::lock(r.cache()).stale_boards(), vec![key()]);
    }

    #[test]
    fn test_foreign_events_apply_during_optimistic_view() {
        let (r, _) = setup(vec![col("x", 0, vec![])]);
        cache::lock(r.cache()).set_view(&key(), ViewState::Optimistic);
        assert_eq!(deliver(&r, column_created(kcol("y", 1))), ApplyOutcome::Applied);
        assert_eq!(
            cache::lock(r.cache()).view_state(&key()),
            Some(ViewState::Optimistic)
        );
    }

    #[test]
    fn test_orders_stay_dense_after_mixed_sequence() {
        let (r, _) = setup(vec![col("colA", 0, vec![]), col("colB", 1, vec![])]);
        for (id, order) in [(1, 0), (2, 0), (3, 5), (4, 1)] {
            deliver(&r, task_created(task(id, "colA", order)));
        }
        deliver(
            &r,
            KanbanEvent::TaskDeleted {
                team_id: TEAM.to_string(),
                project_id: PROJECT.to_string(),
                board_id: BOARD.to_string(),
                task_id: 2,
                kanban_column_id: "colA".to_string(),
            },
        );
        deliver(&r, task_updated(task(3, "colB", 0), None));

        for column in columns(&r) {
            let orders: Vec<i32> = column.tasks.iter().map(|t| t.order).collect();
            let expected: Vec<i32> = (0..column.tasks.len() as i32).collect();
            assert_eq!(orders, expected, "column {}", column.column.id);
        }
        assert_eq!(task_orders(&r, "colA"), vec![(4, 0), (1, 1)]);
        assert_eq!(task_orders(&r, "colB"), vec![(3, 0)]);
    }
}
