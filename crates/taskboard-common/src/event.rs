//! Kanban mutation events and the envelope they travel in.
//!
//! Wire form of an event: `{"type": "task_updated", "payload": {...}}` with
//! camelCase payload fields. Every payload carries `teamId`, `projectId` and
//! `boardId` so subscribers can filter without a lookup.

use serde::{Deserialize, Deserializer, Serialize};

use crate::client_id::ClientId;
use crate::model::{KanbanColumn, Task};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum KanbanEvent {
    TaskCreated {
        team_id: String,
        project_id: String,
        board_id: String,
        task: Task,
    },
    TaskUpdated {
        team_id: String,
        project_id: String,
        board_id: String,
        task: Task,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
    },
    TaskDeleted {
        team_id: String,
        project_id: String,
        board_id: String,
        task_id: i64,
        kanban_column_id: String,
    },
    KanbanColumnCreated {
        team_id: String,
        project_id: String,
        board_id: String,
        column: KanbanColumn,
    },
    KanbanColumnUpdated {
        team_id: String,
        project_id: String,
        board_id: String,
        column: KanbanColumn,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
    },
    KanbanColumnDeleted {
        team_id: String,
        project_id: String,
        board_id: String,
        column_id: String,
    },
}

impl KanbanEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task_created",
            Self::TaskUpdated { .. } => "task_updated",
            Self::TaskDeleted { .. } => "task_deleted",
            Self::KanbanColumnCreated { .. } => "kanban_column_created",
            Self::KanbanColumnUpdated { .. } => "kanban_column_updated",
            Self::KanbanColumnDeleted { .. } => "kanban_column_deleted",
        }
    }

    pub fn team_id(&self) -> &str {
        match self {
            Self::TaskCreated { team_id, .. }
            | Self::TaskUpdated { team_id, .. }
            | Self::TaskDeleted { team_id, .. }
            | Self::KanbanColumnCreated { team_id, .. }
            | Self::KanbanColumnUpdated { team_id, .. }
            | Self::KanbanColumnDeleted { team_id, .. } => team_id,
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            Self::TaskCreated { project_id, .. }
            | Self::TaskUpdated { project_id, .. }
            | Self::TaskDeleted { project_id, .. }
            | Self::KanbanColumnCreated { project_id, .. }
            | Self::KanbanColumnUpdated { project_id, .. }
            | Self::KanbanColumnDeleted { project_id, .. } => project_id,
        }
    }

    pub fn board_id(&self) -> &str {
        match self {
            Self::TaskCreated { board_id, .. }
            | Self::TaskUpdated { board_id, .. }
            | Self::TaskDeleted { board_id, .. }
            | Self::KanbanColumnCreated { board_id, .. }
            | Self::KanbanColumnUpdated { board_id, .. }
            | Self::KanbanColumnDeleted { board_id, .. } => board_id,
        }
    }

    /// Session that issued the mutation. Only update events carry one.
    pub fn origin_client_id(&self) -> Option<&ClientId> {
        match self {
            Self::TaskUpdated { client_id, .. } | Self::KanbanColumnUpdated { client_id, .. } => {
                client_id.as_ref()
            }
            Self::TaskCreated { .. }
            | Self::TaskDeleted { .. }
            | Self::KanbanColumnCreated { .. }
            | Self::KanbanColumnDeleted { .. } => None,
        }
    }

    pub fn matches_scope(&self, scope: &SubscriptionScope) -> bool {
        self.team_id() == scope.team_id && self.project_id() == scope.project_id
    }
}

/// The team + project a subscriber is currently viewing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionScope {
    pub team_id: String,
    pub project_id: String,
}

impl SubscriptionScope {
    pub fn new(team_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            project_id: project_id.into(),
        }
    }
}

/// Subscription envelope: `id` is the recipient connection's client id, used
/// as a correlation token; echo detection relies on the payload's own
/// `clientId` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracked<T> {
    pub id: ClientId,
    pub data: T,
}

/// An event as seen by a client that may be older than the server.
///
/// Anything that does not decode as a [`KanbanEvent`] (a new tag, or a payload
/// this build cannot read) lands in `Unrecognized`, which the reconciler
/// answers by invalidating its cache.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingEvent {
    Known(KanbanEvent),
    Unrecognized { event_type: Option<String> },
}

impl From<KanbanEvent> for IncomingEvent {
    fn from(event: KanbanEvent) -> Self {
        Self::Known(event)
    }
}

impl<'de> Deserialize<'de> for IncomingEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match KanbanEvent::deserialize(&value) {
            Ok(event) => Ok(Self::Known(event)),
            Err(_) => Ok(Self::Unrecognized {
                event_type: value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .map(str::to_owned),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;

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

    #[test]
    fn test_task_created_wire_format() {
        let event = KanbanEvent::TaskCreated {
            team_id: "t1".to_string(),
            project_id: "p1".to_string(),
            board_id: "b1".to_string(),
            task: task(5, "colA", 0),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_created");
        assert_eq!(json["payload"]["teamId"], "t1");
        assert_eq!(json["payload"]["projectId"], "p1");
        assert_eq!(json["payload"]["boardId"], "b1");
        assert_eq!(json["payload"]["task"]["kanbanColumnId"], "colA");
    }

    #[test]
    fn test_column_events_use_prefixed_tags() {
        let event = KanbanEvent::KanbanColumnDeleted {
            team_id: "t1".to_string(),
            project_id: "p1".to_string(),
            board_id: "b1".to_string(),
            column_id: "x".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "kanban_column_deleted");
        assert_eq!(json["payload"]["columnId"], "x");
        assert_eq!(event.event_type(), "kanban_column_deleted");
    }

    #[test]
    fn test_update_event_carries_origin_client() {
        let origin = ClientId::generate();
        let event = KanbanEvent::TaskUpdated {
            team_id: "t1".to_string(),
            project_id: "p1".to_string(),
            board_id: "b1".to_string(),
            task: task(5, "colB", 0),
            client_id: Some(origin),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["clientId"], origin.to_string());
        assert_eq!(event.origin_client_id(), Some(&origin));

        let decoded: KanbanEvent = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_update_event_without_client_id_decodes() {
        let json = serde_json::json!({
            "type": "task_updated",
            "payload": {
                "teamId": "t1", "projectId": "p1", "boardId": "b1",
                "task": {"id": 1, "kanbanColumnId": "c", "order": 0, "title": "x"}
            }
        });
        let event: KanbanEvent = serde_json::from_value(json).unwrap();
        assert!(event.origin_client_id().is_none());
    }

    #[test]
    fn test_matches_scope_requires_team_and_project() {
        let event = KanbanEvent::TaskDeleted {
            team_id: "teamA".to_string(),
            project_id: "projectA".to_string(),
            board_id: "b1".to_string(),
            task_id: 5,
            kanban_column_id: "colB".to_string(),
        };
        assert!(event.matches_scope(&SubscriptionScope::new("teamA", "projectA")));
        assert!(!event.matches_scope(&SubscriptionScope::new("teamB", "projectA")));
        assert!(!event.matches_scope(&SubscriptionScope::new("teamA", "projectB")));
    }

    #[test]
    fn test_incoming_event_unknown_tag_is_unrecognized() {
        let json = r#"{"type": "task_archived", "payload": {"taskId": 3}}"#;
        let incoming: IncomingEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            incoming,
            IncomingEvent::Unrecognized {
                event_type: Some("task_archived".to_string())
            }
        );
    }

    #[test]
    fn test_incoming_event_known_tag_decodes() {
        let event = KanbanEvent::KanbanColumnDeleted {
            team_id: "t".to_string(),
            project_id: "p".to_string(),
            board_id: "b".to_string(),
            column_id: "c".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let incoming: IncomingEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(incoming, IncomingEvent::Known(event));
    }

    #[test]
    fn test_tracked_envelope_shape() {
        let recipient = ClientId::generate();
        let tracked = Tracked {
            id: recipient,
            data: KanbanEvent::KanbanColumnDeleted {
                team_id: "t".to_string(),
                project_id: "p".to_string(),
                board_id: "b".to_string(),
                column_id: "c".to_string(),
            },
        };
        let json = serde_json::to_value(&tracked).unwrap();
        assert_eq!(json["id"], recipient.to_string());
        assert_eq!(json["data"]["type"], "kanban_column_deleted");

        let incoming: Tracked<IncomingEvent> = serde_json::from_value(json).unwrap();
        assert_eq!(incoming.id, recipient);
        assert!(matches!(incoming.data, IncomingEvent::Known(_)));
    }
}
