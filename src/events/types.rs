//! Cross-view event types

use crate::models::EntityKind;
use serde::{Deserialize, Serialize};

/// The CRUD action performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrudAction {
    Created,
    Updated,
    Deleted,
}

impl CrudAction {
    pub const ALL: [CrudAction; 3] = [CrudAction::Created, CrudAction::Updated, CrudAction::Deleted];

    /// Suffix of the event name, e.g. `Added` in `spendingAdded`
    pub fn suffix(self) -> &'static str {
        match self {
            CrudAction::Created => "Added",
            CrudAction::Updated => "Updated",
            CrudAction::Deleted => "Deleted",
        }
    }
}

/// `projectAdded`, `spendingUpdated`, `inventoryDeleted`, ...
pub fn event_name(entity_type: EntityKind, action: CrudAction) -> String {
    format!("{}{}", entity_type.singular(), action.suffix())
}

/// Inverse of [`event_name`]; `None` for names outside the entity scheme
pub fn parse_event_name(name: &str) -> Option<(EntityKind, CrudAction)> {
    EntityKind::ALL.into_iter().find_map(|kind| {
        let rest = name.strip_prefix(kind.singular())?;
        CrudAction::ALL
            .into_iter()
            .find(|action| action.suffix() == rest)
            .map(|action| (kind, action))
    })
}

/// An event published after a committed mutation so other views can refresh
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewEvent {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<CrudAction>,
    /// The committed record (or `{ "id": ... }` for deletions)
    #[serde(default)]
    pub entity: serde_json::Value,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ViewEvent {
    /// Create an event with the current timestamp. Entity type and action are
    /// filled in when the name follows the `<entity><Action>` scheme.
    pub fn new(name: impl Into<String>, entity: serde_json::Value) -> Self {
        let name = name.into();
        let parsed = parse_event_name(&name);
        Self {
            entity_type: parsed.map(|(kind, _)| kind),
            action: parsed.map(|(_, action)| action),
            name,
            entity,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn for_entity(entity_type: EntityKind, action: CrudAction, entity: serde_json::Value) -> Self {
        Self::new(event_name(entity_type, action), entity)
    }
}

/// Anything that can distribute [`ViewEvent`]s. Emitting never fails.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: ViewEvent);

    fn emit_created(&self, entity_type: EntityKind, entity: serde_json::Value) {
        self.emit(ViewEvent::for_entity(entity_type, CrudAction::Created, entity));
    }

    fn emit_updated(&self, entity_type: EntityKind, entity: serde_json::Value) {
        self.emit(ViewEvent::for_entity(entity_type, CrudAction::Updated, entity));
    }

    fn emit_deleted(&self, entity_type: EntityKind, id: &str) {
        self.emit(ViewEvent::for_entity(
            entity_type,
            CrudAction::Deleted,
            serde_json::json!({ "id": id }),
        ));
    }
}
