//! Entity records shared by the cache, the mutation pipeline and the stats engine
//!
//! Records travel through the cache as raw JSON (exactly what the backend
//! returned) and are decoded into these types on read. Derived fields such as
//! section progress or inventory status are methods, never stored fields, so
//! they are recomputed from their owning fields every time.

pub mod employee;
pub mod inventory;
pub mod lenient;
pub mod payment;
pub mod project;
pub mod section;
pub mod spending;

pub use employee::{Currency, Employee, EmployeeType};
pub use inventory::{InventoryItem, StockStatus};
pub use payment::{Payment, PaymentCurrency, PaymentType};
pub use project::{LengthUnit, Project};
pub use section::Section;
pub use spending::{Spending, SpendingCategory};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The entity collections the dashboard tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Section,
    Spending,
    Inventory,
    Employee,
    Payment,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Project,
        EntityKind::Section,
        EntityKind::Spending,
        EntityKind::Inventory,
        EntityKind::Employee,
        EntityKind::Payment,
    ];

    /// REST collection path segment and cache key name
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Project => "projects",
            EntityKind::Section => "sections",
            EntityKind::Spending => "spendings",
            EntityKind::Inventory => "inventory",
            EntityKind::Employee => "employees",
            EntityKind::Payment => "payments",
        }
    }

    /// Singular name used as the prefix of cross-view event names
    pub fn singular(self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::Section => "section",
            EntityKind::Spending => "spending",
            EntityKind::Inventory => "inventory",
            EntityKind::Employee => "employee",
            EntityKind::Payment => "payment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.singular() == s || k.collection() == s)
            .ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// Progress state shared by projects and sections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    #[default]
    #[serde(alias = "not-started", alias = "pending")]
    NotStarted,
    #[serde(alias = "in-progress", alias = "active")]
    InProgress,
    #[serde(alias = "done")]
    Completed,
}

/// A typed view over a JSON record in one of the cached collections
pub trait Entity: DeserializeOwned + Serialize + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    /// Owning project, when the entity is linked to one
    fn project_id(&self) -> Option<&str> {
        None
    }
}

/// Decode every record of a cached collection, skipping the ones without an id.
pub fn decode_records<T: Entity>(records: &[Value]) -> Vec<T> {
    records
        .iter()
        .filter_map(|record| match serde_json::from_value::<T>(record.clone()) {
            Ok(entity) => Some(entity),
            Err(e) => {
                tracing::warn!(
                    entity_type = %T::KIND,
                    error = %e,
                    "Skipping undecodable record"
                );
                None
            }
        })
        .collect()
}

/// Read the `id` field of a raw record
pub fn record_id(record: &Value) -> Option<String> {
    record.get("id").and_then(lenient::id_from_value)
}

/// Read the owning project of a raw record (the project itself for projects)
pub fn record_project_id(kind: EntityKind, record: &Value) -> Option<String> {
    match kind {
        EntityKind::Project => record_id(record),
        _ => record.get("projectId").and_then(lenient::id_from_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_kind_names() {
        assert_eq!(EntityKind::Spending.collection(), "spendings");
        assert_eq!(EntityKind::Inventory.collection(), "inventory");
        assert_eq!(EntityKind::Payment.singular(), "payment");
        assert_eq!("sections".parse::<EntityKind>().unwrap(), EntityKind::Section);
        assert_eq!("employee".parse::<EntityKind>().unwrap(), EntityKind::Employee);
        assert!("widgets".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_work_status_aliases() {
        let s: WorkStatus = serde_json::from_value(json!("in-progress")).unwrap();
        assert_eq!(s, WorkStatus::InProgress);
        let s: WorkStatus = serde_json::from_value(json!("completed")).unwrap();
        assert_eq!(s, WorkStatus::Completed);
    }

    #[test]
    fn test_decode_records_skips_missing_ids() {
        let records = vec![
            json!({"id": "p-1", "name": "Road"}),
            json!({"name": "no id"}),
            json!({"id": 7, "budget": "100"}),
        ];
        let projects: Vec<Project> = decode_records(&records);
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[1].id, "7");
    }

    #[test]
    fn test_record_project_id() {
        let spending = json!({"id": "s-1", "projectId": "p-9"});
        assert_eq!(
            record_project_id(EntityKind::Spending, &spending).as_deref(),
            Some("p-9")
        );
        let project = json!({"id": "p-9"});
        assert_eq!(
            record_project_id(EntityKind::Project, &project).as_deref(),
            Some("p-9")
        );
        let unassigned = json!({"id": "sec-1", "projectId": ""});
        assert_eq!(record_project_id(EntityKind::Section, &unassigned), None);
    }
}
