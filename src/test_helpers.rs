//! Test helper factories
//!
//! Record factories with sensible defaults, plus builders for snapshots and
//! seeded mock backends.
#![allow(dead_code)]

use crate::backend::MockBackend;
use crate::models::{decode_records, Entity, EntityKind};
use crate::stats::DashboardSnapshot;
use serde_json::{json, Value};
use std::sync::Arc;

// ============================================================================
// Record factories
// ============================================================================

/// Raw project record in progress since `start`
pub fn project_json(id: &str, budget: Value, start: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Project {id}"),
        "status": "in_progress",
        "budget": budget,
        "startDate": start,
    })
}

/// Raw spending record dated `date`, optionally linked to a project
pub fn spending_json(id: &str, amount: Value, project_id: Option<&str>, date: &str) -> Value {
    let mut record = json!({
        "id": id,
        "amount": amount,
        "category": "materials",
        "date": date,
        "description": format!("Spending {id}"),
    });
    if let (Some(project_id), Value::Object(map)) = (project_id, &mut record) {
        map.insert("projectId".into(), Value::String(project_id.to_string()));
    }
    record
}

// ============================================================================
// Builders
// ============================================================================

pub fn decode<T: Entity>(records: Vec<Value>) -> Vec<T> {
    decode_records(&records)
}

/// Snapshot holding only projects and spendings
pub fn snapshot_from(projects: Vec<Value>, spendings: Vec<Value>) -> DashboardSnapshot {
    DashboardSnapshot {
        projects: decode(projects),
        spendings: decode(spendings),
        ..Default::default()
    }
}

/// Mock backend seeded with projects and spendings; the other collections are empty
pub async fn seeded_backend(projects: Vec<Value>, spendings: Vec<Value>) -> Arc<MockBackend> {
    let backend = Arc::new(MockBackend::new());
    backend.seed(EntityKind::Project, projects).await;
    backend.seed(EntityKind::Spending, spendings).await;
    backend
}
