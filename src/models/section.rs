use super::{lenient, Employee, Entity, EntityKind, WorkStatus};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A unit of work inside a project, possibly unassigned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub project_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub status: WorkStatus,
    #[serde(
        default,
        deserialize_with = "lenient::decimal",
        serialize_with = "lenient::serialize_decimal"
    )]
    pub target_quantity: Decimal,
    #[serde(
        default,
        deserialize_with = "lenient::decimal",
        serialize_with = "lenient::serialize_decimal"
    )]
    pub completed_quantity: Decimal,
    #[serde(
        default,
        deserialize_with = "lenient::decimal",
        serialize_with = "lenient::serialize_decimal"
    )]
    pub budget: Decimal,
    #[serde(default, deserialize_with = "lenient::date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient::date")]
    pub end_date: Option<NaiveDate>,
}

impl Section {
    /// Completion percentage: round(completed / target × 100), 0 when target ≤ 0.
    ///
    /// Capped to 0..=100 so a record that slipped past validation cannot skew
    /// averages.
    pub fn progress(&self) -> u32 {
        if self.target_quantity <= Decimal::ZERO {
            return 0;
        }
        let completed = self.completed_quantity.max(Decimal::ZERO);
        completed
            .checked_div(self.target_quantity)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .map(|pct| pct.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|pct| pct.to_u32())
            .unwrap_or(0)
            .min(100)
    }

    /// Employees assigned to this section. Never stored on the section itself.
    pub fn employee_count(&self, employees: &[Employee]) -> usize {
        employees
            .iter()
            .filter(|e| e.section_id.as_deref() == Some(self.id.as_str()))
            .count()
    }
}

impl Entity for Section {
    const KIND: EntityKind = EntityKind::Section;

    fn id(&self) -> &str {
        &self.id
    }

    fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn section(target: serde_json::Value, completed: serde_json::Value) -> Section {
        serde_json::from_value(json!({
            "id": "sec-1",
            "targetQuantity": target,
            "completedQuantity": completed,
        }))
        .unwrap()
    }

    #[test]
    fn test_progress_rounds() {
        assert_eq!(section(json!(3), json!(1)).progress(), 33);
        assert_eq!(section(json!(3), json!(2)).progress(), 67);
        assert_eq!(section(json!(200), json!(200)).progress(), 100);
        assert_eq!(section(json!(8), json!(1)).progress(), 13);
    }

    #[test]
    fn test_progress_zero_target() {
        assert_eq!(section(json!(0), json!(10)).progress(), 0);
        assert_eq!(section(json!(null), json!(null)).progress(), 0);
    }

    #[test]
    fn test_progress_ignores_stored_value() {
        let s: Section = serde_json::from_value(json!({
            "id": "sec-2",
            "targetQuantity": 10,
            "completedQuantity": 5,
            "progress": 99
        }))
        .unwrap();
        assert_eq!(s.progress(), 50);
    }

    #[test]
    fn test_employee_count_derived() {
        let s = section(json!(10), json!(1));
        let employees: Vec<Employee> = serde_json::from_value(json!([
            {"id": "e-1", "sectionId": "sec-1"},
            {"id": "e-2", "sectionId": "sec-1"},
            {"id": "e-3", "sectionId": "sec-9"},
            {"id": "e-4"}
        ]))
        .unwrap();
        assert_eq!(s.employee_count(&employees), 2);
    }
}
