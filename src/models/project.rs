use super::{lenient, Entity, EntityKind, WorkStatus};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Unit in which a project's total length is measured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    #[serde(alias = "m")]
    Meter,
    #[serde(alias = "km")]
    Kilometer,
    #[serde(alias = "m2")]
    SquareMeter,
    #[serde(alias = "m3")]
    CubicMeter,
    #[default]
    #[serde(other)]
    Unit,
}

/// A tracked project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub status: WorkStatus,
    #[serde(
        default,
        deserialize_with = "lenient::decimal",
        serialize_with = "lenient::serialize_decimal"
    )]
    pub budget: Decimal,
    #[serde(
        default,
        deserialize_with = "lenient::decimal",
        serialize_with = "lenient::serialize_decimal"
    )]
    pub total_length: Decimal,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub unit: LengthUnit,
    #[serde(default, deserialize_with = "lenient::date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient::date")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub manager: String,
}

impl Entity for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn id(&self) -> &str {
        &self.id
    }

    fn project_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_lenient_decode() {
        let project: Project = serde_json::from_value(json!({
            "id": "p-1",
            "name": "Coastal road",
            "status": "in_progress",
            "budget": "100000",
            "totalLength": 12.5,
            "unit": "km",
            "startDate": "2024-01-10",
            "endDate": null,
            "manager": "R. Hassan"
        }))
        .unwrap();
        assert_eq!(project.status, WorkStatus::InProgress);
        assert_eq!(project.budget, Decimal::from(100_000));
        assert_eq!(project.total_length, Decimal::new(125, 1));
        assert_eq!(project.unit, LengthUnit::Kilometer);
        assert_eq!(project.start_date, NaiveDate::from_ymd_opt(2024, 1, 10));
        assert!(project.end_date.is_none());
    }

    #[test]
    fn test_project_missing_fields_default() {
        let project: Project = serde_json::from_value(json!({
            "id": "p-2",
            "status": "archived",
            "unit": "furlong",
            "budget": null
        }))
        .unwrap();
        assert_eq!(project.status, WorkStatus::NotStarted);
        assert_eq!(project.unit, LengthUnit::Unit);
        assert_eq!(project.budget, Decimal::ZERO);
        assert_eq!(project.name, "");
    }
}
