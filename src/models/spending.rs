use super::{lenient, Entity, EntityKind};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Spending category. Anything unrecognised lands in `Other`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendingCategory {
    Materials,
    Labor,
    Equipment,
    Consulting,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spending {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::date")]
    pub date: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "lenient::decimal",
        serialize_with = "lenient::serialize_decimal"
    )]
    pub amount: Decimal,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub category: SpendingCategory,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub project_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub description: String,
}

impl Entity for Spending {
    const KIND: EntityKind = EntityKind::Spending;

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

    #[test]
    fn test_unknown_category_is_other() {
        let s: Spending = serde_json::from_value(json!({
            "id": "sp-1",
            "amount": 10,
            "category": "catering"
        }))
        .unwrap();
        assert_eq!(s.category, SpendingCategory::Other);

        let s: Spending = serde_json::from_value(json!({"id": "sp-2", "category": 5})).unwrap();
        assert_eq!(s.category, SpendingCategory::Other);
        assert_eq!(s.amount, Decimal::ZERO);
    }

    #[test]
    fn test_known_category() {
        let s: Spending = serde_json::from_value(json!({
            "id": "sp-3",
            "amount": "32500",
            "category": "materials",
            "projectId": "p-1",
            "date": "2024-02-01"
        }))
        .unwrap();
        assert_eq!(s.category, SpendingCategory::Materials);
        assert_eq!(s.project_id(), Some("p-1"));
        assert_eq!(s.amount, Decimal::from(32_500));
    }
}
