use super::{lenient, Entity, EntityKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Stock level derived from quantity vs. minimum quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    OutOfStock,
    LowStock,
    InStock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub category: String,
    #[serde(
        default,
        deserialize_with = "lenient::decimal",
        serialize_with = "lenient::serialize_decimal"
    )]
    pub quantity: Decimal,
    #[serde(
        default,
        deserialize_with = "lenient::decimal",
        serialize_with = "lenient::serialize_decimal"
    )]
    pub min_quantity: Decimal,
    #[serde(
        default,
        deserialize_with = "lenient::decimal",
        serialize_with = "lenient::serialize_decimal"
    )]
    pub unit_price: Decimal,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub project_id: Option<String>,
}

impl InventoryItem {
    /// quantity × unit price
    pub fn total_value(&self) -> Decimal {
        self.quantity
            .checked_mul(self.unit_price)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn status(&self) -> StockStatus {
        if self.quantity <= Decimal::ZERO {
            StockStatus::OutOfStock
        } else if self.quantity <= self.min_quantity {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }
}

impl Entity for InventoryItem {
    const KIND: EntityKind = EntityKind::Inventory;

    fn id(&self) -> &str {
        &self.id
    }

    fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }
}
