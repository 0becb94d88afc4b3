use super::{lenient, Entity, EntityKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeType {
    #[default]
    Monthly,
    Piecework,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    #[serde(rename = "EGP", alias = "egp")]
    Egp,
    #[serde(rename = "USD", alias = "usd")]
    Usd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub employee_type: EmployeeType,
    #[serde(
        default,
        deserialize_with = "lenient::opt_decimal",
        serialize_with = "lenient::serialize_opt_decimal"
    )]
    pub monthly_salary: Option<Decimal>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_decimal",
        serialize_with = "lenient::serialize_opt_decimal"
    )]
    pub piecework_rate: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub currency: Currency,
    #[serde(
        default = "lenient::default_true",
        deserialize_with = "lenient::flag_default_true"
    )]
    pub active: bool,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub section_id: Option<String>,
}

impl Employee {
    /// The pay figure relevant to the employee's type, zero when missing
    pub fn pay_rate(&self) -> Decimal {
        match self.employee_type {
            EmployeeType::Monthly => self.monthly_salary,
            EmployeeType::Piecework => self.piecework_rate,
        }
        .unwrap_or(Decimal::ZERO)
    }
}

impl Entity for Employee {
    const KIND: EntityKind = EntityKind::Employee;

    fn id(&self) -> &str {
        &self.id
    }
}
