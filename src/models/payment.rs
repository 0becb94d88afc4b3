use super::{lenient, Entity, EntityKind};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Salary,
    Piecework,
    Advance,
    Bonus,
    #[default]
    #[serde(other)]
    Other,
}

/// Payment currency; `Split` payments carry both an EGP and a USD part
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentCurrency {
    #[default]
    #[serde(rename = "EGP", alias = "egp")]
    Egp,
    #[serde(rename = "USD", alias = "usd")]
    Usd,
    #[serde(rename = "split", alias = "SPLIT")]
    Split,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub employee_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub payment_type: PaymentType,
    #[serde(
        default,
        deserialize_with = "lenient::decimal",
        serialize_with = "lenient::serialize_decimal"
    )]
    pub amount: Decimal,
    #[serde(
        default,
        rename = "amountEGP",
        alias = "amountEgp",
        deserialize_with = "lenient::decimal",
        serialize_with = "lenient::serialize_decimal"
    )]
    pub amount_egp: Decimal,
    #[serde(
        default,
        rename = "amountUSD",
        alias = "amountUsd",
        deserialize_with = "lenient::decimal",
        serialize_with = "lenient::serialize_decimal"
    )]
    pub amount_usd: Decimal,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub currency: PaymentCurrency,
    #[serde(default, deserialize_with = "lenient::date")]
    pub payment_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub receipt_number: Option<String>,
}

impl Payment {
    /// (EGP part, USD part) of this payment
    pub fn amounts(&self) -> (Decimal, Decimal) {
        match self.currency {
            PaymentCurrency::Egp => (self.amount, Decimal::ZERO),
            PaymentCurrency::Usd => (Decimal::ZERO, self.amount),
            PaymentCurrency::Split => (self.amount_egp, self.amount_usd),
        }
    }
}

impl Entity for Payment {
    const KIND: EntityKind = EntityKind::Payment;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_amounts() {
        let p: Payment = serde_json::from_value(json!({
            "id": "pay-1",
            "employeeId": "e-1",
            "currency": "split",
            "amountEGP": 1500,
            "amountUSD": "40"
        }))
        .unwrap();
        assert_eq!(p.amounts(), (Decimal::from(1500), Decimal::from(40)));
    }

    #[test]
    fn test_single_currency_amounts() {
        let p: Payment = serde_json::from_value(json!({
            "id": "pay-2",
            "currency": "USD",
            "amount": 250,
            "receiptNumber": "R-77"
        }))
        .unwrap();
        assert_eq!(p.amounts(), (Decimal::ZERO, Decimal::from(250)));
        assert_eq!(p.receipt_number.as_deref(), Some("R-77"));
        assert_eq!(p.payment_type, PaymentType::Other);
    }
}
