//! Pre-flight validation of mutations
//!
//! Runs before any cache patch or network call. Creates are checked as a
//! whole; updates are checked on the cached record merged with the changes,
//! but only rules touching a changed field apply, so an unrelated edit is not
//! blocked by data already on the server.

use crate::cache::{CacheKey, EntityCacheStore};
use crate::models::lenient::{date_from_value, decimal_opt_from_value, id_from_value};
use crate::models::{record_id, EntityKind};
use crate::sync::Mutation;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} must be a JSON object")]
    NotAnObject(&'static str),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("'{0}' must not be negative")]
    Negative(&'static str),

    #[error("'{0}' must be greater than zero")]
    NotPositive(&'static str),

    #[error("'{0}' is out of range")]
    OutOfRange(&'static str),

    #[error("completed quantity {completed} exceeds target quantity {target}")]
    CompletedExceedsTarget { completed: Decimal, target: Decimal },

    #[error("'{field}' {date} is in the future")]
    FutureDate { field: &'static str, date: NaiveDate },

    #[error("end date {end} is before start date {start}")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },

    #[error("receipt number '{0}' is already used")]
    DuplicateReceipt(String),
}

/// The record as it will look after the mutation, plus which fields change
struct Candidate<'a> {
    merged: Map<String, Value>,
    changed: Option<&'a Map<String, Value>>,
    id: Option<&'a str>,
}

impl Candidate<'_> {
    fn touched(&self, field: &str) -> bool {
        match self.changed {
            Some(changes) => changes.contains_key(field),
            None => true,
        }
    }

    fn any_touched(&self, fields: &[&str]) -> bool {
        fields.iter().any(|field| self.touched(field))
    }

    fn present(&self, field: &str) -> Option<&Value> {
        self.merged.get(field).filter(|v| !v.is_null())
    }

    fn decimal(&self, field: &str) -> Option<Decimal> {
        self.present(field).and_then(decimal_opt_from_value)
    }

    fn date(&self, field: &str) -> Option<NaiveDate> {
        self.present(field).and_then(date_from_value)
    }

    fn require(&self, field: &'static str) -> Result<(), ValidationError> {
        let missing = match self.present(field) {
            None => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if missing && self.changed.is_none() {
            return Err(ValidationError::MissingField(field));
        }
        Ok(())
    }

    fn non_negative(&self, fields: &[&'static str]) -> Result<(), ValidationError> {
        for &field in fields {
            if self.touched(field) && self.decimal(field).is_some_and(|v| v < Decimal::ZERO) {
                return Err(ValidationError::Negative(field));
            }
        }
        Ok(())
    }

    fn positive(&self, field: &'static str) -> Result<(), ValidationError> {
        if !self.touched(field) {
            return Ok(());
        }
        match self.decimal(field) {
            Some(v) if v > Decimal::ZERO => Ok(()),
            Some(_) => Err(ValidationError::NotPositive(field)),
            None if self.changed.is_none() => Err(ValidationError::MissingField(field)),
            None => Err(ValidationError::NotPositive(field)),
        }
    }

    fn not_in_future(&self, field: &'static str, today: NaiveDate) -> Result<(), ValidationError> {
        match self.date(field) {
            Some(date) if self.touched(field) && date > today => {
                Err(ValidationError::FutureDate { field, date })
            }
            _ => Ok(()),
        }
    }

    fn ordered_dates(&self) -> Result<(), ValidationError> {
        if !self.any_touched(&["startDate", "endDate"]) {
            return Ok(());
        }
        match (self.date("startDate"), self.date("endDate")) {
            (Some(start), Some(end)) if end < start => {
                Err(ValidationError::EndBeforeStart { start, end })
            }
            _ => Ok(()),
        }
    }
}

/// Check a mutation against the entity rules and the cached data
pub fn validate(
    mutation: &Mutation,
    store: &EntityCacheStore,
    today: NaiveDate,
) -> Result<(), ValidationError> {
    let candidate = match mutation {
        Mutation::Create { record, .. } => Candidate {
            merged: as_object(record, "record")?.clone(),
            changed: None,
            id: None,
        },
        Mutation::Update { kind, id, changes } => {
            let changes = as_object(changes, "changes")?;
            let mut merged = cached_record(store, *kind, id).unwrap_or_default();
            for (field, value) in changes {
                merged.insert(field.clone(), value.clone());
            }
            Candidate {
                merged,
                changed: Some(changes),
                id: Some(id.as_str()),
            }
        }
        Mutation::Delete { .. } => return Ok(()),
    };

    match mutation.kind() {
        EntityKind::Project => {
            candidate.require("name")?;
            candidate.non_negative(&["budget", "totalLength"])?;
            candidate.ordered_dates()
        }
        EntityKind::Section => {
            candidate.require("name")?;
            candidate.non_negative(&["targetQuantity", "completedQuantity", "budget"])?;
            if candidate.any_touched(&["targetQuantity", "completedQuantity"]) {
                // An update of an uncached section has no known target; the server decides
                let target = match candidate.decimal("targetQuantity") {
                    Some(target) => Some(target),
                    None if candidate.changed.is_none() => Some(Decimal::ZERO),
                    None => None,
                };
                let completed = candidate.decimal("completedQuantity").unwrap_or_default();
                if let Some(target) = target.filter(|target| completed > *target) {
                    return Err(ValidationError::CompletedExceedsTarget { completed, target });
                }
            }
            candidate.ordered_dates()
        }
        EntityKind::Spending => {
            candidate.positive("amount")?;
            candidate.not_in_future("date", today)
        }
        EntityKind::Inventory => {
            candidate.require("name")?;
            candidate.non_negative(&["quantity", "minQuantity", "unitPrice"])
        }
        EntityKind::Employee => {
            candidate.require("name")?;
            candidate.non_negative(&["monthlySalary", "pieceworkRate"])
        }
        EntityKind::Payment => validate_payment(&candidate, store, today),
    }
}

fn validate_payment(
    candidate: &Candidate<'_>,
    store: &EntityCacheStore,
    today: NaiveDate,
) -> Result<(), ValidationError> {
    candidate.require("employeeId")?;

    let split = candidate
        .present("currency")
        .and_then(Value::as_str)
        .is_some_and(|c| c.eq_ignore_ascii_case("split"));
    if split {
        candidate.non_negative(&["amountEGP", "amountUSD"])?;
        if candidate.any_touched(&["currency", "amountEGP", "amountUSD"]) {
            let total = candidate
                .decimal("amountEGP")
                .unwrap_or_default()
                .checked_add(candidate.decimal("amountUSD").unwrap_or_default())
                .ok_or(ValidationError::OutOfRange("amount"))?;
            if total <= Decimal::ZERO {
                return Err(ValidationError::NotPositive("amount"));
            }
        }
    } else {
        candidate.positive("amount")?;
    }

    candidate.not_in_future("paymentDate", today)?;

    if !candidate.touched("receiptNumber") {
        return Ok(());
    }
    let Some(receipt) = candidate.present("receiptNumber").and_then(id_from_value) else {
        return Ok(());
    };
    let payments = store.data(&CacheKey::Collection(EntityKind::Payment));
    let duplicate = payments.iter().any(|payment| {
        payment.get("receiptNumber").and_then(id_from_value).as_deref() == Some(receipt.as_str())
            && record_id(payment).as_deref() != candidate.id
    });
    if duplicate {
        return Err(ValidationError::DuplicateReceipt(receipt));
    }
    Ok(())
}

fn as_object<'a>(value: &'a Value, what: &'static str) -> Result<&'a Map<String, Value>, ValidationError> {
    value.as_object().ok_or(ValidationError::NotAnObject(what))
}

fn cached_record(store: &EntityCacheStore, kind: EntityKind, id: &str) -> Option<Map<String, Value>> {
    store
        .data(&CacheKey::Collection(kind))
        .iter()
        .find(|record| record_id(record).as_deref() == Some(id))
        .and_then(|record| record.as_object().cloned())
}
