//! Aggregation engine
//!
//! Pure functions from a decoded cache snapshot plus a filter to statistics
//! records. Nothing here touches the cache or the network, and every function
//! is total: missing or malformed numbers have already decoded as zero, and
//! divisions by zero yield zero rather than NaN or infinity.

mod dashboard;
mod report;
mod window;

pub use dashboard::{
    dashboard_stats, CategoryTotals, DashboardStats, EmployeeStats, InventoryStats,
    SectionStats, StatusCounts,
};
pub use report::{
    payment_summary, project_report, CurrencyTotals, PaymentSummary, ProjectReport,
    SectionSummary,
};
pub use window::{DateRange, ParseWindowError, TimeWindow};

use crate::models::{Employee, InventoryItem, Payment, Project, Section, Spending};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decoded contents of every cached collection at one point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardSnapshot {
    pub projects: Vec<Project>,
    pub sections: Vec<Section>,
    pub spendings: Vec<Spending>,
    pub inventory: Vec<InventoryItem>,
    pub employees: Vec<Employee>,
    pub payments: Vec<Payment>,
}

/// Time window plus an optional single-project filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsFilter {
    pub window: TimeWindow,
    pub project_id: Option<String>,
}

impl StatsFilter {
    pub fn window(window: TimeWindow) -> Self {
        Self {
            window,
            project_id: None,
        }
    }

    pub fn for_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    fn matches_project(&self, project_id: Option<&str>) -> bool {
        match &self.project_id {
            Some(wanted) => project_id == Some(wanted.as_str()),
            None => true,
        }
    }
}

/// spent / budget × 100, rounded to two decimals; 0 when the budget is not positive
pub fn utilization_percent(spent: Decimal, budget: Decimal) -> f64 {
    if budget <= Decimal::ZERO {
        return 0.0;
    }
    spent
        .checked_div(budget)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map(|pct| pct.round_dp(2))
        .and_then(|pct| pct.to_f64())
        .filter(|pct| pct.is_finite())
        .unwrap_or(0.0)
}

/// Arithmetic mean, 0 for an empty input
pub fn average<I>(values: I) -> f64
where
    I: IntoIterator<Item = u32>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0u64, 0u64), |(sum, count), v| (sum + u64::from(v), count + 1));
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

/// Sum decimals, saturating instead of overflowing
pub(crate) fn sum<I>(values: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    values.into_iter().fold(Decimal::ZERO, |acc, v| {
        acc.checked_add(v).unwrap_or(if v.is_sign_negative() {
            Decimal::MIN
        } else {
            Decimal::MAX
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_zero_budget() {
        assert_eq!(utilization_percent(Decimal::from(500), Decimal::ZERO), 0.0);
        assert_eq!(utilization_percent(Decimal::from(500), Decimal::from(-10)), 0.0);
    }

    #[test]
    fn test_utilization_ratio() {
        assert_eq!(
            utilization_percent(Decimal::from(32_500), Decimal::from(100_000)),
            32.5
        );
        assert_eq!(utilization_percent(Decimal::from(1), Decimal::from(3)), 33.33);
    }

    #[test]
    fn test_average() {
        assert_eq!(average(Vec::<u32>::new()), 0.0);
        assert_eq!(average([50, 100, 0]), 50.0);
    }

    #[test]
    fn test_sum_saturates() {
        assert_eq!(sum([Decimal::MAX, Decimal::ONE]), Decimal::MAX);
        assert_eq!(sum([Decimal::from(2), Decimal::from(3)]), Decimal::from(5));
    }
}
