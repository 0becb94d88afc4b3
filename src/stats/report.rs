//! Per-project reports and payment summaries

use super::{
    average, sum, utilization_percent, CategoryTotals, DashboardSnapshot, TimeWindow,
};
use crate::models::{Entity, Payment, StockStatus, WorkStatus};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One section row of a project report, with its derived fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub id: String,
    pub name: String,
    pub status: WorkStatus,
    pub progress: u32,
    pub employee_count: usize,
    pub budget: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project_id: String,
    pub name: String,
    pub status: WorkStatus,
    pub window: TimeWindow,
    pub budget: Decimal,
    pub spent: Decimal,
    pub remaining: Decimal,
    pub utilization_percent: f64,
    pub average_progress: f64,
    pub sections: Vec<SectionSummary>,
    pub spending_by_category: CategoryTotals,
    pub inventory_value: Decimal,
    pub low_stock_items: usize,
}

/// Build the report for one project. `None` when the project is not in the snapshot.
pub fn project_report(
    snapshot: &DashboardSnapshot,
    project_id: &str,
    window: TimeWindow,
    today: NaiveDate,
) -> Option<ProjectReport> {
    let project = snapshot.projects.iter().find(|p| p.id == project_id)?;
    let owned = |pid: Option<&str>| pid == Some(project_id);

    let sections: Vec<SectionSummary> = snapshot
        .sections
        .iter()
        .filter(|s| owned(s.project_id()))
        .map(|s| SectionSummary {
            id: s.id.clone(),
            name: s.name.clone(),
            status: s.status,
            progress: s.progress(),
            employee_count: s.employee_count(&snapshot.employees),
            budget: s.budget,
        })
        .collect();

    let mut spending_by_category = CategoryTotals::default();
    let mut spent = Decimal::ZERO;
    for spending in snapshot
        .spendings
        .iter()
        .filter(|s| owned(s.project_id()))
        .filter(|s| window.includes_date(s.date, today))
    {
        spending_by_category.add(spending.category, spending.amount);
        spent = sum([spent, spending.amount]);
    }

    let items: Vec<_> = snapshot
        .inventory
        .iter()
        .filter(|i| owned(i.project_id()))
        .collect();

    Some(ProjectReport {
        project_id: project.id.clone(),
        name: project.name.clone(),
        status: project.status,
        window,
        budget: project.budget,
        spent,
        remaining: project.budget - spent,
        utilization_percent: utilization_percent(spent, project.budget),
        average_progress: average(sections.iter().map(|s| s.progress)),
        sections,
        spending_by_category,
        inventory_value: sum(items.iter().map(|i| i.total_value())),
        low_stock_items: items
            .iter()
            .filter(|i| i.status() != StockStatus::InStock)
            .count(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyTotals {
    pub egp: Decimal,
    pub usd: Decimal,
}

impl CurrencyTotals {
    fn add(&mut self, (egp, usd): (Decimal, Decimal)) {
        self.egp = sum([self.egp, egp]);
        self.usd = sum([self.usd, usd]);
    }
}

/// Payment totals split by currency, overall and per employee
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub count: usize,
    pub total_egp: Decimal,
    pub total_usd: Decimal,
    pub per_employee: BTreeMap<String, CurrencyTotals>,
}

pub fn payment_summary(payments: &[Payment], window: TimeWindow, today: NaiveDate) -> PaymentSummary {
    let mut summary = PaymentSummary::default();
    let mut totals = CurrencyTotals::default();

    for payment in payments
        .iter()
        .filter(|p| window.includes_date(p.payment_date, today))
    {
        let amounts = payment.amounts();
        summary.count += 1;
        totals.add(amounts);
        if let Some(employee_id) = &payment.employee_id {
            summary
                .per_employee
                .entry(employee_id.clone())
                .or_default()
                .add(amounts);
        }
    }

    summary.total_egp = totals.egp;
    summary.total_usd = totals.usd;
    summary
}
