//! Dashboard statistics

use super::{average, sum, utilization_percent, DashboardSnapshot, StatsFilter, TimeWindow};
use crate::models::{Entity, SpendingCategory, StockStatus, WorkStatus};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub not_started: usize,
    pub in_progress: usize,
    pub completed: usize,
}

impl StatusCounts {
    fn add(&mut self, status: WorkStatus) {
        self.total += 1;
        match status {
            WorkStatus::NotStarted => self.not_started += 1,
            WorkStatus::InProgress => self.in_progress += 1,
            WorkStatus::Completed => self.completed += 1,
        }
    }

    /// completed / total × 100, 0 when there is nothing to count
    pub fn completion_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }
}

/// Spending totals per category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub materials: Decimal,
    pub labor: Decimal,
    pub equipment: Decimal,
    pub consulting: Decimal,
    pub other: Decimal,
}

impl CategoryTotals {
    pub fn add(&mut self, category: SpendingCategory, amount: Decimal) {
        let slot = match category {
            SpendingCategory::Materials => &mut self.materials,
            SpendingCategory::Labor => &mut self.labor,
            SpendingCategory::Equipment => &mut self.equipment,
            SpendingCategory::Consulting => &mut self.consulting,
            SpendingCategory::Other => &mut self.other,
        };
        *slot = sum([*slot, amount]);
    }

    pub fn get(&self, category: SpendingCategory) -> Decimal {
        match category {
            SpendingCategory::Materials => self.materials,
            SpendingCategory::Labor => self.labor,
            SpendingCategory::Equipment => self.equipment,
            SpendingCategory::Consulting => self.consulting,
            SpendingCategory::Other => self.other,
        }
    }

    pub fn total(&self) -> Decimal {
        sum([
            self.materials,
            self.labor,
            self.equipment,
            self.consulting,
            self.other,
        ])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionStats {
    pub total: usize,
    pub completed: usize,
    pub average_progress: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryStats {
    pub total_items: usize,
    pub low_stock: usize,
    pub out_of_stock: usize,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeStats {
    pub total: usize,
    pub active: usize,
}

/// Everything the dashboard shows, for one filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub window: TimeWindow,
    pub project_id: Option<String>,
    pub projects: StatusCounts,
    pub total_budget: Decimal,
    pub total_spending: Decimal,
    pub remaining: Decimal,
    pub utilization_percent: f64,
    pub sections: SectionStats,
    pub spending_by_category: CategoryTotals,
    pub inventory: InventoryStats,
    pub employees: EmployeeStats,
}

/// Compute dashboard statistics from a snapshot
pub fn dashboard_stats(
    snapshot: &DashboardSnapshot,
    filter: &StatsFilter,
    today: NaiveDate,
) -> DashboardStats {
    let window = filter.window;

    let projects: Vec<_> = snapshot
        .projects
        .iter()
        .filter(|p| filter.matches_project(Some(p.id.as_str())))
        .filter(|p| window.includes_span(p.start_date, p.end_date, today))
        .collect();

    let mut project_counts = StatusCounts::default();
    for project in &projects {
        project_counts.add(project.status);
    }
    let total_budget = sum(projects.iter().map(|p| p.budget));

    let spendings: Vec<_> = snapshot
        .spendings
        .iter()
        .filter(|s| filter.matches_project(s.project_id()))
        .filter(|s| window.includes_date(s.date, today))
        .collect();

    let mut spending_by_category = CategoryTotals::default();
    for spending in &spendings {
        spending_by_category.add(spending.category, spending.amount);
    }
    let total_spending = sum(spendings.iter().map(|s| s.amount));

    let sections: Vec<_> = snapshot
        .sections
        .iter()
        .filter(|s| filter.matches_project(s.project_id()))
        .filter(|s| window.includes_date(s.start_date, today))
        .collect();

    let section_stats = SectionStats {
        total: sections.len(),
        completed: sections
            .iter()
            .filter(|s| s.status == WorkStatus::Completed)
            .count(),
        average_progress: average(sections.iter().map(|s| s.progress())),
    };

    let items: Vec<_> = snapshot
        .inventory
        .iter()
        .filter(|i| filter.matches_project(i.project_id()))
        .collect();

    let inventory = InventoryStats {
        total_items: items.len(),
        low_stock: items
            .iter()
            .filter(|i| i.status() == StockStatus::LowStock)
            .count(),
        out_of_stock: items
            .iter()
            .filter(|i| i.status() == StockStatus::OutOfStock)
            .count(),
        total_value: sum(items.iter().map(|i| i.total_value())),
    };

    // With a project filter, only employees assigned to that project's sections count
    let project_sections: Option<HashSet<&str>> = filter.project_id.as_deref().map(|pid| {
        snapshot
            .sections
            .iter()
            .filter(|s| s.project_id.as_deref() == Some(pid))
            .map(|s| s.id.as_str())
            .collect()
    });
    let employees: Vec<_> = snapshot
        .employees
        .iter()
        .filter(|e| match &project_sections {
            Some(ids) => e.section_id.as_deref().is_some_and(|sid| ids.contains(sid)),
            None => true,
        })
        .collect();

    DashboardStats {
        window,
        project_id: filter.project_id.clone(),
        projects: project_counts,
        total_budget,
        total_spending,
        remaining: total_budget - total_spending,
        utilization_percent: utilization_percent(total_spending, total_budget),
        sections: section_stats,
        spending_by_category,
        inventory,
        employees: EmployeeStats {
            total: employees.len(),
            active: employees.iter().filter(|e| e.active).count(),
        },
    }
}
