use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Category, ExpenseRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub count: usize,
    pub total: Decimal,
    pub average: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub average_expense: Decimal,
    pub largest_expense: Option<Decimal>,
    pub smallest_expense: Option<Decimal>,
    pub most_common_category: Option<Category>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_days: i64,
}

impl DateRange {
    fn single(date: NaiveDate) -> Self {
        Self {
            start_date: date,
            end_date: date,
            duration_days: 1,
        }
    }

    fn extend(self, date: NaiveDate) -> Self {
        let start_date = self.start_date.min(date);
        let end_date = self.end_date.max(date);
        Self {
            start_date,
            end_date,
            duration_days: (end_date - start_date).num_days() + 1,
        }
    }
}

/// Submission-readiness view of a report.
///
/// Built by folding records with [`TripSummary::accumulate`], so summarizing a
/// list and then accumulating one more record gives the same value as
/// summarizing the longer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripSummary {
    pub total_amount: Decimal,
    pub amount_by_category: BTreeMap<Category, Decimal>,
    pub expense_count: usize,
    /// Expenses with at least one violation.
    pub violation_count: usize,
    /// Expenses with at least one required document. Advisory only.
    pub missing_document_count: usize,
    pub warning_count: usize,
    pub ready_for_submission: bool,
    pub categories: BTreeMap<Category, CategoryBreakdown>,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
    pub required_documents: BTreeSet<String>,
    pub policy_references: BTreeSet<String>,
    pub statistics: SummaryStatistics,
    pub date_range: Option<DateRange>,
}

impl Default for TripSummary {
    fn default() -> Self {
        Self {
            total_amount: Decimal::ZERO,
            amount_by_category: BTreeMap::new(),
            expense_count: 0,
            violation_count: 0,
            missing_document_count: 0,
            warning_count: 0,
            ready_for_submission: true,
            categories: BTreeMap::new(),
            violations: Vec::new(),
            warnings: Vec::new(),
            required_documents: BTreeSet::new(),
            policy_references: BTreeSet::new(),
            statistics: SummaryStatistics::default(),
            date_range: None,
        }
    }
}

impl TripSummary {
    pub fn accumulate(&mut self, record: &ExpenseRecord) {
        let amount = record.expense.amount;
        let category = record.categorization.category;
        let validation = &record.validation;

        self.expense_count += 1;
        let position = self.expense_count;

        // Amounts are capped upstream; saturate rather than panic on stored data.
        self.total_amount = self.total_amount.saturating_add(amount);
        let by_category = self.amount_by_category.entry(category).or_insert(Decimal::ZERO);
        *by_category = by_category.saturating_add(amount);

        let breakdown = self.categories.entry(category).or_default();
        breakdown.count += 1;
        breakdown.total = breakdown.total.saturating_add(amount);
        breakdown.average = average(breakdown.total, breakdown.count);

        if !validation.is_compliant {
            self.violation_count += 1;
            self.violations.extend(
                validation
                    .violations
                    .iter()
                    .map(|violation| format!("Expense #{position}: {violation}")),
            );
        }

        self.warning_count += validation.warnings.len();
        self.warnings.extend(
            validation
                .warnings
                .iter()
                .map(|warning| format!("Expense #{position}: {warning}")),
        );

        if validation.has_outstanding_documents() {
            self.missing_document_count += 1;
            self.required_documents
                .extend(validation.required_documents.iter().cloned());
        }
        self.policy_references
            .extend(validation.policy_references.iter().cloned());

        self.statistics.average_expense = average(self.total_amount, self.expense_count);
        self.statistics.largest_expense = Some(
            self.statistics
                .largest_expense
                .map_or(amount, |largest| largest.max(amount)),
        );
        self.statistics.smallest_expense = Some(
            self.statistics
                .smallest_expense
                .map_or(amount, |smallest| smallest.min(amount)),
        );
        self.statistics.most_common_category = most_common(&self.categories);

        // Metadata was already validated upstream; unparseable dates are skipped.
        if let Some(date) = record.expense.metadata.parse().ok().and_then(|m| m.date) {
            self.date_range = Some(match self.date_range {
                Some(range) => range.extend(date),
                None => DateRange::single(date),
            });
        }

        self.ready_for_submission = self.violation_count == 0;
    }
}

pub fn summarize(records: &[ExpenseRecord]) -> TripSummary {
    records.iter().fold(TripSummary::default(), |mut summary, record| {
        summary.accumulate(record);
        summary
    })
}

fn average(total: Decimal, count: usize) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    (total / Decimal::from(count)).round_dp(2)
}

/// Highest count wins; ties go to the category declared first.
fn most_common(categories: &BTreeMap<Category, CategoryBreakdown>) -> Option<Category> {
    categories
        .iter()
        .fold(None, |best: Option<(Category, usize)>, (category, breakdown)| match best {
            Some((_, count)) if count >= breakdown.count => best,
            _ => Some((*category, breakdown.count)),
        })
        .map(|(category, _)| category)
}
