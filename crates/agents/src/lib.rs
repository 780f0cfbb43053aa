use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{Duration, Utc};
use expense_core::{
    normalize_text, summarize, CategorizationResult, Categorizer, Category, Expense, ExpenseError,
    ExpenseRecord, PolicyTable, PolicyValidator, TripSummary, ValidationResult,
};
use expense_observability::AppMetrics;
use expense_storage::ReportRepository;
use serde::Serialize;
use tracing::{error, info, instrument};
use uuid::Uuid;

pub const DEFAULT_REPORT_TTL_HOURS: i64 = 72;

#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub report_id: String,
    pub record: ExpenseRecord,
    pub summary: TripSummary,
}

/// Drives categorize → validate → summarize for the caller and keeps each
/// report's expense log in the store.
#[derive(Clone)]
pub struct ExpenseAssistant<S>
where
    S: ReportRepository,
{
    categorizer: Arc<Categorizer>,
    validator: Arc<PolicyValidator>,
    store: Arc<S>,
    metrics: Arc<AppMetrics>,
    report_ttl: Duration,
}

impl<S> ExpenseAssistant<S>
where
    S: ReportRepository,
{
    pub fn new(
        categorizer: Categorizer,
        validator: PolicyValidator,
        store: Arc<S>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            categorizer: Arc::new(categorizer),
            validator: Arc::new(validator),
            store,
            metrics,
            report_ttl: Duration::hours(DEFAULT_REPORT_TTL_HOURS),
        }
    }

    pub fn with_report_ttl(mut self, report_ttl: Duration) -> Self {
        self.report_ttl = report_ttl;
        self
    }

    pub fn policy(&self) -> &PolicyTable {
        self.validator.table()
    }

    pub fn categorize(&self, expense: &Expense) -> CategorizationResult {
        self.metrics.inc_request();
        self.categorizer.categorize_expense(expense)
    }

    /// Validates under `category` when given, otherwise under the inferred one.
    pub fn validate(&self, expense: &Expense, category: Option<Category>) -> Result<ValidationResult> {
        self.metrics.inc_request();

        let categorization = match category {
            Some(category) => self.categorizer.categorize(
                &expense.description,
                expense.amount,
                Some(category.as_str()),
            ),
            None => self.categorizer.categorize_expense(expense),
        };

        self.run_validation(expense, &categorization)
    }

    /// Runs the full pipeline over `expenses` without touching the store.
    pub fn summarize(&self, expenses: Vec<Expense>) -> Result<TripSummary> {
        self.metrics.inc_request();

        let records = expenses
            .into_iter()
            .map(|expense| self.process(expense))
            .collect::<Result<Vec<_>>>()?;

        Ok(summarize(&records))
    }

    #[instrument(skip(self, expense), fields(amount = %expense.amount))]
    pub async fn record_expense(
        &self,
        report_id: Option<String>,
        user_id: Option<String>,
        mut expense: Expense,
    ) -> Result<RecordOutcome> {
        let started = Instant::now();
        self.metrics.inc_request();

        expense.description = normalize_text(&expense.description);
        let record = self.process(expense)?;

        let report_id = report_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let report = self
            .store
            .append_record(
                &report_id,
                user_id.as_deref(),
                Utc::now() + self.report_ttl,
                &record,
            )
            .await?;
        self.metrics.inc_expense_recorded();

        let summary = report.summary();

        self.metrics.observe_latency(started.elapsed());
        info!(
            report_id = %report_id,
            category = %record.categorization.category,
            compliant = record.validation.is_compliant,
            expense_count = summary.expense_count,
            ready = summary.ready_for_submission,
            "expense recorded"
        );

        Ok(RecordOutcome {
            report_id,
            record,
            summary,
        })
    }

    pub async fn report_summary(&self, report_id: &str) -> Result<Option<TripSummary>> {
        self.metrics.inc_request();
        let report = self.store.load_report(report_id).await?;
        Ok(report.map(|report| report.summary()))
    }

    pub async fn purge_expired_reports(&self) -> Result<u64> {
        self.store.purge_expired(Utc::now()).await
    }

    fn process(&self, expense: Expense) -> Result<ExpenseRecord> {
        let categorization = self.categorizer.categorize_expense(&expense);
        let validation = self.run_validation(&expense, &categorization)?;

        Ok(ExpenseRecord {
            expense,
            categorization,
            validation,
        })
    }

    fn run_validation(
        &self,
        expense: &Expense,
        categorization: &CategorizationResult,
    ) -> Result<ValidationResult> {
        match self.validator.validate_expense(expense, categorization) {
            Ok(validation) => {
                self.metrics.add_violations(validation.violations.len());
                self.metrics.add_warnings(validation.warnings.len());
                Ok(validation)
            }
            Err(err @ ExpenseError::Configuration(_)) => {
                self.metrics.inc_configuration_error();
                error!(category = %categorization.category, error = %err, "policy misconfigured");
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }
}
