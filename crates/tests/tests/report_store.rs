use std::sync::Arc;

use expense_agents::ExpenseAssistant;
use expense_core::{Categorizer, Decimal, Expense, PolicyTable, PolicyValidator};
use expense_observability::AppMetrics;
use expense_storage::Store;

async fn sqlite_assistant() -> ExpenseAssistant<Store> {
    let categorizer = Categorizer::standard();
    let validator = PolicyValidator::for_categorizer(PolicyTable::standard(), &categorizer)
        .expect("standard policy is complete");
    let store = Store::sqlite("sqlite::memory:")
        .await
        .expect("in-memory sqlite should open");

    ExpenseAssistant::new(categorizer, validator, Arc::new(store), AppMetrics::shared())
}

#[tokio::test]
async fn sqlite_backed_report_matches_stateless_summary() {
    let assistant = sqlite_assistant().await;
    let expenses = vec![
        Expense::new("Hyatt Regency", Decimal::from(610))
            .with_metadata("nights", 2)
            .with_metadata("date", "2024-05-06"),
        Expense::new("Airline ticket", Decimal::from(1200)).with_metadata("date", "2024-05-06"),
        Expense::new("Parking", Decimal::from(18)).with_metadata("date", "2024-05-08"),
    ];

    let mut report_id = None;
    for expense in expenses.clone() {
        let outcome = assistant
            .record_expense(report_id.clone(), Some("u-9".to_string()), expense)
            .await
            .expect("expense should record");
        report_id = Some(outcome.report_id);
    }

    let stored = assistant
        .report_summary(report_id.as_deref().unwrap())
        .await
        .unwrap()
        .expect("report should exist");
    let stateless = assistant.summarize(expenses).unwrap();

    assert_eq!(stored, stateless);
    assert_eq!(stored.expense_count, 3);
    assert_eq!(stored.violation_count, 1);
    assert!(stored.required_documents.contains("manager_approval"));
    assert_eq!(stored.date_range.map(|range| range.duration_days), Some(3));
}
