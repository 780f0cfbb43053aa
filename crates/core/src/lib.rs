pub mod categorizer;
pub mod error;
pub mod models;
pub mod policy;
pub mod summary;
pub mod validator;

pub use categorizer::{normalize_text, Categorizer, KeywordRule};
pub use error::ExpenseError;
pub use models::*;
pub use rust_decimal::Decimal;
pub use policy::{
    JustificationRule, LimitRule, MealTypeCaps, PolicyRule, PolicyTable, SubRule, SubRuleAction,
};
pub use summary::{summarize, CategoryBreakdown, DateRange, SummaryStatistics, TripSummary};
pub use validator::{
    PolicyValidator, MANAGER_APPROVAL_DOCUMENT, MAX_EXPENSE_AMOUNT, RECEIPT_DOCUMENT,
};
