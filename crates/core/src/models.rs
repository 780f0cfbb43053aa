use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExpenseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Transportation,
    Airfare,
    Lodging,
    Meals,
    OfficeSupplies,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::Transportation,
        Self::Airfare,
        Self::Lodging,
        Self::Meals,
        Self::OfficeSupplies,
        Self::Other,
    ];

    /// Accepts the snake_case name (spaces and dashes are folded into
    /// underscores) plus a handful of aliases callers commonly send.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "transportation" | "transport" | "travel" | "ground_transportation" => {
                Some(Self::Transportation)
            }
            "airfare" | "air_travel" => Some(Self::Airfare),
            "lodging" | "accommodation" | "accommodations" => Some(Self::Lodging),
            "meals" | "meal" | "meals_and_entertainment" => Some(Self::Meals),
            "office_supplies" | "office" | "supplies" => Some(Self::OfficeSupplies),
            "other" | "miscellaneous" | "misc" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transportation => "transportation",
            Self::Airfare => "airfare",
            Self::Lodging => "lodging",
            Self::Meals => "meals",
            Self::OfficeSupplies => "office_supplies",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
}

impl MealType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "breakfast" => Some(Self::Breakfast),
            "lunch" => Some(Self::Lunch),
            "dinner" => Some(Self::Dinner),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
        }
    }
}

/// Free-form key/value metadata attached to an expense by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpenseMetadata(BTreeMap<String, Value>);

impl ExpenseMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses the keys the validator understands. Unknown keys are ignored and
    /// `null` values count as absent.
    pub fn parse(&self) -> Result<ParsedMetadata, ExpenseError> {
        Ok(ParsedMetadata {
            nights: self.present("nights").map(|v| positive_integer("nights", v)).transpose()?,
            attendees: self
                .present("attendees")
                .map(|v| positive_integer("attendees", v))
                .transpose()?,
            is_client_meal: self
                .present("is_client_meal")
                .map(|v| boolean("is_client_meal", v))
                .transpose()?
                .unwrap_or(false),
            has_receipt: self
                .present("has_receipt")
                .map(|v| boolean("has_receipt", v))
                .transpose()?
                .unwrap_or(false),
            meal_type: self.present("meal_type").map(meal_type).transpose()?,
            date: self.present("date").map(expense_date).transpose()?,
            subcategory: self.present("subcategory").map(subcategory).transpose()?,
        })
    }

    fn present(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| !value.is_null())
    }
}

impl FromIterator<(String, Value)> for ExpenseMetadata {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMetadata {
    pub nights: Option<u32>,
    pub attendees: Option<u32>,
    pub is_client_meal: bool,
    /// The caller already holds the receipt for this expense.
    pub has_receipt: bool,
    pub meal_type: Option<MealType>,
    pub date: Option<NaiveDate>,
    pub subcategory: Option<String>,
}

fn positive_integer(key: &str, value: &Value) -> Result<u32, ExpenseError> {
    let parsed = match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse::<u32>().ok(),
        _ => None,
    };

    match parsed {
        Some(n) if n > 0 => Ok(n),
        _ => Err(ExpenseError::invalid_input(format!(
            "metadata `{key}` must be a positive integer, got {value}"
        ))),
    }
}

fn boolean(key: &str, value: &Value) -> Result<bool, ExpenseError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(ExpenseError::invalid_input(format!(
                "metadata `{key}` must be a boolean, got {value}"
            ))),
        },
        _ => Err(ExpenseError::invalid_input(format!(
            "metadata `{key}` must be a boolean, got {value}"
        ))),
    }
}

fn meal_type(value: &Value) -> Result<MealType, ExpenseError> {
    value.as_str().and_then(MealType::parse).ok_or_else(|| {
        ExpenseError::invalid_input(format!(
            "metadata `meal_type` must be one of breakfast, lunch, dinner, got {value}"
        ))
    })
}

fn expense_date(value: &Value) -> Result<NaiveDate, ExpenseError> {
    let parsed = value.as_str().and_then(|text| {
        let text = text.trim();
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|at| at.date_naive()))
    });

    parsed.ok_or_else(|| {
        ExpenseError::invalid_input(format!(
            "metadata `date` must be an ISO-8601 date or RFC 3339 timestamp, got {value}"
        ))
    })
}

fn subcategory(value: &Value) -> Result<String, ExpenseError> {
    value
        .as_str()
        .map(|text| text.trim().to_lowercase())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| {
            ExpenseError::invalid_input(format!(
                "metadata `subcategory` must be a non-empty string, got {value}"
            ))
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub description: String,
    pub amount: Decimal,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub category_hint: Option<String>,
    #[serde(default)]
    pub metadata: ExpenseMetadata,
}

impl Expense {
    pub fn new(description: impl Into<String>, amount: Decimal) -> Self {
        Self {
            description: description.into(),
            amount,
            merchant: None,
            category_hint: None,
            metadata: ExpenseMetadata::new(),
        }
    }

    pub fn with_merchant(mut self, merchant: impl Into<String>) -> Self {
        self.merchant = Some(merchant.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.category_hint = Some(hint.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key, value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeCategory {
    pub category: Category,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationResult {
    pub category: Category,
    pub subcategory: String,
    pub confidence: f32,
    #[serde(default)]
    pub alternatives: Vec<AlternativeCategory>,
}

impl CategorizationResult {
    pub fn uncategorized() -> Self {
        Self {
            category: Category::Other,
            subcategory: "uncategorized".to_string(),
            confidence: 0.0,
            alternatives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_compliant: bool,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
    pub required_documents: BTreeSet<String>,
    #[serde(default)]
    pub policy_references: Vec<String>,
}

impl ValidationResult {
    pub fn compliant() -> Self {
        Self {
            is_compliant: true,
            violations: Vec::new(),
            warnings: Vec::new(),
            required_documents: BTreeSet::new(),
            policy_references: Vec::new(),
        }
    }

    pub fn has_outstanding_documents(&self) -> bool {
        !self.required_documents.is_empty()
    }

    pub(crate) fn add_violation(&mut self, message: String) {
        self.is_compliant = false;
        self.violations.push(message);
    }

    pub(crate) fn cite(&mut self, reference: &str) {
        if !reference.is_empty() && !self.policy_references.iter().any(|r| r == reference) {
            self.policy_references.push(reference.to_string());
        }
    }
}

/// One entry of a report: the caller's expense plus the engine's verdicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub expense: Expense,
    pub categorization: CategorizationResult,
    pub validation: ValidationResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_category_aliases() {
        assert_eq!(Category::parse("Office Supplies"), Some(Category::OfficeSupplies));
        assert_eq!(Category::parse(" accommodation "), Some(Category::Lodging));
        assert_eq!(Category::parse("miscellaneous"), Some(Category::Other));
        assert_eq!(Category::parse("gifts"), None);
    }

    #[test]
    fn parses_string_metadata_values() {
        let metadata = ExpenseMetadata::new()
            .with("nights", "3")
            .with("is_client_meal", "yes")
            .with("meal_type", "Dinner")
            .with("date", "2024-03-09T19:30:00Z");

        let parsed = metadata.parse().unwrap();
        assert_eq!(parsed.nights, Some(3));
        assert!(parsed.is_client_meal);
        assert_eq!(parsed.meal_type, Some(MealType::Dinner));
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2024, 3, 9));
    }

    #[test]
    fn rejects_zero_nights() {
        let metadata = ExpenseMetadata::new().with("nights", 0);
        assert!(matches!(metadata.parse(), Err(ExpenseError::InvalidInput(_))));
    }

    #[test]
    fn rejects_non_boolean_client_flag() {
        let metadata = ExpenseMetadata::new().with("is_client_meal", json!([1]));
        let error = metadata.parse().unwrap_err();
        assert!(error.to_string().contains("is_client_meal"));
    }

    #[test]
    fn receipt_flag_must_be_boolean() {
        let metadata = ExpenseMetadata::new().with("has_receipt", "banana");
        let error = metadata.parse().unwrap_err();
        assert!(matches!(error, ExpenseError::InvalidInput(_)));
        assert!(error.to_string().contains("has_receipt"));

        assert!(ExpenseMetadata::new().with("has_receipt", "yes").parse().unwrap().has_receipt);
        assert!(!ExpenseMetadata::new().parse().unwrap().has_receipt);
    }

    #[test]
    fn null_values_are_absent() {
        let metadata = ExpenseMetadata::new().with("nights", Value::Null);
        assert_eq!(metadata.parse().unwrap().nights, None);
    }
}
