use chrono::{Datelike, Weekday};
use rust_decimal::Decimal;
use tracing::debug;

use crate::categorizer::Categorizer;
use crate::error::ExpenseError;
use crate::models::{
    CategorizationResult, Category, Expense, ExpenseMetadata, ParsedMetadata, ValidationResult,
};
use crate::policy::{LimitDimension, PolicyRule, PolicyTable, SubRuleAction};

pub const RECEIPT_DOCUMENT: &str = "receipt";
pub const MANAGER_APPROVAL_DOCUMENT: &str = "manager_approval";

/// Largest amount accepted for a single expense ($1,000,000,000.00). Keeps
/// report totals far from `Decimal` overflow.
pub const MAX_EXPENSE_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Checks expenses against a [`PolicyTable`].
///
/// Checks run in a fixed order so that message order is reproducible:
/// input parsing, rule lookup, hard limits (with review warnings), approval
/// escalation, subcategory sub-rules, required documents, weekend flag.
#[derive(Debug, Clone)]
pub struct PolicyValidator {
    table: PolicyTable,
}

impl PolicyValidator {
    /// Builds a validator without a completeness check. A category without a
    /// rule surfaces as a configuration error on the first `validate` call.
    pub fn new(table: PolicyTable) -> Self {
        Self { table }
    }

    /// Builds a validator after checking that the table is well formed and
    /// covers every category the categorizer can emit.
    pub fn for_categorizer(
        table: PolicyTable,
        categorizer: &Categorizer,
    ) -> Result<Self, ExpenseError> {
        table.check_well_formed()?;
        table.check_completeness(categorizer.categories())?;
        table.check_completeness(Category::ALL)?;
        Ok(Self::new(table))
    }

    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    pub fn validate(
        &self,
        category: Category,
        amount: Decimal,
        metadata: &ExpenseMetadata,
    ) -> Result<ValidationResult, ExpenseError> {
        if amount < Decimal::ZERO {
            return Err(ExpenseError::invalid_input(format!(
                "amount must not be negative, got {amount}"
            )));
        }
        if amount > MAX_EXPENSE_AMOUNT {
            return Err(ExpenseError::invalid_input(format!(
                "amount must not exceed {}, got {amount}",
                money(MAX_EXPENSE_AMOUNT)
            )));
        }
        let metadata = metadata.parse()?;

        let rule = self
            .table
            .rule_for(category)
            .ok_or_else(|| ExpenseError::missing_rule(category))?;

        let mut result = ValidationResult::compliant();
        let noun = expense_noun(category);

        for dimension in rule.limit.dimensions(category, &metadata) {
            self.check_dimension(&mut result, rule, noun, amount, &dimension);
        }

        if let Some(threshold) = rule.approval_threshold {
            if amount > threshold {
                result.warnings.push(format!(
                    "{noun} of {} exceeds {} and requires manager approval",
                    money(amount),
                    money(threshold)
                ));
                result
                    .required_documents
                    .insert(MANAGER_APPROVAL_DOCUMENT.to_string());
                result.cite(&rule.reference);
            }
        }

        apply_sub_rules(&mut result, rule, amount, &metadata);

        result
            .required_documents
            .extend(rule.required_documents.iter().cloned());

        if amount > self.table.documentation_threshold && !metadata.has_receipt {
            result.required_documents.insert(RECEIPT_DOCUMENT.to_string());
            result.cite(&self.table.documentation_reference);
        }

        if metadata
            .date
            .is_some_and(|date| matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
        {
            result
                .warnings
                .push("Weekend expense flagged for review".to_string());
        }

        debug!(
            category = %category,
            amount = %amount,
            compliant = result.is_compliant,
            violations = result.violations.len(),
            warnings = result.warnings.len(),
            "expense validated"
        );

        Ok(result)
    }

    /// Validates with the category from `categorization`, passing its
    /// subcategory along unless the caller already set one. The rule's
    /// justification check runs last, against the description.
    pub fn validate_expense(
        &self,
        expense: &Expense,
        categorization: &CategorizationResult,
    ) -> Result<ValidationResult, ExpenseError> {
        let category = categorization.category;
        let mut result = if expense.metadata.contains_key("subcategory") {
            self.validate(category, expense.amount, &expense.metadata)?
        } else {
            let metadata = expense
                .metadata
                .clone()
                .with("subcategory", categorization.subcategory.as_str());
            self.validate(category, expense.amount, &metadata)?
        };

        if let Some(justification) = self
            .table
            .rule_for(category)
            .and_then(|rule| rule.justification.as_ref())
        {
            if expense.amount > justification.above
                && !expense
                    .description
                    .to_lowercase()
                    .contains(&justification.keyword.to_lowercase())
            {
                result.warnings.push(justification.message.clone());
            }
        }

        Ok(result)
    }

    fn check_dimension(
        &self,
        result: &mut ValidationResult,
        rule: &PolicyRule,
        noun: &str,
        amount: Decimal,
        dimension: &LimitDimension,
    ) {
        if amount > dimension.limit {
            result.add_violation(format!(
                "{noun} of {} exceeds the {} of {} by {}",
                money(amount),
                dimension.name,
                money(dimension.limit),
                money(amount - dimension.limit)
            ));
            result.cite(&rule.reference);
            return;
        }

        let review_threshold = dimension.limit * rule.review_fraction;
        if rule.review_fraction < Decimal::ONE && amount > review_threshold {
            result.warnings.push(format!(
                "{noun} of {} is above the review threshold of {} for the {} of {}",
                money(amount),
                money(review_threshold),
                dimension.name,
                money(dimension.limit)
            ));
        }
    }
}

fn apply_sub_rules(
    result: &mut ValidationResult,
    rule: &PolicyRule,
    amount: Decimal,
    metadata: &ParsedMetadata,
) {
    let Some(subcategory) = metadata.subcategory.as_deref() else {
        return;
    };

    for sub_rule in rule
        .sub_rules
        .iter()
        .filter(|sub_rule| sub_rule.subcategory == subcategory && amount > sub_rule.threshold)
    {
        match &sub_rule.action {
            SubRuleAction::Warn { message } => result.warnings.push(message.clone()),
            SubRuleAction::RequireDocuments { documents } => {
                result.required_documents.extend(documents.iter().cloned());
                result.cite(&rule.reference);
            }
        }
    }
}

fn expense_noun(category: Category) -> &'static str {
    match category {
        Category::Transportation => "Transportation expense",
        Category::Airfare => "Airfare expense",
        Category::Lodging => "Lodging expense",
        Category::Meals => "Meal expense",
        Category::OfficeSupplies => "Office supplies expense",
        Category::Other => "Expense",
    }
}

fn money(amount: Decimal) -> String {
    format!("${:.2}", amount)
}
