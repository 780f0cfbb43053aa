use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ExpenseError;
use crate::models::{Category, MealType, ParsedMetadata};

/// How a category's hard limit is derived from the expense metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimitRule {
    Flat {
        limit: Decimal,
    },
    /// Nightly rate times `metadata.nights`, one night when absent.
    PerNight {
        nightly: Decimal,
    },
    /// Per-person caps times `metadata.attendees`. Client meals use the client cap.
    Meals {
        internal_per_person: Decimal,
        client_per_person: Decimal,
        #[serde(default)]
        meal_type_caps: MealTypeCaps,
    },
    Unlimited,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MealTypeCaps {
    #[serde(default)]
    pub breakfast: Option<Decimal>,
    #[serde(default)]
    pub lunch: Option<Decimal>,
    #[serde(default)]
    pub dinner: Option<Decimal>,
}

impl MealTypeCaps {
    pub fn cap(&self, meal_type: MealType) -> Option<Decimal> {
        match meal_type {
            MealType::Breakfast => self.breakfast,
            MealType::Lunch => self.lunch,
            MealType::Dinner => self.dinner,
        }
    }

    fn values(&self) -> impl Iterator<Item = Decimal> + '_ {
        [self.breakfast, self.lunch, self.dinner].into_iter().flatten()
    }
}

/// A single limit the amount is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitDimension {
    pub name: String,
    pub limit: Decimal,
}

impl LimitRule {
    /// Dimensions in evaluation order.
    pub fn dimensions(&self, category: Category, metadata: &ParsedMetadata) -> Vec<LimitDimension> {
        match self {
            Self::Flat { limit } => vec![LimitDimension {
                name: format!("{} limit", category.as_str().replace('_', " ")),
                limit: *limit,
            }],
            Self::PerNight { nightly } => {
                let nights = metadata.nights.unwrap_or(1);
                vec![LimitDimension {
                    name: format!(
                        "lodging limit for {nights} {}",
                        if nights == 1 { "night" } else { "nights" }
                    ),
                    limit: *nightly * Decimal::from(nights),
                }]
            }
            Self::Meals {
                internal_per_person,
                client_per_person,
                meal_type_caps,
            } => {
                let attendees = metadata.attendees.unwrap_or(1);
                let headcount = Decimal::from(attendees);
                let suffix = if attendees > 1 {
                    format!(" for {attendees} attendees")
                } else {
                    String::new()
                };

                let (kind, per_person) = if metadata.is_client_meal {
                    ("client", *client_per_person)
                } else {
                    ("internal", *internal_per_person)
                };

                let mut dimensions = vec![LimitDimension {
                    name: format!("{kind} meal limit{suffix}"),
                    limit: per_person * headcount,
                }];

                if let Some((meal_type, cap)) = metadata
                    .meal_type
                    .and_then(|meal_type| meal_type_caps.cap(meal_type).map(|cap| (meal_type, cap)))
                {
                    dimensions.push(LimitDimension {
                        name: format!("{} limit{suffix}", meal_type.as_str()),
                        limit: cap * headcount,
                    });
                }

                dimensions
            }
            Self::Unlimited => Vec::new(),
        }
    }

    fn limits(&self) -> Vec<Decimal> {
        match self {
            Self::Flat { limit } => vec![*limit],
            Self::PerNight { nightly } => vec![*nightly],
            Self::Meals {
                internal_per_person,
                client_per_person,
                meal_type_caps,
            } => [*internal_per_person, *client_per_person]
                .into_iter()
                .chain(meal_type_caps.values())
                .collect(),
            Self::Unlimited => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubRuleAction {
    Warn { message: String },
    RequireDocuments { documents: Vec<String> },
}

/// Applies when `metadata.subcategory` equals `subcategory` and the amount is
/// strictly above `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRule {
    pub subcategory: String,
    pub threshold: Decimal,
    pub action: SubRuleAction,
}

/// Warns when the amount is strictly above `above` and the description does
/// not mention `keyword` (case-insensitive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JustificationRule {
    pub above: Decimal,
    pub keyword: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub category: Category,
    pub limit: LimitRule,
    #[serde(default = "default_review_fraction")]
    pub review_fraction: Decimal,
    #[serde(default)]
    pub approval_threshold: Option<Decimal>,
    #[serde(default)]
    pub required_documents: Vec<String>,
    #[serde(default)]
    pub sub_rules: Vec<SubRule>,
    #[serde(default)]
    pub justification: Option<JustificationRule>,
    #[serde(default)]
    pub reference: String,
}

fn default_review_fraction() -> Decimal {
    Decimal::ONE
}

impl PolicyRule {
    pub fn new(category: Category, limit: LimitRule) -> Self {
        Self {
            category,
            limit,
            review_fraction: default_review_fraction(),
            approval_threshold: None,
            required_documents: Vec::new(),
            sub_rules: Vec::new(),
            justification: None,
            reference: String::new(),
        }
    }

    pub fn unlimited(category: Category) -> Self {
        Self::new(category, LimitRule::Unlimited)
    }

    pub fn review_at(mut self, fraction: Decimal) -> Self {
        self.review_fraction = fraction;
        self
    }

    pub fn approval_over(mut self, threshold: Decimal) -> Self {
        self.approval_threshold = Some(threshold);
        self
    }

    pub fn documents(mut self, documents: &[&str]) -> Self {
        self.required_documents = documents.iter().map(ToString::to_string).collect();
        self
    }

    pub fn sub_rule(mut self, subcategory: &str, threshold: Decimal, action: SubRuleAction) -> Self {
        self.sub_rules.push(SubRule {
            subcategory: subcategory.to_string(),
            threshold,
            action,
        });
        self
    }

    pub fn justify_above(mut self, above: Decimal, keyword: &str, message: &str) -> Self {
        self.justification = Some(JustificationRule {
            above,
            keyword: keyword.to_string(),
            message: message.to_string(),
        });
        self
    }

    pub fn reference(mut self, reference: &str) -> Self {
        self.reference = reference.to_string();
        self
    }
}

/// The static policy configuration, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyTable {
    /// Any expense strictly above this amount needs a receipt.
    pub documentation_threshold: Decimal,
    #[serde(default)]
    pub documentation_reference: String,
    pub rules: Vec<PolicyRule>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl PolicyTable {
    pub fn standard() -> Self {
        let review = Decimal::new(8, 1);

        Self {
            documentation_threshold: Decimal::from(25),
            documentation_reference: "Section 2.1 - Documentation Requirements".to_string(),
            rules: vec![
                PolicyRule::new(
                    Category::Transportation,
                    LimitRule::Flat {
                        limit: Decimal::from(500),
                    },
                )
                .review_at(review)
                .sub_rule(
                    "rideshare",
                    Decimal::from(75),
                    SubRuleAction::Warn {
                        message: "Ride-share expenses over $75.00 may require business justification"
                            .to_string(),
                    },
                )
                .sub_rule(
                    "car_rental",
                    Decimal::from(500),
                    SubRuleAction::RequireDocuments {
                        documents: vec![
                            "car_rental_agreement".to_string(),
                            "fuel_receipts".to_string(),
                        ],
                    },
                )
                .reference("Section 5.3 - Ground Transportation"),
                PolicyRule::new(
                    Category::Airfare,
                    LimitRule::Flat {
                        limit: Decimal::from(1500),
                    },
                )
                .review_at(review)
                .approval_over(Decimal::from(1000))
                .documents(&["flight_itinerary"])
                .reference("Section 5.1 - Air Travel"),
                PolicyRule::new(
                    Category::Lodging,
                    LimitRule::PerNight {
                        nightly: Decimal::from(300),
                    },
                )
                .review_at(review)
                .documents(&["hotel_receipt"])
                .reference("Section 4.1 - Accommodation Limits"),
                PolicyRule::new(
                    Category::Meals,
                    LimitRule::Meals {
                        internal_per_person: Decimal::from(100),
                        client_per_person: Decimal::from(75),
                        meal_type_caps: MealTypeCaps {
                            breakfast: Some(Decimal::from(25)),
                            lunch: Some(Decimal::from(35)),
                            dinner: Some(Decimal::from(75)),
                        },
                    },
                )
                .review_at(review)
                .justify_above(
                    Decimal::from(50),
                    "business",
                    "High meal expense should include business justification",
                )
                .reference("Section 3.2 - Meal Allowances"),
                PolicyRule::new(
                    Category::OfficeSupplies,
                    LimitRule::Flat {
                        limit: Decimal::from(250),
                    },
                )
                .review_at(review)
                .reference("Section 6.2 - Office Supplies"),
                PolicyRule::unlimited(Category::Other),
            ],
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ExpenseError> {
        let table: Self = toml::from_str(text).map_err(|error| {
            ExpenseError::Configuration(format!("could not parse policy table: {error}"))
        })?;
        table.check_well_formed()?;
        Ok(table)
    }

    pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self, ExpenseError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|error| {
            ExpenseError::Configuration(format!(
                "could not read policy file `{}`: {error}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn rule_for(&self, category: Category) -> Option<&PolicyRule> {
        self.rules.iter().find(|rule| rule.category == category)
    }

    /// Rejects negative amounts, review fractions outside `[0, 1]`, and
    /// duplicate category rules. All problems are reported together.
    pub fn check_well_formed(&self) -> Result<(), ExpenseError> {
        let mut problems = Vec::new();

        if self.documentation_threshold < Decimal::ZERO {
            problems.push("documentation_threshold must not be negative".to_string());
        }

        let mut seen = BTreeSet::new();
        for rule in &self.rules {
            let name = rule.category.as_str();
            if !seen.insert(rule.category) {
                problems.push(format!("category `{name}` has more than one rule"));
            }
            if rule.limit.limits().iter().any(|limit| *limit < Decimal::ZERO) {
                problems.push(format!("category `{name}` has a negative limit"));
            }
            if rule.review_fraction < Decimal::ZERO || rule.review_fraction > Decimal::ONE {
                problems.push(format!("category `{name}` review_fraction must be within [0, 1]"));
            }
            if rule.approval_threshold.is_some_and(|t| t < Decimal::ZERO) {
                problems.push(format!("category `{name}` has a negative approval_threshold"));
            }
            if rule.sub_rules.iter().any(|sub| sub.threshold < Decimal::ZERO) {
                problems.push(format!("category `{name}` has a sub-rule with a negative threshold"));
            }
            if let Some(justification) = &rule.justification {
                if justification.above < Decimal::ZERO {
                    problems.push(format!("category `{name}` has a negative justification threshold"));
                }
                if justification.keyword.trim().is_empty() {
                    problems.push(format!("category `{name}` has an empty justification keyword"));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ExpenseError::Configuration(problems.join("; ")))
        }
    }

    /// Every listed category needs a rule; an explicit `unlimited` rule counts.
    pub fn check_completeness(
        &self,
        categories: impl IntoIterator<Item = Category>,
    ) -> Result<(), ExpenseError> {
        let missing: Vec<&str> = categories
            .into_iter()
            .filter(|category| self.rule_for(*category).is_none())
            .map(Category::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExpenseError::Configuration(format!(
                "policy table has no rule for: {}",
                missing.join(", ")
            )))
        }
    }
}
