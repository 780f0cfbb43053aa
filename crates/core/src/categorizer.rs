use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use crate::models::{AlternativeCategory, CategorizationResult, Category, Expense};

const MAX_ALTERNATIVES: usize = 2;

pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// One row of the keyword table. Rules are evaluated in declaration order and
/// the first one that matches decides the category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keywords: Vec<String>,
    pub category: Category,
    pub subcategory: String,
    pub confidence: f32,
    /// When set, the rule only matches amounts strictly above this value.
    #[serde(default)]
    pub min_amount: Option<Decimal>,
}

impl KeywordRule {
    pub fn new(keywords: &[&str], category: Category, subcategory: &str, confidence: f32) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            category,
            subcategory: subcategory.to_string(),
            confidence,
            min_amount: None,
        }
    }

    pub fn above(mut self, amount: Decimal) -> Self {
        self.min_amount = Some(amount);
        self
    }

    fn matches(&self, words: &[String], amount: Decimal) -> bool {
        if self.min_amount.is_some_and(|min| amount <= min) {
            return false;
        }

        self.keywords
            .iter()
            .any(|keyword| contains_phrase(words, keyword))
    }
}

#[derive(Debug, Clone)]
pub struct Categorizer {
    rules: Vec<KeywordRule>,
}

impl Default for Categorizer {
    fn default() -> Self {
        Self::standard()
    }
}

impl Categorizer {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    pub fn standard() -> Self {
        use Category::*;

        let business_meal_floor = Decimal::from(75);

        Self::new(vec![
            KeywordRule::new(
                &["flight", "airline", "airfare", "plane ticket", "boarding pass"],
                Airfare,
                "flight",
                0.95,
            ),
            KeywordRule::new(&["plane"], Airfare, "flight", 0.8),
            KeywordRule::new(&["uber", "lyft", "taxi", "rideshare"], Transportation, "rideshare", 0.9),
            KeywordRule::new(&["cab"], Transportation, "rideshare", 0.8),
            KeywordRule::new(
                &["car rental", "rental car", "hertz", "avis", "enterprise"],
                Transportation,
                "car_rental",
                0.9,
            ),
            KeywordRule::new(&["rental"], Transportation, "car_rental", 0.7),
            KeywordRule::new(&["parking", "toll"], Transportation, "misc_transport", 0.8),
            KeywordRule::new(&["mileage"], Transportation, "mileage", 0.85),
            KeywordRule::new(&["train", "rail", "amtrak", "bus"], Transportation, "transit", 0.8),
            KeywordRule::new(&["gas", "fuel"], Transportation, "fuel", 0.6),
            KeywordRule::new(
                &["client dinner", "client lunch", "client breakfast", "client meal"],
                Meals,
                "client_meal",
                0.95,
            ),
            KeywordRule::new(
                &["dinner", "lunch", "breakfast", "meal", "restaurant"],
                Meals,
                "business_meal",
                0.85,
            )
            .above(business_meal_floor),
            KeywordRule::new(&["breakfast"], Meals, "breakfast", 0.85),
            KeywordRule::new(&["lunch"], Meals, "lunch", 0.85),
            KeywordRule::new(&["dinner"], Meals, "dinner", 0.85),
            KeywordRule::new(&["restaurant", "meal"], Meals, "general", 0.9),
            KeywordRule::new(&["cafe", "coffee", "starbucks", "mcdonald", "subway"], Meals, "general", 0.8),
            KeywordRule::new(&["food"], Meals, "general", 0.7),
            KeywordRule::new(
                &["hotel", "motel", "lodging", "marriott", "hilton", "hyatt"],
                Lodging,
                "hotel",
                0.9,
            ),
            KeywordRule::new(&["accommodation", "resort", "inn"], Lodging, "hotel", 0.85),
            KeywordRule::new(&["airbnb", "vrbo"], Lodging, "short_term_rental", 0.8),
            KeywordRule::new(
                &["office supplies", "stationery", "staples", "printer", "toner"],
                OfficeSupplies,
                "general",
                0.85,
            ),
            KeywordRule::new(&["office", "supplies", "paper"], OfficeSupplies, "general", 0.7),
            KeywordRule::new(&["amazon"], OfficeSupplies, "general", 0.4),
        ])
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    /// Every category this categorizer can produce, including the fallback.
    pub fn categories(&self) -> BTreeSet<Category> {
        self.rules
            .iter()
            .map(|rule| rule.category)
            .chain(std::iter::once(Category::Other))
            .collect()
    }

    pub fn categorize_expense(&self, expense: &Expense) -> CategorizationResult {
        let text = match expense.merchant.as_deref() {
            Some(merchant) if !merchant.trim().is_empty() => {
                format!("{} {}", expense.description, merchant)
            }
            _ => expense.description.clone(),
        };

        self.categorize(&text, expense.amount, expense.category_hint.as_deref())
    }

    pub fn categorize(
        &self,
        description: &str,
        amount: Decimal,
        category_hint: Option<&str>,
    ) -> CategorizationResult {
        let words = tokenize(description);

        if let Some(category) = category_hint.and_then(Category::parse) {
            let subcategory = self
                .rules
                .iter()
                .find(|rule| rule.category == category && rule.matches(&words, amount))
                .map(|rule| rule.subcategory.clone())
                .unwrap_or_else(|| "general".to_string());

            return CategorizationResult {
                category,
                subcategory,
                confidence: 1.0,
                alternatives: Vec::new(),
            };
        }

        let mut matching = self.rules.iter().filter(|rule| rule.matches(&words, amount));

        let Some(winner) = matching.next() else {
            debug!(description, "no keyword rule matched");
            return CategorizationResult::uncategorized();
        };

        let mut alternatives: Vec<AlternativeCategory> = Vec::new();
        for rule in matching {
            if alternatives.len() == MAX_ALTERNATIVES {
                break;
            }
            if rule.category != winner.category
                && !alternatives.iter().any(|alt| alt.category == rule.category)
            {
                alternatives.push(AlternativeCategory {
                    category: rule.category,
                    confidence: rule.confidence,
                });
            }
        }

        debug!(
            category = %winner.category,
            subcategory = %winner.subcategory,
            "keyword rule matched"
        );

        CategorizationResult {
            category: winner.category,
            subcategory: winner.subcategory.clone(),
            confidence: winner.confidence,
            alternatives,
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let parts: Vec<&str> = phrase.split_whitespace().collect();
    if parts.is_empty() || parts.len() > words.len() {
        return false;
    }

    words.windows(parts.len()).any(|window| {
        window
            .iter()
            .zip(&parts)
            .all(|(word, part)| word_matches(word, part))
    })
}

fn word_matches(word: &str, keyword: &str) -> bool {
    let word = word.strip_suffix("'s").unwrap_or(word);
    word == keyword
        || word
            .strip_prefix(keyword)
            .is_some_and(|rest| rest == "s" || rest == "es")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categorizer() -> Categorizer {
        Categorizer::standard()
    }

    #[test]
    fn rideshare_wins_over_later_lodging_rule() {
        let result = categorizer().categorize("Uber from airport to hotel", Decimal::from(45), None);
        assert_eq!(result.category, Category::Transportation);
        assert_eq!(result.subcategory, "rideshare");
        assert_eq!(result.confidence, 0.9);
        assert_eq!(
            result.alternatives,
            vec![AlternativeCategory {
                category: Category::Lodging,
                confidence: 0.9
            }]
        );
    }

    #[test]
    fn unknown_text_falls_back_to_other() {
        let result = categorizer().categorize("conference swag", Decimal::from(20), None);
        assert_eq!(result, CategorizationResult::uncategorized());
    }

    #[test]
    fn keywords_do_not_match_inside_other_words() {
        let result = categorizer().categorize("Dinner with the team", Decimal::from(40), None);
        assert_eq!(result.category, Category::Meals);
        assert_eq!(result.subcategory, "dinner");
        assert!(result.alternatives.is_empty());
    }

    #[test]
    fn expensive_meals_become_business_meals() {
        let result = categorizer().categorize("Team dinner", Decimal::from(120), None);
        assert_eq!(result.subcategory, "business_meal");

        let at_floor = categorizer().categorize("Team dinner", Decimal::from(75), None);
        assert_eq!(at_floor.subcategory, "dinner");
    }

    #[test]
    fn plural_and_multi_word_keywords_match() {
        let result = categorizer().categorize("Two FLIGHTS to Denver", Decimal::from(600), None);
        assert_eq!(result.category, Category::Airfare);

        let client = categorizer().categorize("client dinner downtown", Decimal::from(60), None);
        assert_eq!(client.subcategory, "client_meal");
        assert_eq!(client.confidence, 0.95);
    }

    #[test]
    fn known_hint_is_trusted() {
        let result = categorizer().categorize("Something odd", Decimal::from(10), Some("Lodging"));
        assert_eq!(result.category, Category::Lodging);
        assert_eq!(result.subcategory, "general");
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn unknown_hint_is_ignored() {
        let result = categorizer().categorize("Hilton two nights", Decimal::from(500), Some("gifts"));
        assert_eq!(result.category, Category::Lodging);
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn feeding_category_back_as_hint_is_idempotent() {
        let categorizer = categorizer();
        for description in ["Uber from airport to hotel", "Staples printer toner", "Lunch", "gift card"] {
            let first = categorizer.categorize(description, Decimal::from(30), None);
            let second =
                categorizer.categorize(description, Decimal::from(30), Some(first.category.as_str()));
            assert_eq!(second.category, first.category);
            assert_eq!(second.confidence, 1.0);
        }
    }

    #[test]
    fn merchant_participates_in_matching() {
        let expense = Expense::new("Stay for offsite", Decimal::from(280)).with_merchant("Marriott");
        let result = categorizer().categorize_expense(&expense);
        assert_eq!(result.category, Category::Lodging);
    }

    #[test]
    fn standard_table_emits_every_category() {
        assert_eq!(
            categorizer().categories().into_iter().collect::<Vec<_>>(),
            Category::ALL.to_vec()
        );
    }

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_text("  taxi \n to   office "), "taxi to office");
    }
}
