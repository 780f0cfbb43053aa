use thiserror::Error;

use crate::models::Category;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpenseError {
    /// Rejected before any policy logic runs.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("policy configuration error: {0}")]
    Configuration(String),
}

impl ExpenseError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn missing_rule(category: Category) -> Self {
        Self::Configuration(format!(
            "no policy rule is configured for category `{}`",
            category.as_str()
        ))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Configuration(_) => "configuration_error",
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
